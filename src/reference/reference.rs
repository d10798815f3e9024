// References are lazy, cacheable handles to values, each paired with a tag. Reading a
// reference twice with no intervening mutation returns the cached value without running
// the computation again. Path references are memoized per parent and key through a table
// of weak pointers owned by the parent, so `this.user.name` read from two places in a
// template shares one reference while the parent never keeps its children alive.

//! Reference kinds.

use super::tag::{combine, DirtyableTag, Revision, RevisionClock, Tag, UpdatableTag};
use crate::value::Value;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Table of memoized child path references.
pub type PathChildren = RefCell<HashMap<Rc<str>, Weak<PathReference>>>;

/// A lazily computed value paired with a tag.
pub trait Reference {
    fn tag(&self) -> Tag;
    fn value(&self) -> Value;

    /// Memo table for child paths; `None` disables memoization.
    fn children(&self) -> Option<&PathChildren> {
        None
    }
}

pub type ReferenceRef = Rc<dyn Reference>;

/// True when the reference can never change.
pub fn is_const(reference: &ReferenceRef) -> bool {
    reference.tag().is_const()
}

/// Reference to `key` of `parent`'s value, memoized when the parent allows it.
pub fn child(parent: &ReferenceRef, key: &str, clock: &RevisionClock) -> ReferenceRef {
    if let Some(children) = parent.children() {
        if let Some(existing) = children.borrow().get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let created = Rc::new(PathReference::new(parent.clone(), key, clock));
        children
            .borrow_mut()
            .insert(Rc::from(key), Rc::downgrade(&created));
        return created;
    }
    Rc::new(PathReference::new(parent.clone(), key, clock))
}

/// Follow a dotted path from `parent`.
pub fn path(parent: &ReferenceRef, keys: &[impl AsRef<str>], clock: &RevisionClock) -> ReferenceRef {
    keys.iter()
        .fold(parent.clone(), |current, key| child(&current, key.as_ref(), clock))
}

/// Reference whose value never changes.
pub struct ConstReference {
    value: Value,
    children: PathChildren,
}

impl ConstReference {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            children: RefCell::new(HashMap::new()),
        }
    }

    pub fn create(value: Value) -> ReferenceRef {
        match value {
            Value::Undefined => undefined_reference(),
            Value::Null => null_reference(),
            Value::Bool(b) => bool_reference(b),
            other => Rc::new(ConstReference::new(other)),
        }
    }
}

impl Reference for ConstReference {
    fn tag(&self) -> Tag {
        Tag::Constant
    }

    fn value(&self) -> Value {
        self.value.clone()
    }

    fn children(&self) -> Option<&PathChildren> {
        Some(&self.children)
    }
}

thread_local! {
    static UNDEFINED: ReferenceRef = Rc::new(ConstReference::new(Value::Undefined));
    static NULL: ReferenceRef = Rc::new(ConstReference::new(Value::Null));
    static TRUE: ReferenceRef = Rc::new(ConstReference::new(Value::Bool(true)));
    static FALSE: ReferenceRef = Rc::new(ConstReference::new(Value::Bool(false)));
}

pub fn undefined_reference() -> ReferenceRef {
    UNDEFINED.with(Rc::clone)
}

pub fn null_reference() -> ReferenceRef {
    NULL.with(Rc::clone)
}

pub fn bool_reference(value: bool) -> ReferenceRef {
    if value {
        TRUE.with(Rc::clone)
    } else {
        FALSE.with(Rc::clone)
    }
}

/// Reference whose value is replaced from outside: the render's `self` and
/// the value and memo of list items.
pub struct UpdatableReference {
    value: RefCell<Value>,
    tag: Rc<DirtyableTag>,
    children: PathChildren,
}

impl UpdatableReference {
    pub fn new(value: Value, clock: &RevisionClock) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            tag: DirtyableTag::new(clock),
            children: RefCell::new(HashMap::new()),
        })
    }

    /// Replace the value; dirties the tag unless the new value is identical.
    pub fn update(&self, value: Value) {
        if self.value.borrow().identical(&value) {
            return;
        }
        *self.value.borrow_mut() = value;
        self.tag.dirty();
    }
}

impl Reference for UpdatableReference {
    fn tag(&self) -> Tag {
        self.tag.tag()
    }

    fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    fn children(&self) -> Option<&PathChildren> {
        Some(&self.children)
    }
}

/// Property of a parent reference's value.
pub struct PathReference {
    parent: ReferenceRef,
    key: Rc<str>,
    property_tag: Rc<UpdatableTag>,
    tag: Tag,
    cache: RefCell<Option<(Revision, Value)>>,
    children: PathChildren,
}

impl PathReference {
    fn new(parent: ReferenceRef, key: &str, clock: &RevisionClock) -> Self {
        let property_tag = UpdatableTag::new(clock, Tag::Constant);
        let tag = combine([parent.tag(), property_tag.tag()]);
        Self {
            parent,
            key: Rc::from(key),
            property_tag,
            tag,
            cache: RefCell::new(None),
            children: RefCell::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Reference for PathReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Value {
        if let Some((snapshot, value)) = &*self.cache.borrow() {
            if self.tag.validate(*snapshot) {
                return value.clone();
            }
        }
        let parent = self.parent.value();
        self.property_tag.update(parent.property_tag(&self.key));
        let value = parent.get_property(&self.key);
        *self.cache.borrow_mut() = Some((self.tag.value(), value.clone()));
        value
    }

    fn children(&self) -> Option<&PathChildren> {
        Some(&self.children)
    }
}

/// Reference computed by a closure, cached against its tag.
pub struct ComputedReference {
    tag: Tag,
    compute: Box<dyn Fn() -> Value>,
    cache: RefCell<Option<(Revision, Value)>>,
    children: PathChildren,
}

impl ComputedReference {
    pub fn new(tag: Tag, compute: impl Fn() -> Value + 'static) -> Self {
        Self {
            tag,
            compute: Box::new(compute),
            cache: RefCell::new(None),
            children: RefCell::new(HashMap::new()),
        }
    }
}

impl Reference for ComputedReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Value {
        if let Some((snapshot, value)) = &*self.cache.borrow() {
            if self.tag.validate(*snapshot) {
                return value.clone();
            }
        }
        let value = (self.compute)();
        *self.cache.borrow_mut() = Some((self.tag.value(), value.clone()));
        value
    }

    fn children(&self) -> Option<&PathChildren> {
        Some(&self.children)
    }
}

/// Truthiness of another reference.
pub struct ConditionalReference {
    inner: ReferenceRef,
}

impl ConditionalReference {
    pub fn create(inner: ReferenceRef) -> ReferenceRef {
        if is_const(&inner) {
            return bool_reference(inner.value().is_truthy());
        }
        Rc::new(ConditionalReference { inner })
    }
}

impl Reference for ConditionalReference {
    fn tag(&self) -> Tag {
        self.inner.tag()
    }

    fn value(&self) -> Value {
        Value::Bool(self.inner.value().is_truthy())
    }
}

/// String concatenation of parts; null when every part is null or undefined.
pub struct ConcatReference {
    parts: Vec<ReferenceRef>,
    tag: Tag,
}

impl ConcatReference {
    pub fn new(parts: Vec<ReferenceRef>) -> Self {
        let tag = combine(parts.iter().map(|p| p.tag()));
        Self { parts, tag }
    }
}

impl Reference for ConcatReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Value {
        let parts: Vec<String> = self
            .parts
            .iter()
            .map(|p| p.value())
            .filter(|v| !v.is_nullish())
            .map(|v| v.to_display_string())
            .collect();
        if parts.is_empty() {
            Value::Null
        } else {
            Value::from(parts.concat())
        }
    }
}

/// Space-joined class names; null when no part contributes.
pub struct ClassListReference {
    parts: Vec<ReferenceRef>,
    tag: Tag,
}

impl ClassListReference {
    pub fn new(parts: Vec<ReferenceRef>) -> Self {
        let tag = combine(parts.iter().map(|p| p.tag()));
        Self { parts, tag }
    }
}

impl Reference for ClassListReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Value {
        let classes: Vec<String> = self
            .parts
            .iter()
            .map(|p| p.value())
            .filter(|v| !v.is_nullish() && !matches!(v, Value::Bool(false)))
            .map(|v| v.to_display_string())
            .filter(|s| !s.is_empty())
            .collect();
        if classes.is_empty() {
            Value::Null
        } else {
            Value::from(classes.join(" "))
        }
    }
}
