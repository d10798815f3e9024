// Revision tags answer one question cheaply: "could the value behind this handle have
// changed since revision R?". A tag never stores the value itself, only a monotonically
// non-decreasing revision number. The revision counter is a RevisionClock shared by every
// tag created for one environment, so independent environments never see each other's
// mutations. Dirtyable tags are stamped with a fresh revision on mutation, updatable tags
// wrap another tag that can be swapped at runtime, and combinator tags report the maximum
// revision of their children, caching the result until the clock moves.

//! Revision tags and the revision clock.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// A point on the revision clock.
pub type Revision = u64;

/// Revision of tags that never change.
pub const CONSTANT: Revision = 0;

/// Revision a fresh clock starts at.
pub const INITIAL: Revision = 1;

/// Revision reported by tags that are always considered changed.
pub const VOLATILE: Revision = u64::MAX;

/// Shared monotonic revision counter.
#[derive(Clone)]
pub struct RevisionClock(Rc<Cell<Revision>>);

impl RevisionClock {
    pub fn new() -> Self {
        RevisionClock(Rc::new(Cell::new(INITIAL)))
    }

    /// Current revision.
    pub fn current(&self) -> Revision {
        self.0.get()
    }

    /// Advance the clock and return the new revision.
    pub fn bump(&self) -> Revision {
        let next = self.0.get() + 1;
        self.0.set(next);
        next
    }

    pub fn ptr_eq(&self, other: &RevisionClock) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RevisionClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionClock({})", self.current())
    }
}

/// Revision tag.
#[derive(Clone)]
pub enum Tag {
    Constant,
    Volatile,
    Dirtyable(Rc<DirtyableTag>),
    Updatable(Rc<UpdatableTag>),
    Combinator(Rc<CombinatorTag>),
}

impl Tag {
    pub fn value(&self) -> Revision {
        match self {
            Tag::Constant => CONSTANT,
            Tag::Volatile => VOLATILE,
            Tag::Dirtyable(tag) => tag.revision.get(),
            Tag::Updatable(tag) => tag.value(),
            Tag::Combinator(tag) => tag.value(),
        }
    }

    /// True iff the tag still reports `snapshot`. Volatile never validates.
    pub fn validate(&self, snapshot: Revision) -> bool {
        let value = self.value();
        value != VOLATILE && value == snapshot
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Tag::Constant)
    }

    pub fn is_volatile(&self) -> bool {
        matches!(self, Tag::Volatile)
    }

    /// Identity comparison; two constant or two volatile tags are equal.
    pub fn ptr_eq(&self, other: &Tag) -> bool {
        match (self, other) {
            (Tag::Constant, Tag::Constant) | (Tag::Volatile, Tag::Volatile) => true,
            (Tag::Dirtyable(a), Tag::Dirtyable(b)) => Rc::ptr_eq(a, b),
            (Tag::Updatable(a), Tag::Updatable(b)) => Rc::ptr_eq(a, b),
            (Tag::Combinator(a), Tag::Combinator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn clock(&self) -> Option<&RevisionClock> {
        match self {
            Tag::Constant | Tag::Volatile => None,
            Tag::Dirtyable(tag) => Some(&tag.clock),
            Tag::Updatable(tag) => Some(&tag.clock),
            Tag::Combinator(tag) => Some(&tag.clock),
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Constant => write!(f, "Constant"),
            Tag::Volatile => write!(f, "Volatile"),
            Tag::Dirtyable(_) => write!(f, "Dirtyable({})", self.value()),
            Tag::Updatable(_) => write!(f, "Updatable({})", self.value()),
            Tag::Combinator(tag) => {
                write!(f, "Combinator({}, {} children)", self.value(), tag.children.len())
            }
        }
    }
}

impl From<Rc<DirtyableTag>> for Tag {
    fn from(tag: Rc<DirtyableTag>) -> Self {
        Tag::Dirtyable(tag)
    }
}

impl From<Rc<UpdatableTag>> for Tag {
    fn from(tag: Rc<UpdatableTag>) -> Self {
        Tag::Updatable(tag)
    }
}

/// Tag stamped with a fresh revision on every mutation.
pub struct DirtyableTag {
    clock: RevisionClock,
    revision: Cell<Revision>,
}

impl DirtyableTag {
    pub fn new(clock: &RevisionClock) -> Rc<Self> {
        Rc::new(DirtyableTag {
            clock: clock.clone(),
            revision: Cell::new(clock.current()),
        })
    }

    pub fn dirty(&self) {
        self.revision.set(self.clock.bump());
    }

    pub fn tag(self: &Rc<Self>) -> Tag {
        Tag::Dirtyable(self.clone())
    }
}

/// Tag wrapping another tag that can be swapped.
pub struct UpdatableTag {
    clock: RevisionClock,
    inner: RefCell<Tag>,
    last_updated: Cell<Revision>,
    cache: Cell<Option<(Revision, Revision)>>,
}

impl UpdatableTag {
    pub fn new(clock: &RevisionClock, inner: Tag) -> Rc<Self> {
        Rc::new(UpdatableTag {
            clock: clock.clone(),
            inner: RefCell::new(inner),
            last_updated: Cell::new(INITIAL),
            cache: Cell::new(None),
        })
    }

    /// Point at a different tag. Swapping in the same tag is a no-op.
    pub fn update(&self, tag: Tag) {
        if tag.ptr_eq(&self.inner.borrow()) {
            return;
        }
        *self.inner.borrow_mut() = tag;
        self.last_updated.set(self.clock.current());
        self.cache.set(None);
    }

    pub fn tag(self: &Rc<Self>) -> Tag {
        Tag::Updatable(self.clone())
    }

    fn value(&self) -> Revision {
        let now = self.clock.current();
        if let Some((checked, value)) = self.cache.get() {
            if checked == now {
                return value;
            }
        }
        let value = self.inner.borrow().value().max(self.last_updated.get());
        self.cache.set(Some((now, value)));
        value
    }
}

/// Maximum of several child tags, recomputed once per clock revision.
pub struct CombinatorTag {
    clock: RevisionClock,
    children: Vec<Tag>,
    cache: Cell<Option<(Revision, Revision)>>,
}

impl CombinatorTag {
    fn value(&self) -> Revision {
        let now = self.clock.current();
        if let Some((checked, value)) = self.cache.get() {
            if checked == now {
                return value;
            }
        }
        let value = self
            .children
            .iter()
            .map(Tag::value)
            .max()
            .unwrap_or(CONSTANT);
        self.cache.set(Some((now, value)));
        value
    }
}

/// Combine tags: any volatile child wins, constant children are dropped,
/// no remaining children means constant and a single child is returned as is.
pub fn combine<I>(tags: I) -> Tag
where
    I: IntoIterator<Item = Tag>,
{
    let mut optimized = Vec::new();
    for tag in tags {
        match tag {
            Tag::Volatile => return Tag::Volatile,
            Tag::Constant => {}
            other => optimized.push(other),
        }
    }

    match optimized.len() {
        0 => Tag::Constant,
        1 => optimized.pop().unwrap_or(Tag::Constant),
        _ => {
            let clock = match optimized[0].clock() {
                Some(clock) => clock.clone(),
                None => return Tag::Constant,
            };
            Tag::Combinator(Rc::new(CombinatorTag {
                clock,
                children: optimized,
                cache: Cell::new(None),
            }))
        }
    }
}
