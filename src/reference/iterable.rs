// Iteration support for `each`. An Iterable produces keyed items from a reference; the
// IterationArtifacts keep, per list block, the key map plus a linked list of ListItems in
// DOM order. Each ListItem owns an updatable value reference and an updatable memo
// reference (the item's index), so a retained item updates in place and the template
// rendered for it sees the new value through its existing references. The linked list is
// a slab of records with index links, which gives O(1) splice during reconciliation
// without reference cycles.

//! Keyed iteration artifacts.

use super::reference::{Reference, ReferenceRef, UpdatableReference};
use super::tag::{combine, RevisionClock, Tag, UpdatableTag};
use crate::core::{VmError, VmResult};
use crate::value::Value;
use hashbrown::{HashMap, HashSet};
use std::cell::RefCell;
use std::rc::Rc;

/// One item produced by an iterable.
#[derive(Clone, Debug)]
pub struct IterationItem {
    pub key: String,
    pub value: Value,
    pub memo: Value,
}

/// Source of keyed items for `each`.
pub trait Iterable {
    fn tag(&self) -> Tag;
    fn iterate(&self) -> VmResult<Vec<IterationItem>>;
}

/// How item keys are derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPath {
    Index,
    Primitive,
    Property(Vec<String>),
}

impl KeyPath {
    pub fn parse(key: &str) -> KeyPath {
        match key {
            "@index" => KeyPath::Index,
            "@primitive" => KeyPath::Primitive,
            path => KeyPath::Property(path.split('.').map(str::to_string).collect()),
        }
    }

    fn key_for(&self, value: &Value, index: usize) -> VmResult<String> {
        match self {
            KeyPath::Index => Ok(index.to_string()),
            KeyPath::Primitive => Ok(value.to_display_string()),
            KeyPath::Property(path) => {
                let key = path
                    .iter()
                    .fold(value.clone(), |current, segment| current.get_property(segment));
                if key.is_nullish() {
                    return Err(VmError::MissingIterationKey {
                        key: path.join("."),
                    });
                }
                Ok(key.to_display_string())
            }
        }
    }
}

/// Iterable over the list (or nullish) value of a reference.
pub struct ValueIterable {
    reference: ReferenceRef,
    key_path: KeyPath,
    list_tag: Rc<UpdatableTag>,
    tag: Tag,
}

impl ValueIterable {
    pub fn new(reference: ReferenceRef, key_path: KeyPath, clock: &RevisionClock) -> Self {
        let list_tag = UpdatableTag::new(clock, Tag::Constant);
        let tag = combine([reference.tag(), list_tag.tag()]);
        Self {
            reference,
            key_path,
            list_tag,
            tag,
        }
    }
}

impl Iterable for ValueIterable {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn iterate(&self) -> VmResult<Vec<IterationItem>> {
        let values = match self.reference.value() {
            Value::List(list) => {
                self.list_tag.update(list.tag());
                list.items()
            }
            Value::Undefined | Value::Null | Value::Bool(false) => {
                self.list_tag.update(Tag::Constant);
                Vec::new()
            }
            other => {
                return Err(VmError::NotIterable {
                    kind: other.kind_name(),
                })
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            let base = self.key_path.key_for(&value, index)?;
            let mut key = base.clone();
            let mut counter = 1;
            while seen.contains(&key) {
                key = format!("{base}~{counter}");
                counter += 1;
            }
            seen.insert(key.clone());
            items.push(IterationItem {
                key,
                value,
                memo: Value::from(index),
            });
        }
        Ok(items)
    }
}

/// Value and memo references of one list item.
#[derive(Clone)]
pub struct ItemRefs {
    pub key: String,
    pub value: Rc<UpdatableReference>,
    pub memo: Rc<UpdatableReference>,
}

impl ItemRefs {
    pub fn value_ref(&self) -> ReferenceRef {
        self.value.clone()
    }

    pub fn memo_ref(&self) -> ReferenceRef {
        self.memo.clone()
    }
}

struct ListItem {
    refs: ItemRefs,
    retained: bool,
    seen: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct ArtifactState {
    map: HashMap<String, usize>,
    slots: Vec<Option<ListItem>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl ArtifactState {
    fn item(&self, index: usize) -> Option<&ListItem> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut ListItem> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    fn allocate(&mut self, item: ListItem) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(item);
                index
            }
            None => {
                self.slots.push(Some(item));
                self.slots.len() - 1
            }
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = match self.item(index) {
            Some(item) => (item.prev, item.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(item) = self.item_mut(p) {
                    item.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(item) = self.item_mut(n) {
                    item.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(item) = self.item_mut(index) {
            item.prev = None;
            item.next = None;
        }
    }

    fn link_before(&mut self, index: usize, reference: Option<usize>) {
        let prev = match reference {
            Some(r) => self.item(r).and_then(|item| item.prev),
            None => self.tail,
        };
        if let Some(item) = self.item_mut(index) {
            item.prev = prev;
            item.next = reference;
        }
        match prev {
            Some(p) => {
                if let Some(item) = self.item_mut(p) {
                    item.next = Some(index);
                }
            }
            None => self.head = Some(index),
        }
        match reference {
            Some(r) => {
                if let Some(item) = self.item_mut(r) {
                    item.prev = Some(index);
                }
            }
            None => self.tail = Some(index),
        }
    }
}

/// Per-list-block iteration state shared by the initial iterator, the
/// presence reference and the list block opcode.
pub struct IterationArtifacts {
    iterable: Rc<dyn Iterable>,
    clock: RevisionClock,
    state: RefCell<ArtifactState>,
    pending: RefCell<Option<std::vec::IntoIter<IterationItem>>>,
}

impl IterationArtifacts {
    pub fn new(iterable: Rc<dyn Iterable>, clock: &RevisionClock) -> Rc<Self> {
        Rc::new(Self {
            iterable,
            clock: clock.clone(),
            state: RefCell::new(ArtifactState::default()),
            pending: RefCell::new(None),
        })
    }

    pub fn tag(&self) -> Tag {
        self.iterable.tag()
    }

    /// Empty artifacts over the same iterable, for a block that renders the
    /// list again from scratch.
    pub fn fresh(&self) -> Rc<Self> {
        IterationArtifacts::new(self.iterable.clone(), &self.clock)
    }

    /// Whether the iterable is currently empty. The computed items are kept
    /// for the next [`IterationArtifacts::iterate`].
    pub fn is_empty(&self) -> VmResult<bool> {
        let items = self.iterable.iterate()?;
        let empty = items.is_empty();
        *self.pending.borrow_mut() = Some(items.into_iter());
        Ok(empty)
    }

    pub fn iterate(&self) -> VmResult<std::vec::IntoIter<IterationItem>> {
        match self.pending.borrow_mut().take() {
            Some(items) => Ok(items),
            None => Ok(self.iterable.iterate()?.into_iter()),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.state.borrow().map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.state.borrow().map.get(key).copied()
    }

    pub fn was_seen(&self, key: &str) -> bool {
        let state = self.state.borrow();
        state
            .map
            .get(key)
            .and_then(|index| state.item(*index))
            .is_some_and(|item| item.seen)
    }

    pub fn head(&self) -> Option<usize> {
        self.state.borrow().head
    }

    pub fn next_node(&self, index: usize) -> Option<usize> {
        self.state.borrow().item(index).and_then(|item| item.next)
    }

    pub fn refs(&self, index: usize) -> Option<ItemRefs> {
        self.state.borrow().item(index).map(|item| item.refs.clone())
    }

    pub fn key_of(&self, index: usize) -> Option<String> {
        self.state.borrow().item(index).map(|item| item.refs.key.clone())
    }

    /// Keys in list order.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.borrow();
        let mut keys = Vec::new();
        let mut current = state.head;
        while let Some(index) = current {
            match state.item(index) {
                Some(item) => {
                    keys.push(item.refs.key.clone());
                    current = item.next;
                }
                None => break,
            }
        }
        keys
    }

    fn new_item(&self, item: IterationItem) -> ListItem {
        ListItem {
            refs: ItemRefs {
                key: item.key,
                value: UpdatableReference::new(item.value, &self.clock),
                memo: UpdatableReference::new(item.memo, &self.clock),
            },
            retained: false,
            seen: false,
            prev: None,
            next: None,
        }
    }

    fn link(&self, list_item: ListItem, reference: Option<usize>) -> ItemRefs {
        let key = list_item.refs.key.clone();
        let refs = list_item.refs.clone();
        let mut state = self.state.borrow_mut();
        let index = state.allocate(list_item);
        state.link_before(index, reference);
        state.map.insert(key, index);
        refs
    }

    /// Append during the first render. The item is not retained, so the next
    /// reconciliation deletes it unless the new items still contain its key.
    pub fn append(&self, item: IterationItem) -> ItemRefs {
        let list_item = self.new_item(item);
        self.link(list_item, None)
    }

    /// Insert a new item before `reference` (or at the end).
    pub fn insert_before(&self, item: IterationItem, reference: Option<usize>) -> ItemRefs {
        let mut list_item = self.new_item(item);
        list_item.retained = true;
        self.link(list_item, reference)
    }

    /// Push a fresh value and memo into an existing item and mark it retained.
    pub fn update(&self, index: usize, item: &IterationItem) -> Option<ItemRefs> {
        let refs = {
            let mut state = self.state.borrow_mut();
            let list_item = state.item_mut(index)?;
            list_item.retained = true;
            list_item.refs.clone()
        };
        refs.value.update(item.value.clone());
        refs.memo.update(item.memo.clone());
        Some(refs)
    }

    pub fn move_before(&self, index: usize, reference: Option<usize>) {
        let mut state = self.state.borrow_mut();
        if let Some(item) = state.item_mut(index) {
            item.retained = true;
        }
        state.unlink(index);
        state.link_before(index, reference);
    }

    pub fn remove(&self, index: usize) {
        let mut state = self.state.borrow_mut();
        let key = match state.item(index) {
            Some(item) => item.refs.key.clone(),
            None => return,
        };
        state.unlink(index);
        state.slots[index] = None;
        state.free.push(index);
        state.map.remove(&key);
    }

    pub fn mark_seen(&self, index: usize) {
        if let Some(item) = self.state.borrow_mut().item_mut(index) {
            item.seen = true;
        }
    }

    pub fn should_remove(&self, index: usize) -> bool {
        self.state
            .borrow()
            .item(index)
            .is_some_and(|item| !item.retained)
    }

    pub fn reset(&self, index: usize) {
        if let Some(item) = self.state.borrow_mut().item_mut(index) {
            item.retained = false;
            item.seen = false;
        }
    }
}

/// Iterator over the artifacts used by the first render of a list.
pub struct ReferenceIterator {
    artifacts: Rc<IterationArtifacts>,
    items: RefCell<Option<std::vec::IntoIter<IterationItem>>>,
}

impl ReferenceIterator {
    pub fn new(artifacts: Rc<IterationArtifacts>) -> Self {
        Self {
            artifacts,
            items: RefCell::new(None),
        }
    }

    pub fn artifacts(&self) -> &Rc<IterationArtifacts> {
        &self.artifacts
    }

    /// Unconsumed iterator over fresh artifacts.
    pub fn restart(&self) -> Self {
        ReferenceIterator::new(self.artifacts.fresh())
    }

    pub fn next(&self) -> VmResult<Option<ItemRefs>> {
        let mut items = self.items.borrow_mut();
        if items.is_none() {
            *items = Some(self.artifacts.iterate()?);
        }
        match items.as_mut().and_then(Iterator::next) {
            Some(item) => Ok(Some(self.artifacts.append(item))),
            None => Ok(None),
        }
    }
}

/// True while the iterable has items.
pub struct IterablePresenceReference {
    artifacts: Rc<IterationArtifacts>,
}

impl IterablePresenceReference {
    pub fn new(artifacts: Rc<IterationArtifacts>) -> Self {
        Self { artifacts }
    }
}

impl Reference for IterablePresenceReference {
    fn tag(&self) -> Tag {
        self.artifacts.tag()
    }

    fn value(&self) -> Value {
        match self.artifacts.is_empty() {
            Ok(empty) => Value::Bool(!empty),
            Err(err) => {
                log::debug!("iterable presence check failed: {err}");
                Value::Bool(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::reference::ConstReference;
    use crate::value::{ListModel, ObjectModel};

    fn keyed(clock: &RevisionClock, keys: &[&str]) -> Rc<ListModel> {
        let values = keys
            .iter()
            .map(|k| Value::Object(ObjectModel::from_pairs(clock, [("id", Value::from(*k))])))
            .collect();
        ListModel::from_values(clock, values)
    }

    #[test]
    fn test_keys_from_property_path() {
        let clock = RevisionClock::new();
        let list = keyed(&clock, &["a", "b"]);
        let iterable = ValueIterable::new(
            ConstReference::create(Value::List(list)),
            KeyPath::parse("id"),
            &clock,
        );
        let keys: Vec<_> = iterable.iterate().unwrap().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_keys_are_made_unique() {
        let clock = RevisionClock::new();
        let list = ListModel::from_values(&clock, vec!["x".into(), "x".into(), "y".into()]);
        let iterable = ValueIterable::new(
            ConstReference::create(Value::List(list)),
            KeyPath::Primitive,
            &clock,
        );
        let keys: Vec<_> = iterable.iterate().unwrap().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["x", "x~1", "y"]);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let clock = RevisionClock::new();
        let list = ListModel::from_values(&clock, vec![Value::Object(ObjectModel::new(&clock))]);
        let iterable = ValueIterable::new(
            ConstReference::create(Value::List(list)),
            KeyPath::parse("id"),
            &clock,
        );
        assert!(matches!(
            iterable.iterate(),
            Err(VmError::MissingIterationKey { .. })
        ));
    }

    #[test]
    fn test_not_iterable() {
        let clock = RevisionClock::new();
        let iterable = ValueIterable::new(ConstReference::create(Value::from(3)), KeyPath::Index, &clock);
        assert!(matches!(iterable.iterate(), Err(VmError::NotIterable { kind: "number" })));
    }

    #[test]
    fn test_list_tag_follows_mutation() {
        let clock = RevisionClock::new();
        let list = keyed(&clock, &["a"]);
        let iterable = ValueIterable::new(
            ConstReference::create(Value::List(list.clone())),
            KeyPath::parse("id"),
            &clock,
        );
        iterable.iterate().unwrap();
        let snapshot = iterable.tag().value();
        list.push(Value::Object(ObjectModel::from_pairs(&clock, [("id", Value::from("b"))])));
        assert!(!iterable.tag().validate(snapshot));
    }

    #[test]
    fn test_artifacts_linking() {
        let clock = RevisionClock::new();
        let list = keyed(&clock, &["a", "b", "c"]);
        let iterable: Rc<dyn Iterable> = Rc::new(ValueIterable::new(
            ConstReference::create(Value::List(list)),
            KeyPath::parse("id"),
            &clock,
        ));
        let artifacts = IterationArtifacts::new(iterable, &clock);
        assert!(!artifacts.is_empty().unwrap());

        let iterator = ReferenceIterator::new(artifacts.clone());
        while iterator.next().unwrap().is_some() {}
        assert_eq!(artifacts.keys(), vec!["a", "b", "c"]);

        let c = artifacts.get("c").unwrap();
        let a = artifacts.get("a").unwrap();
        artifacts.move_before(c, Some(a));
        assert_eq!(artifacts.keys(), vec!["c", "a", "b"]);

        artifacts.remove(artifacts.get("a").unwrap());
        assert_eq!(artifacts.keys(), vec!["c", "b"]);
        assert!(!artifacts.has("a"));
    }
}
