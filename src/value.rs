// Dynamic values flowing through references: primitives, strings that are trusted as HTML,
// DOM nodes, observable lists and objects, and component definitions. Objects and lists are
// the mutable part of the data model. They hold DirtyableTags stamped through the revision
// clock of the environment they were created for, so a property write is what invalidates
// every reference that read it. Display and truthiness follow the conventions templates
// expect: null and undefined render as nothing, integral numbers render without a
// fraction, and empty strings, zero, NaN and empty lists are falsy.

//! Template data model.

use crate::component::ComponentDefinition;
use crate::dom::NodeRef;
use crate::reference::tag::{DirtyableTag, RevisionClock, Tag};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A dynamic template value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// String trusted as HTML.
    SafeString(Rc<str>),
    /// DOM node; a fragment is a node of kind fragment.
    Node(NodeRef),
    List(Rc<ListModel>),
    Object(Rc<ObjectModel>),
    Component(Rc<ComponentDefinition>),
}

impl Value {
    pub fn safe(html: impl Into<Rc<str>>) -> Value {
        Value::SafeString(html.into())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::SafeString(_) => "safe string",
            Value::Node(_) => "node",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Component(_) => "component",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Template truthiness. Empty lists are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::SafeString(_) => true,
            Value::List(list) => !list.is_empty(),
            Value::Node(_) | Value::Object(_) | Value::Component(_) => true,
        }
    }

    /// Strict identity: primitives by value, everything else by reference.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::SafeString(a), Value::SafeString(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Component(a), Value::Component(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Text rendered for this value; empty for null and undefined.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) | Value::SafeString(s) => s.to_string(),
            Value::Node(node) => node.text_content(),
            Value::List(list) => list
                .items()
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) | Value::Component(_) => "[object Object]".to_string(),
        }
    }

    /// Property read used by path references.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Object(object) => object.get(key),
            Value::List(list) => match key {
                "length" => Value::Number(list.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| list.get(index))
                    .unwrap_or_default(),
            },
            Value::String(s) | Value::SafeString(s) if key == "length" => {
                Value::Number(s.chars().count() as f64)
            }
            _ => Value::Undefined,
        }
    }

    /// Tag guarding [`Value::get_property`] for the same key.
    pub fn property_tag(&self, key: &str) -> Tag {
        match self {
            Value::Object(object) => object.tag_for(key),
            Value::List(list) => list.tag(),
            _ => Tag::Constant,
        }
    }

    /// Build a value tree from JSON. Objects and arrays become observable
    /// models bound to `clock`.
    pub fn from_json(clock: &RevisionClock, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                let list = ListModel::new(clock);
                list.replace(items.iter().map(|item| Value::from_json(clock, item)).collect());
                Value::List(list)
            }
            serde_json::Value::Object(map) => {
                let object = ObjectModel::new(clock);
                for (key, item) in map {
                    object.insert_initial(key, Value::from_json(clock, item));
                }
                Value::Object(object)
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::SafeString(s) => write!(f, "safe({s:?})"),
            Value::Node(node) => write!(f, "{node:?}"),
            Value::List(list) => f.debug_list().entries(list.items().iter()).finish(),
            Value::Object(object) => {
                let mut map = f.debug_map();
                for (key, value) in object.entries() {
                    map.entry(&key, &value);
                }
                map.finish()
            }
            Value::Component(definition) => write!(f, "component({})", definition.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NodeRef> for Value {
    fn from(node: NodeRef) -> Self {
        Value::Node(node)
    }
}

impl From<Rc<ObjectModel>> for Value {
    fn from(object: Rc<ObjectModel>) -> Self {
        Value::Object(object)
    }
}

impl From<Rc<ListModel>> for Value {
    fn from(list: Rc<ListModel>) -> Self {
        Value::List(list)
    }
}

/// Observable object with ordered keys.
pub struct ObjectModel {
    clock: RevisionClock,
    entries: RefCell<Vec<(Rc<str>, Value)>>,
    key_tags: RefCell<HashMap<Rc<str>, Rc<DirtyableTag>>>,
    tag: Rc<DirtyableTag>,
}

impl ObjectModel {
    pub fn new(clock: &RevisionClock) -> Rc<Self> {
        Rc::new(ObjectModel {
            clock: clock.clone(),
            entries: RefCell::new(Vec::new()),
            key_tags: RefCell::new(HashMap::new()),
            tag: DirtyableTag::new(clock),
        })
    }

    pub fn from_pairs<K, I>(clock: &RevisionClock, pairs: I) -> Rc<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let object = ObjectModel::new(clock);
        for (key, value) in pairs {
            object.insert_initial(key.as_ref(), value);
        }
        object
    }

    fn insert_initial(&self, key: &str, value: Value) {
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| &**k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((Rc::from(key), value)),
        }
    }

    pub fn get(&self, key: &str) -> Value {
        self.entries
            .borrow()
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.borrow().iter().any(|(k, _)| &**k == key)
    }

    /// Write a key. Writing an identical value does not dirty anything.
    pub fn set(&self, key: &str, value: Value) {
        {
            let mut entries = self.entries.borrow_mut();
            match entries.iter_mut().find(|(k, _)| &**k == key) {
                Some(entry) if entry.1.identical(&value) => return,
                Some(entry) => entry.1 = value,
                None => entries.push((Rc::from(key), value)),
            }
        }
        self.dirty_key(key);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let index = entries.iter().position(|(k, _)| &**k == key)?;
            entries.remove(index).1
        };
        self.dirty_key(key);
        Some(removed)
    }

    fn dirty_key(&self, key: &str) {
        if let Some(tag) = self.key_tags.borrow().get(key) {
            tag.dirty();
        }
        self.tag.dirty();
    }

    /// Tag for one key, created on first request.
    pub fn tag_for(&self, key: &str) -> Tag {
        let mut tags = self.key_tags.borrow_mut();
        if let Some(tag) = tags.get(key) {
            return tag.tag();
        }
        let tag = DirtyableTag::new(&self.clock);
        tags.insert(Rc::from(key), tag.clone());
        Tag::Dirtyable(tag)
    }

    /// Tag dirtied by any write.
    pub fn tag(&self) -> Tag {
        self.tag.tag()
    }

    pub fn keys(&self) -> Vec<Rc<str>> {
        self.entries.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.entries.borrow().clone()
    }
}

/// Observable ordered list.
pub struct ListModel {
    items: RefCell<Vec<Value>>,
    tag: Rc<DirtyableTag>,
}

impl ListModel {
    pub fn new(clock: &RevisionClock) -> Rc<Self> {
        Rc::new(ListModel {
            items: RefCell::new(Vec::new()),
            tag: DirtyableTag::new(clock),
        })
    }

    pub fn from_values(clock: &RevisionClock, values: Vec<Value>) -> Rc<Self> {
        let list = ListModel::new(clock);
        *list.items.borrow_mut() = values;
        list
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    pub fn items(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
        self.tag.dirty();
    }

    pub fn insert(&self, index: usize, value: Value) {
        {
            let mut items = self.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, value);
        }
        self.tag.dirty();
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.tag.dirty();
        Some(removed)
    }

    pub fn set(&self, index: usize, value: Value) {
        {
            let mut items = self.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) => *slot = value,
                None => return,
            }
        }
        self.tag.dirty();
    }

    pub fn replace(&self, values: Vec<Value>) {
        *self.items.borrow_mut() = values;
        self.tag.dirty();
    }

    pub fn tag(&self) -> Tag {
        self.tag.tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings() {
        assert_eq!(Value::Undefined.to_display_string(), "");
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::from(3.0).to_display_string(), "3");
        assert_eq!(Value::from(2.5).to_display_string(), "2.5");
        assert_eq!(Value::from(false).to_display_string(), "false");
        assert_eq!(Value::Number(f64::NAN).to_display_string(), "NaN");
    }

    #[test]
    fn test_truthiness() {
        let clock = RevisionClock::new();
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::List(ListModel::new(&clock)).is_truthy());
        assert!(Value::Object(ObjectModel::new(&clock)).is_truthy());
    }

    #[test]
    fn test_object_key_tags() {
        let clock = RevisionClock::new();
        let object = ObjectModel::from_pairs(&clock, [("name", Value::from("a")), ("age", 3.into())]);
        let name_tag = object.tag_for("name");
        let age_tag = object.tag_for("age");
        let name_snapshot = name_tag.value();
        let age_snapshot = age_tag.value();

        object.set("name", Value::from("b"));
        assert!(!name_tag.validate(name_snapshot));
        assert!(age_tag.validate(age_snapshot));
        assert_eq!(object.get("name").to_display_string(), "b");
    }

    #[test]
    fn test_identical_write_does_not_dirty() {
        let clock = RevisionClock::new();
        let object = ObjectModel::from_pairs(&clock, [("n", Value::from(1))]);
        let tag = object.tag();
        let snapshot = tag.value();
        object.set("n", Value::from(1));
        assert!(tag.validate(snapshot));
    }

    #[test]
    fn test_list_properties() {
        let clock = RevisionClock::new();
        let list = ListModel::from_values(&clock, vec![Value::from("a"), Value::from("b")]);
        let value = Value::List(list.clone());
        assert_eq!(value.get_property("length").to_display_string(), "2");
        assert_eq!(value.get_property("1").to_display_string(), "b");
        assert_eq!(value.to_display_string(), "a,b");

        let snapshot = value.property_tag("length").value();
        list.push(Value::from("c"));
        assert!(!value.property_tag("length").validate(snapshot));
    }

    #[test]
    fn test_from_json() {
        let clock = RevisionClock::new();
        let json: serde_json::Value =
            serde_json::from_str(r#"{"title": "Hi", "items": [1, 2], "nested": {"ok": true}}"#)
                .unwrap();
        let value = Value::from_json(&clock, &json);
        assert_eq!(value.get_property("title").to_display_string(), "Hi");
        assert_eq!(value.get_property("items").get_property("length").to_display_string(), "2");
        assert!(value.get_property("nested").get_property("ok").is_truthy());
    }

    #[test]
    fn test_identity() {
        let clock = RevisionClock::new();
        let a = ObjectModel::new(&clock);
        let b = ObjectModel::new(&clock);
        assert!(Value::Object(a.clone()).identical(&Value::Object(a)));
        assert!(!Value::Object(b).identical(&Value::Null));
        assert!(!Value::Number(f64::NAN).identical(&Value::Number(f64::NAN)));
        assert!(Value::from("x").identical(&Value::from("x")));
    }
}
