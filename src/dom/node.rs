// A minimal shared-ownership node tree: elements, text, comments and fragments. Children
// are held strongly and parents weakly, so a detached subtree is freed once the last
// handle goes away and no reference cycles form. Reads (tag names, attributes, siblings,
// serialization) live here; every write that should be observable as a DOM mutation goes
// through DomOperations so the document can count them.

//! DOM node handles.

use super::html;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
    Comment,
    Fragment,
}

/// A property value stored on an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    Text(String),
    Flag(bool),
}

impl Prop {
    pub fn as_text(&self) -> String {
        match self {
            Prop::Text(text) => text.clone(),
            Prop::Flag(flag) => flag.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

pub(crate) struct ElementData {
    pub(crate) tag: String,
    pub(crate) namespace: Option<String>,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) properties: Vec<(String, Prop)>,
}

pub(crate) enum NodeKind {
    Fragment,
    Element(ElementData),
    Text(String),
    Comment(String),
}

pub(crate) struct NodeData {
    pub(crate) kind: NodeKind,
    parent: Option<Weak<RefCell<NodeData>>>,
    children: Vec<NodeRef>,
}

/// Shared handle to a node.
#[derive(Clone)]
pub struct NodeRef(Rc<RefCell<NodeData>>);

impl NodeRef {
    fn new(kind: NodeKind) -> NodeRef {
        NodeRef(Rc::new(RefCell::new(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        })))
    }

    pub(crate) fn new_element(tag: &str, namespace: Option<&str>) -> NodeRef {
        NodeRef::new(NodeKind::Element(ElementData {
            tag: tag.to_string(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            properties: Vec::new(),
        }))
    }

    pub(crate) fn new_text(text: &str) -> NodeRef {
        NodeRef::new(NodeKind::Text(text.to_string()))
    }

    pub(crate) fn new_comment(text: &str) -> NodeRef {
        NodeRef::new(NodeKind::Comment(text.to_string()))
    }

    pub(crate) fn new_fragment() -> NodeRef {
        NodeRef::new(NodeKind::Fragment)
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn node_type(&self) -> NodeType {
        match self.0.borrow().kind {
            NodeKind::Element(_) => NodeType::Element,
            NodeKind::Text(_) => NodeType::Text,
            NodeKind::Comment(_) => NodeType::Comment,
            NodeKind::Fragment => NodeType::Fragment,
        }
    }

    pub fn is_element(&self) -> bool {
        self.node_type() == NodeType::Element
    }

    pub fn is_text(&self) -> bool {
        self.node_type() == NodeType::Text
    }

    pub fn is_comment(&self) -> bool {
        self.node_type() == NodeType::Comment
    }

    pub fn is_fragment(&self) -> bool {
        self.node_type() == NodeType::Fragment
    }

    /// Lowercase tag name of an element.
    pub fn tag_name(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element(element) => Some(element.tag.clone()),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element(element) => element.namespace.clone(),
            _ => None,
        }
    }

    /// Character data of a text or comment node.
    pub fn data(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Text(text) | NodeKind::Comment(text) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.0
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(NodeRef)
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.0.borrow().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.0.borrow().children.len()
    }

    pub fn first_child(&self) -> Option<NodeRef> {
        self.0.borrow().children.first().cloned()
    }

    pub fn last_child(&self) -> Option<NodeRef> {
        self.0.borrow().children.last().cloned()
    }

    fn sibling(&self, delta: isize) -> Option<NodeRef> {
        let parent = self.parent()?;
        let data = parent.0.borrow();
        let index = data.children.iter().position(|c| c.ptr_eq(self))? as isize + delta;
        if index < 0 {
            return None;
        }
        data.children.get(index as usize).cloned()
    }

    pub fn next_sibling(&self) -> Option<NodeRef> {
        self.sibling(1)
    }

    pub fn previous_sibling(&self) -> Option<NodeRef> {
        self.sibling(-1)
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element(element) => element
                .attributes
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.value.clone()),
            _ => None,
        }
    }

    pub fn attributes(&self) -> Vec<Attribute> {
        match &self.0.borrow().kind {
            NodeKind::Element(element) => element.attributes.clone(),
            _ => Vec::new(),
        }
    }

    /// Live property value; reflected properties fall back to their attribute.
    pub fn property(&self, name: &str) -> Option<Prop> {
        let data = self.0.borrow();
        let element = match &data.kind {
            NodeKind::Element(element) => element,
            _ => return None,
        };
        if let Some((_, prop)) = element.properties.iter().find(|(n, _)| n == name) {
            return Some(prop.clone());
        }
        let attribute = reflected_attribute(name).unwrap_or(name);
        let value = element.attributes.iter().find(|a| a.name == attribute)?;
        if is_boolean_property(name) {
            Some(Prop::Flag(true))
        } else {
            Some(Prop::Text(value.value.clone()))
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let data = self.0.borrow();
        match &data.kind {
            NodeKind::Text(text) => text.clone(),
            NodeKind::Comment(_) => String::new(),
            _ => data.children.iter().map(NodeRef::text_content).collect(),
        }
    }

    /// Serialized markup of this node.
    pub fn to_html(&self) -> String {
        html::serialize(self)
    }

    /// Serialized markup of the children.
    pub fn inner_html(&self) -> String {
        html::serialize_children(self)
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&NodeData) -> R) -> R {
        f(&self.0.borrow())
    }

    pub(crate) fn with_element_mut<R>(&self, f: impl FnOnce(&mut ElementData) -> R) -> Option<R> {
        match &mut self.0.borrow_mut().kind {
            NodeKind::Element(element) => Some(f(element)),
            _ => None,
        }
    }

    pub(crate) fn set_data(&self, text: &str) {
        match &mut self.0.borrow_mut().kind {
            NodeKind::Text(data) | NodeKind::Comment(data) => {
                data.clear();
                data.push_str(text);
            }
            _ => {}
        }
    }

    /// Remove this node from its current parent.
    pub(crate) fn detach(&self) {
        let parent = match self.parent() {
            Some(parent) => parent,
            None => return,
        };
        parent.0.borrow_mut().children.retain(|c| !c.ptr_eq(self));
        self.0.borrow_mut().parent = None;
    }

    /// Insert `node` before `reference` (or at the end). Fragments are
    /// emptied into the parent.
    pub(crate) fn insert_child(&self, node: &NodeRef, reference: Option<&NodeRef>) {
        if node.is_fragment() {
            let children = std::mem::take(&mut node.0.borrow_mut().children);
            for child in children {
                child.0.borrow_mut().parent = None;
                self.insert_child(&child, reference);
            }
            return;
        }
        if node.ptr_eq(self) {
            return;
        }
        node.detach();
        let mut data = self.0.borrow_mut();
        let index = reference
            .and_then(|r| data.children.iter().position(|c| c.ptr_eq(r)))
            .unwrap_or(data.children.len());
        data.children.insert(index, node.clone());
        node.0.borrow_mut().parent = Some(Rc::downgrade(&self.0));
    }

    pub(crate) fn remove_child_raw(&self, node: &NodeRef) {
        let mut data = self.0.borrow_mut();
        if let Some(index) = data.children.iter().position(|c| c.ptr_eq(node)) {
            data.children.remove(index);
            drop(data);
            node.0.borrow_mut().parent = None;
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.borrow().kind {
            NodeKind::Element(element) => write!(f, "<{}>", element.tag),
            NodeKind::Text(text) => write!(f, "#text({text:?})"),
            NodeKind::Comment(text) => write!(f, "<!--{text}-->"),
            NodeKind::Fragment => write!(f, "#fragment"),
        }
    }
}

impl ElementData {
    pub(crate) fn set_attribute(&mut self, name: &str, value: &str, namespace: Option<&str>) {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attribute) => attribute.value = value.to_string(),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
                value: value.to_string(),
            }),
        }
    }

    pub(crate) fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|a| a.name != name);
        before != self.attributes.len()
    }

    pub(crate) fn set_property(&mut self, name: &str, value: Prop) {
        if let Some(attribute) = reflected_attribute(name) {
            match &value {
                Prop::Text(text) => self.set_attribute(attribute, text, None),
                Prop::Flag(true) => self.set_attribute(attribute, "", None),
                Prop::Flag(false) => {
                    self.remove_attribute(attribute);
                }
            }
        }
        match self.properties.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.properties.push((name.to_string(), value)),
        }
    }
}

const GLOBAL_PROPERTIES: &[&str] = &[
    "id", "className", "title", "hidden", "lang", "dir", "tabIndex", "style",
];

const ELEMENT_PROPERTIES: &[(&str, &[&str])] = &[
    ("a", &["href", "target", "rel"]),
    ("area", &["href", "target"]),
    ("base", &["href", "target"]),
    ("body", &["background"]),
    ("button", &["disabled", "type", "name", "value", "form"]),
    ("embed", &["src", "type"]),
    ("fieldset", &["disabled", "form"]),
    ("form", &["action", "method", "name"]),
    ("iframe", &["src", "name"]),
    ("img", &["src", "alt", "width", "height"]),
    (
        "input",
        &[
            "value", "checked", "disabled", "type", "name", "placeholder", "form", "list",
            "autocorrect",
        ],
    ),
    ("label", &["form"]),
    ("legend", &["form"]),
    ("link", &["href", "rel"]),
    ("object", &["form", "data"]),
    ("option", &["selected", "value", "disabled", "form"]),
    ("select", &["value", "disabled", "name", "form"]),
    ("textarea", &["value", "disabled", "name", "placeholder", "form"]),
];

/// Property name an element exposes for `name`, if any. Checks the exact
/// name first, then its lowercase form.
pub fn property_for(tag: &str, name: &str) -> Option<&'static str> {
    let per_tag = ELEMENT_PROPERTIES
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, props)| *props)
        .unwrap_or(&[]);
    let lookup = |candidate: &str| {
        GLOBAL_PROPERTIES
            .iter()
            .chain(per_tag.iter())
            .find(|p| **p == candidate)
            .copied()
    };
    lookup(name).or_else(|| lookup(&name.to_ascii_lowercase()))
}

/// Attribute a property is reflected to. `value`, `checked` and `selected`
/// are live state and not reflected.
pub(crate) fn reflected_attribute(property: &str) -> Option<&'static str> {
    match property {
        "value" | "checked" | "selected" => None,
        "className" => Some("class"),
        "tabIndex" => Some("tabindex"),
        other => GLOBAL_PROPERTIES
            .iter()
            .chain(ELEMENT_PROPERTIES.iter().flat_map(|(_, props)| props.iter()))
            .find(|p| **p == other)
            .copied(),
    }
}

fn is_boolean_property(property: &str) -> bool {
    matches!(property, "checked" | "selected" | "disabled" | "hidden")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_siblings() {
        let parent = NodeRef::new_element("ul", None);
        let a = NodeRef::new_text("a");
        let b = NodeRef::new_text("b");
        let c = NodeRef::new_text("c");
        parent.insert_child(&a, None);
        parent.insert_child(&c, None);
        parent.insert_child(&b, Some(&c));

        assert_eq!(parent.text_content(), "abc");
        assert!(a.next_sibling().unwrap().ptr_eq(&b));
        assert!(c.previous_sibling().unwrap().ptr_eq(&b));
        assert!(c.next_sibling().is_none());
        assert!(b.parent().unwrap().ptr_eq(&parent));
    }

    #[test]
    fn test_fragment_insert_moves_children() {
        let parent = NodeRef::new_element("div", None);
        let fragment = NodeRef::new_fragment();
        fragment.insert_child(&NodeRef::new_text("x"), None);
        fragment.insert_child(&NodeRef::new_comment("y"), None);
        parent.insert_child(&fragment, None);

        assert_eq!(parent.child_count(), 2);
        assert_eq!(fragment.child_count(), 0);
        assert!(parent.last_child().unwrap().is_comment());
    }

    #[test]
    fn test_reinsert_moves_node() {
        let parent = NodeRef::new_element("div", None);
        let a = NodeRef::new_text("a");
        let b = NodeRef::new_text("b");
        parent.insert_child(&a, None);
        parent.insert_child(&b, None);
        parent.insert_child(&b, Some(&a));
        assert_eq!(parent.text_content(), "ba");
        assert_eq!(parent.child_count(), 2);
    }

    #[test]
    fn test_reflected_properties() {
        let input = NodeRef::new_element("input", None);
        input.with_element_mut(|e| e.set_property("disabled", Prop::Flag(true)));
        input.with_element_mut(|e| e.set_property("value", Prop::Text("typed".into())));
        assert_eq!(input.attribute("disabled").as_deref(), Some(""));
        assert_eq!(input.attribute("value"), None);
        assert_eq!(input.property("value"), Some(Prop::Text("typed".into())));

        input.with_element_mut(|e| e.set_property("disabled", Prop::Flag(false)));
        assert_eq!(input.attribute("disabled"), None);
    }

    #[test]
    fn test_property_lookup() {
        assert_eq!(property_for("input", "value"), Some("value"));
        assert_eq!(property_for("a", "href"), Some("href"));
        assert_eq!(property_for("div", "class"), None);
        assert_eq!(property_for("div", "ID"), Some("id"));
        assert_eq!(property_for("div", "data-foo"), None);
    }
}
