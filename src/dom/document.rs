//! The DOM operations capability and the in-memory document implementing it.

use super::html;
use super::node::{NodeRef, Prop};
use std::cell::Cell;

/// Node creation and mutation primitives the builders rely on.
///
/// Creation is free of side effects on the live tree; everything else is a
/// mutation.
pub trait DomOperations {
    fn create_element(&self, tag: &str, namespace: Option<&str>) -> NodeRef;
    fn create_text(&self, text: &str) -> NodeRef;
    fn create_comment(&self, text: &str) -> NodeRef;
    fn create_fragment(&self) -> NodeRef;

    fn insert_before(&self, parent: &NodeRef, node: &NodeRef, reference: Option<&NodeRef>);
    fn remove_child(&self, parent: &NodeRef, node: &NodeRef);

    fn set_attribute(&self, element: &NodeRef, name: &str, value: &str, namespace: Option<&str>);
    fn remove_attribute(&self, element: &NodeRef, name: &str, namespace: Option<&str>);
    fn set_property(&self, element: &NodeRef, name: &str, value: Prop);

    /// Replace the character data of a text or comment node.
    fn set_text(&self, node: &NodeRef, text: &str);

    /// Parse `html` and insert the resulting nodes before `reference`.
    /// Returns the first and last inserted node, or `None` for empty markup.
    fn insert_html_before(
        &self,
        parent: &NodeRef,
        reference: Option<&NodeRef>,
        html: &str,
    ) -> Option<(NodeRef, NodeRef)>;
}

/// In-memory document that counts mutations.
#[derive(Default)]
pub struct Document {
    mutations: Cell<usize>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations performed so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.get()
    }

    /// Parse markup into a detached fragment without counting mutations.
    pub fn parse_html(&self, markup: &str) -> NodeRef {
        html::parse_fragment(markup)
    }

    /// Detached element whose children are parsed from `markup`.
    pub fn element_with_html(&self, tag: &str, markup: &str) -> NodeRef {
        let element = NodeRef::new_element(tag, None);
        element.insert_child(&html::parse_fragment(markup), None);
        element
    }

    fn record(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }
}

impl DomOperations for Document {
    fn create_element(&self, tag: &str, namespace: Option<&str>) -> NodeRef {
        NodeRef::new_element(tag, namespace)
    }

    fn create_text(&self, text: &str) -> NodeRef {
        NodeRef::new_text(text)
    }

    fn create_comment(&self, text: &str) -> NodeRef {
        NodeRef::new_comment(text)
    }

    fn create_fragment(&self) -> NodeRef {
        NodeRef::new_fragment()
    }

    fn insert_before(&self, parent: &NodeRef, node: &NodeRef, reference: Option<&NodeRef>) {
        self.record();
        parent.insert_child(node, reference);
    }

    fn remove_child(&self, parent: &NodeRef, node: &NodeRef) {
        self.record();
        parent.remove_child_raw(node);
    }

    fn set_attribute(&self, element: &NodeRef, name: &str, value: &str, namespace: Option<&str>) {
        self.record();
        element.with_element_mut(|e| e.set_attribute(name, value, namespace));
    }

    fn remove_attribute(&self, element: &NodeRef, name: &str, _namespace: Option<&str>) {
        self.record();
        element.with_element_mut(|e| e.remove_attribute(name));
    }

    fn set_property(&self, element: &NodeRef, name: &str, value: Prop) {
        self.record();
        element.with_element_mut(|e| e.set_property(name, value));
    }

    fn set_text(&self, node: &NodeRef, text: &str) {
        self.record();
        node.set_data(text);
    }

    fn insert_html_before(
        &self,
        parent: &NodeRef,
        reference: Option<&NodeRef>,
        markup: &str,
    ) -> Option<(NodeRef, NodeRef)> {
        let fragment = html::parse_fragment(markup);
        let first = fragment.first_child()?;
        let last = fragment.last_child()?;
        for child in fragment.children() {
            self.insert_before(parent, &child, reference);
        }
        Some((first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_are_counted() {
        let document = Document::new();
        let div = document.create_element("div", None);
        let text = document.create_text("hi");
        assert_eq!(document.mutation_count(), 0);

        document.insert_before(&div, &text, None);
        document.set_attribute(&div, "id", "x", None);
        document.set_text(&text, "bye");
        assert_eq!(document.mutation_count(), 3);
        assert_eq!(div.to_html(), r#"<div id="x">bye</div>"#);
    }

    #[test]
    fn test_insert_html_before() {
        let document = Document::new();
        let div = document.element_with_html("div", "<span>end</span>");
        let end = div.first_child().unwrap();
        let (first, last) = document
            .insert_html_before(&div, Some(&end), "<b>a</b>text")
            .unwrap();
        assert_eq!(first.tag_name().as_deref(), Some("b"));
        assert!(last.is_text());
        assert_eq!(div.inner_html(), "<b>a</b>text<span>end</span>");
        assert!(document.insert_html_before(&div, None, "").is_none());
    }
}
