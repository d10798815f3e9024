//! Node construction strategies.
//!
//! The element builder owns the cursor and block-tracker stacks; a strategy
//! decides how each node actually comes into being. Fresh rendering uses
//! the defaults, which create nodes and insert them at the cursor. The
//! serializing strategy adds marker comments around blocks, raw HTML and
//! adjacent text. The rehydrating strategy (see `rehydrate`) reuses nodes
//! a server already produced.

use crate::dom::{ConcreteBounds, DomOperations, NodeRef, Prop, SVG_NAMESPACE};

/// Where the next node goes.
#[derive(Clone, Copy)]
pub struct Position<'a> {
    pub dom: &'a dyn DomOperations,
    pub element: &'a NodeRef,
    pub next_sibling: Option<&'a NodeRef>,
}

pub trait BuildStrategy {
    fn open_block(&mut self, _at: &Position) {}

    fn close_block(&mut self, _at: &Position) {}

    fn append_text(&mut self, at: &Position, text: &str) -> NodeRef {
        insert_text(at, text)
    }

    fn append_comment(&mut self, at: &Position, text: &str) -> NodeRef {
        insert_comment(at, text)
    }

    fn append_node(&mut self, at: &Position, node: &NodeRef) {
        at.dom.insert_before(at.element, node, at.next_sibling);
    }

    fn append_html(&mut self, at: &Position, html: &str) -> ConcreteBounds {
        insert_html(at, html)
    }

    /// Element for `tag`; it is not inserted until `flush_element`.
    fn open_element(&mut self, at: &Position, tag: &str) -> NodeRef {
        create_element(at, tag)
    }

    fn set_attribute(
        &mut self,
        dom: &dyn DomOperations,
        element: &NodeRef,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) {
        dom.set_attribute(element, name, value, namespace);
    }

    fn set_property(&mut self, dom: &dyn DomOperations, element: &NodeRef, name: &str, value: Prop) {
        dom.set_property(element, name, value);
    }

    fn flush_element(&mut self, at: &Position, element: &NodeRef) {
        at.dom.insert_before(at.element, element, at.next_sibling);
    }

    fn will_close_element(&mut self, _dom: &dyn DomOperations) {}

    fn supports_remote_elements(&self) -> bool {
        true
    }
}

pub fn insert_text(at: &Position, text: &str) -> NodeRef {
    let node = at.dom.create_text(text);
    at.dom.insert_before(at.element, &node, at.next_sibling);
    node
}

pub fn insert_comment(at: &Position, text: &str) -> NodeRef {
    let node = at.dom.create_comment(text);
    at.dom.insert_before(at.element, &node, at.next_sibling);
    node
}

/// Insert parsed markup. Empty markup leaves an empty comment so the range
/// still has a position.
pub fn insert_html(at: &Position, html: &str) -> ConcreteBounds {
    match at.dom.insert_html_before(at.element, at.next_sibling, html) {
        Some((first, last)) => ConcreteBounds::new(at.element.clone(), first, last),
        None => {
            let placeholder = insert_comment(at, "");
            ConcreteBounds::single(at.element.clone(), placeholder)
        }
    }
}

pub fn create_element(at: &Position, tag: &str) -> NodeRef {
    at.dom.create_element(tag, namespace_for(at.element, tag))
}

/// `<svg>` starts the SVG namespace; children of SVG elements stay in it
/// except below `<foreignObject>`.
fn namespace_for(parent: &NodeRef, tag: &str) -> Option<&'static str> {
    if tag.eq_ignore_ascii_case("svg") {
        return Some(SVG_NAMESPACE);
    }
    let parent_is_svg = parent.namespace().as_deref() == Some(SVG_NAMESPACE);
    let parent_tag = parent.tag_name().unwrap_or_default();
    if parent_is_svg && !parent_tag.eq_ignore_ascii_case("foreignObject") {
        Some(SVG_NAMESPACE)
    } else {
        None
    }
}

/// Plain DOM construction.
#[derive(Default)]
pub struct AppendStrategy;

impl BuildStrategy for AppendStrategy {}

pub(crate) const GLIMMER_MARKER: &str = "%glimmer%";
pub(crate) const SEPARATOR_MARKER: &str = "%sep%";
pub(crate) const EMPTY_MARKER: &str = "%empty%";

/// Fresh construction plus the markers a later rehydration consumes.
#[derive(Default)]
pub struct SerializeStrategy {
    depth: usize,
}

impl BuildStrategy for SerializeStrategy {
    fn open_block(&mut self, at: &Position) {
        insert_comment(at, &format!("%+block:{}%", self.depth));
        self.depth += 1;
    }

    fn close_block(&mut self, at: &Position) {
        self.depth = self.depth.saturating_sub(1);
        insert_comment(at, &format!("%-block:{}%", self.depth));
    }

    fn append_text(&mut self, at: &Position, text: &str) -> NodeRef {
        if text.is_empty() {
            insert_comment(at, EMPTY_MARKER);
            return insert_text(at, text);
        }
        let previous = match at.next_sibling {
            Some(next) => next.previous_sibling(),
            None => at.element.last_child(),
        };
        if previous.is_some_and(|node| node.is_text()) {
            insert_comment(at, SEPARATOR_MARKER);
        }
        insert_text(at, text)
    }

    fn append_html(&mut self, at: &Position, html: &str) -> ConcreteBounds {
        let open = insert_comment(at, GLIMMER_MARKER);
        insert_html(at, html);
        let close = insert_comment(at, GLIMMER_MARKER);
        ConcreteBounds::new(at.element.clone(), open, close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::html::serialize_children;
    use crate::dom::Document;

    fn at<'a>(doc: &'a Document, element: &'a NodeRef) -> Position<'a> {
        Position {
            dom: doc,
            element,
            next_sibling: None,
        }
    }

    #[test]
    fn test_svg_namespace_propagates() {
        let doc = Document::new();
        let root = doc.create_element("div", None);
        let svg = create_element(&at(&doc, &root), "svg");
        assert_eq!(svg.namespace().as_deref(), Some(SVG_NAMESPACE));

        let circle = create_element(&at(&doc, &svg), "circle");
        assert_eq!(circle.namespace().as_deref(), Some(SVG_NAMESPACE));

        let foreign = doc.create_element("foreignObject", Some(SVG_NAMESPACE));
        let div = create_element(&at(&doc, &foreign), "div");
        assert_eq!(div.namespace(), None);
    }

    #[test]
    fn test_empty_html_leaves_a_placeholder() {
        let doc = Document::new();
        let root = doc.create_element("div", None);
        let bounds = AppendStrategy.append_html(&at(&doc, &root), "");
        assert!(bounds.first.is_comment());
        assert_eq!(root.child_count(), 1);
    }

    #[test]
    fn test_serialize_markers() {
        let doc = Document::new();
        let root = doc.create_element("div", None);
        let mut strategy = SerializeStrategy::default();
        let position = at(&doc, &root);

        strategy.open_block(&position);
        strategy.append_text(&position, "a");
        strategy.append_text(&position, "b");
        strategy.append_text(&position, "");
        strategy.append_html(&position, "<b>x</b>");
        strategy.close_block(&position);

        assert_eq!(
            serialize_children(&root),
            "<!--%+block:0%-->a<!--%sep%-->b<!--%empty%--><!--%glimmer%--><b>x</b><!--%glimmer%--><!--%-block:0%-->"
        );
    }
}
