// Rehydration walks markup that a serializing render produced and adopts its nodes instead
// of creating new ones. Each open element has a cursor holding the candidate: the next
// server node expected to match. Text and comments are reused in place (their data is
// rewritten when it differs), elements are adopted when the tag matches, and attributes
// the server rendered but the client no longer sets are removed at flush time.
//
// Block markers bound the damage of a mismatch. Every block opened by the client must
// find `%+block:N%` at the candidate, where N is the block depth; when something else is
// found, the unexpected nodes are removed up to the close marker of the innermost block
// that is still open, and the client then builds fresh nodes from there. Close markers of
// enclosing blocks are invisible to content matching, so a block whose server output ran
// short simply gets fresh nodes inserted before its parent's close marker.

//! Rehydrating build strategy.

use super::strategy::{
    create_element, insert_html, insert_text, BuildStrategy, Position, EMPTY_MARKER,
    GLIMMER_MARKER, SEPARATOR_MARKER,
};
use crate::core::{VmError, VmResult};
use crate::dom::node::reflected_attribute;
use crate::dom::{ConcreteBounds, DomOperations, NodeRef, Prop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Open(usize),
    Close(usize),
    Separator,
    Empty,
    Html,
}

fn marker(node: &NodeRef) -> Option<Marker> {
    if !node.is_comment() {
        return None;
    }
    let data = node.data()?;
    match data.as_str() {
        SEPARATOR_MARKER => return Some(Marker::Separator),
        EMPTY_MARKER => return Some(Marker::Empty),
        GLIMMER_MARKER => return Some(Marker::Html),
        _ => {}
    }
    let depth = |rest: &str| rest.strip_suffix('%')?.parse::<usize>().ok();
    if let Some(rest) = data.strip_prefix("%+block:") {
        return depth(rest).map(Marker::Open);
    }
    if let Some(rest) = data.strip_prefix("%-block:") {
        return depth(rest).map(Marker::Close);
    }
    None
}

struct Cursor {
    candidate: Option<NodeRef>,
    /// Block depth when the element was opened; blocks at or above it are
    /// nested inside the element.
    starting_depth: usize,
}

struct PendingElement {
    element: NodeRef,
    rehydrated: bool,
    unmatched: Vec<String>,
}

pub struct RehydrateStrategy {
    cursors: Vec<Cursor>,
    block_depth: usize,
    pending: Option<PendingElement>,
}

impl RehydrateStrategy {
    pub fn new(parent: &NodeRef, next_sibling: Option<&NodeRef>) -> VmResult<Self> {
        if next_sibling.is_some() {
            return Err(VmError::Unsupported {
                reason: "rehydration into a parent with a next sibling".into(),
            });
        }
        Ok(Self {
            cursors: vec![Cursor {
                candidate: parent.first_child(),
                starting_depth: 0,
            }],
            block_depth: 0,
            pending: None,
        })
    }

    fn cursor(&self) -> Option<&Cursor> {
        self.cursors.last()
    }

    fn raw_candidate(&self) -> Option<NodeRef> {
        self.cursor().and_then(|c| c.candidate.clone())
    }

    fn set_candidate(&mut self, candidate: Option<NodeRef>) {
        if let Some(cursor) = self.cursors.last_mut() {
            cursor.candidate = candidate;
        }
    }

    /// The candidate as content sees it: close markers of blocks still open
    /// inside the current element read as the end of the content.
    fn candidate(&self) -> Option<NodeRef> {
        let cursor = self.cursor()?;
        let node = cursor.candidate.clone()?;
        match marker(&node) {
            Some(Marker::Close(depth))
                if depth >= cursor.starting_depth && depth < self.block_depth =>
            {
                None
            }
            _ => Some(node),
        }
    }

    /// Take the candidate out of the document and advance past it.
    fn remove_candidate(&mut self, dom: &dyn DomOperations) {
        if let Some(node) = self.raw_candidate() {
            self.set_candidate(node.next_sibling());
            if let Some(parent) = node.parent() {
                dom.remove_child(&parent, &node);
            }
        }
    }

    fn advance(&mut self) {
        let next = self.raw_candidate().and_then(|node| node.next_sibling());
        self.set_candidate(next);
    }

    /// Innermost open block nested in the current element, if any.
    fn content_limit(&self) -> Option<usize> {
        let starting = self.cursor().map(|c| c.starting_depth).unwrap_or(0);
        self.block_depth.checked_sub(1).filter(|depth| *depth >= starting)
    }

    /// Remove server nodes that do not fit, stopping at the close marker of
    /// block `limit` (or of any block enclosing it inside this element).
    fn clear_mismatch(&mut self, dom: &dyn DomOperations, limit: Option<usize>) {
        let starting = self.cursor().map(|c| c.starting_depth).unwrap_or(0);
        while let Some(node) = self.raw_candidate() {
            if let (Some(limit), Some(Marker::Close(depth))) = (limit, marker(&node)) {
                if depth >= starting && depth <= limit {
                    break;
                }
            }
            log::debug!("rehydrate: discarding mismatched {node:?}");
            self.remove_candidate(dom);
        }
    }

    fn fresh_position<'a>(at: &Position<'a>, candidate: Option<&'a NodeRef>) -> Position<'a> {
        Position {
            dom: at.dom,
            element: at.element,
            next_sibling: candidate,
        }
    }
}

impl BuildStrategy for RehydrateStrategy {
    fn open_block(&mut self, at: &Position) {
        let depth = self.block_depth;
        match self.raw_candidate().as_ref().and_then(marker) {
            Some(Marker::Open(found)) if found == depth => self.remove_candidate(at.dom),
            _ => {
                let enclosing = self.content_limit();
                self.clear_mismatch(at.dom, enclosing);
            }
        }
        self.block_depth += 1;
    }

    fn close_block(&mut self, at: &Position) {
        self.block_depth = self.block_depth.saturating_sub(1);
        let depth = self.block_depth;
        let found = match self.raw_candidate() {
            Some(node) => marker(&node),
            None => return,
        };
        match found {
            Some(Marker::Close(d)) if d == depth => self.remove_candidate(at.dom),
            Some(Marker::Close(d)) if d < depth => {}
            _ => {
                self.clear_mismatch(at.dom, Some(depth));
                if self.raw_candidate().as_ref().and_then(marker) == Some(Marker::Close(depth)) {
                    self.remove_candidate(at.dom);
                }
            }
        }
    }

    fn append_text(&mut self, at: &Position, text: &str) -> NodeRef {
        while let Some(node) = self.candidate() {
            if node.is_text() {
                if node.data().as_deref() != Some(text) {
                    at.dom.set_text(&node, text);
                }
                self.advance();
                return node;
            }
            match marker(&node) {
                Some(Marker::Separator) => self.remove_candidate(at.dom),
                Some(Marker::Empty) => {
                    self.remove_candidate(at.dom);
                    break;
                }
                _ => {
                    let limit = self.content_limit();
                    self.clear_mismatch(at.dom, limit);
                    break;
                }
            }
        }
        let candidate = self.raw_candidate();
        insert_text(&Self::fresh_position(at, candidate.as_ref()), text)
    }

    fn append_comment(&mut self, at: &Position, text: &str) -> NodeRef {
        if let Some(node) = self.candidate() {
            if node.is_comment() && marker(&node).is_none() {
                if node.data().as_deref() != Some(text) {
                    at.dom.set_text(&node, text);
                }
                self.advance();
                return node;
            }
            let limit = self.content_limit();
            self.clear_mismatch(at.dom, limit);
        }
        let candidate = self.raw_candidate();
        let position = Self::fresh_position(at, candidate.as_ref());
        let node = at.dom.create_comment(text);
        at.dom.insert_before(position.element, &node, position.next_sibling);
        node
    }

    /// Nodes supplied by the caller cannot be adopted; server copies of them
    /// are dropped when their markup matches.
    fn append_node(&mut self, at: &Position, node: &NodeRef) {
        let incoming = if node.is_fragment() {
            node.children()
        } else {
            vec![node.clone()]
        };
        for expected in &incoming {
            match self.candidate() {
                Some(candidate) if candidate.to_html() == expected.to_html() => {
                    self.remove_candidate(at.dom)
                }
                _ => break,
            }
        }
        let candidate = self.raw_candidate();
        at.dom.insert_before(at.element, node, candidate.as_ref());
    }

    fn append_html(&mut self, at: &Position, html: &str) -> ConcreteBounds {
        if let Some(open) = self.candidate() {
            if marker(&open) == Some(Marker::Html) {
                let mut inner = Vec::new();
                let mut current = open.next_sibling();
                while let Some(node) = current.clone() {
                    if marker(&node) == Some(Marker::Html) {
                        break;
                    }
                    current = node.next_sibling();
                    inner.push(node);
                }
                // `current` is the closing marker, if the server emitted one.
                self.remove_candidate(at.dom);
                let close = current;
                let after = close.as_ref().and_then(|c| c.next_sibling());
                if let Some(close) = close {
                    if let Some(parent) = close.parent() {
                        at.dom.remove_child(&parent, &close);
                    }
                }
                self.set_candidate(after);
                return match (inner.first(), inner.last()) {
                    (Some(first), Some(last)) => {
                        ConcreteBounds::new(at.element.clone(), first.clone(), last.clone())
                    }
                    _ => {
                        let candidate = self.raw_candidate();
                        insert_html(&Self::fresh_position(at, candidate.as_ref()), "")
                    }
                };
            }
            let limit = self.content_limit();
            self.clear_mismatch(at.dom, limit);
        }
        let candidate = self.raw_candidate();
        insert_html(&Self::fresh_position(at, candidate.as_ref()), html)
    }

    fn open_element(&mut self, at: &Position, tag: &str) -> NodeRef {
        if let Some(node) = self.candidate() {
            let matches = node
                .tag_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(tag));
            if matches {
                self.advance();
                let unmatched = node.attributes().into_iter().map(|a| a.name).collect();
                self.pending = Some(PendingElement {
                    element: node.clone(),
                    rehydrated: true,
                    unmatched,
                });
                return node;
            }
            let limit = self.content_limit();
            self.clear_mismatch(at.dom, limit);
        }
        let element = create_element(at, tag);
        self.pending = Some(PendingElement {
            element: element.clone(),
            rehydrated: false,
            unmatched: Vec::new(),
        });
        element
    }

    fn set_attribute(
        &mut self,
        dom: &dyn DomOperations,
        element: &NodeRef,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) {
        if let Some(pending) = self.pending.as_mut().filter(|p| p.element.ptr_eq(element)) {
            pending.unmatched.retain(|n| n != name);
            if pending.rehydrated && element.attribute(name).as_deref() == Some(value) {
                return;
            }
        }
        dom.set_attribute(element, name, value, namespace);
    }

    fn set_property(&mut self, dom: &dyn DomOperations, element: &NodeRef, name: &str, value: Prop) {
        if let Some(pending) = self.pending.as_mut().filter(|p| p.element.ptr_eq(element)) {
            let attribute = reflected_attribute(name).unwrap_or(name);
            pending
                .unmatched
                .retain(|n| !n.eq_ignore_ascii_case(attribute));
            if pending.rehydrated && element.property(name).as_ref() == Some(&value) {
                return;
            }
        }
        dom.set_property(element, name, value);
    }

    fn flush_element(&mut self, at: &Position, element: &NodeRef) {
        let pending = self.pending.take().filter(|p| p.element.ptr_eq(element));
        let rehydrated = match pending {
            Some(PendingElement {
                rehydrated: true,
                unmatched,
                ..
            }) => {
                for name in unmatched {
                    at.dom.remove_attribute(element, &name, None);
                }
                true
            }
            _ => {
                let candidate = self.raw_candidate();
                at.dom.insert_before(at.element, element, candidate.as_ref());
                false
            }
        };
        self.cursors.push(Cursor {
            candidate: if rehydrated { element.first_child() } else { None },
            starting_depth: self.block_depth,
        });
    }

    fn will_close_element(&mut self, dom: &dyn DomOperations) {
        self.clear_mismatch(dom, None);
        self.cursors.pop();
    }

    fn supports_remote_elements(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn position<'a>(doc: &'a Document, element: &'a NodeRef) -> Position<'a> {
        Position {
            dom: doc,
            element,
            next_sibling: None,
        }
    }

    #[test]
    fn test_marker_parsing() {
        let doc = Document::new();
        assert_eq!(marker(&doc.create_comment("%+block:2%")), Some(Marker::Open(2)));
        assert_eq!(marker(&doc.create_comment("%-block:0%")), Some(Marker::Close(0)));
        assert_eq!(marker(&doc.create_comment("%sep%")), Some(Marker::Separator));
        assert_eq!(marker(&doc.create_comment("%+block:x%")), None);
        assert_eq!(marker(&doc.create_text("%sep%")), None);
    }

    #[test]
    fn test_adopts_matching_nodes() {
        let doc = Document::new();
        let root = doc.element_with_html(
            "div",
            "<!--%+block:0%--><p class=\"a\">hi</p><!--%-block:0%-->",
        );
        let paragraph = root.children()[1].clone();
        let text = paragraph.first_child().unwrap();
        let mut strategy = RehydrateStrategy::new(&root, None).unwrap();
        let at = position(&doc, &root);
        let before = doc.mutation_count();

        strategy.open_block(&at);
        let element = strategy.open_element(&at, "p");
        strategy.set_attribute(&doc, &element, "class", "a", None);
        strategy.flush_element(&at, &element);
        let inner_at = position(&doc, &element);
        let adopted = strategy.append_text(&inner_at, "hi");
        strategy.will_close_element(&doc);
        strategy.close_block(&at);

        assert!(element.ptr_eq(&paragraph));
        assert!(adopted.ptr_eq(&text));
        assert_eq!(root.inner_html(), "<p class=\"a\">hi</p>");
        // Only the two block markers were removed.
        assert_eq!(doc.mutation_count() - before, 2);
    }

    #[test]
    fn test_mismatch_is_cleared_to_block_end() {
        let doc = Document::new();
        let root = doc.element_with_html(
            "div",
            "<!--%+block:0%--><span>old</span><i>x</i><!--%-block:0%-->",
        );
        let mut strategy = RehydrateStrategy::new(&root, None).unwrap();
        let at = position(&doc, &root);

        strategy.open_block(&at);
        strategy.append_text(&at, "new");
        strategy.close_block(&at);

        assert_eq!(root.inner_html(), "new");
    }

    #[test]
    fn test_unmatched_attributes_are_removed() {
        let doc = Document::new();
        let root = doc.element_with_html("div", "<input type=\"text\" disabled=\"\">");
        let mut strategy = RehydrateStrategy::new(&root, None).unwrap();
        let at = position(&doc, &root);

        let input = strategy.open_element(&at, "input");
        strategy.set_attribute(&doc, &input, "type", "text", None);
        strategy.flush_element(&at, &input);
        strategy.will_close_element(&doc);

        assert_eq!(input.attribute("type").as_deref(), Some("text"));
        assert_eq!(input.attribute("disabled"), None);
    }

    #[test]
    fn test_next_sibling_is_unsupported() {
        let doc = Document::new();
        let root = doc.element_with_html("div", "<b></b>");
        let next = root.first_child().unwrap();
        assert!(RehydrateStrategy::new(&root, Some(&next)).is_err());
    }
}
