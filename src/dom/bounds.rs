//! Contiguous ranges of sibling nodes.

use super::document::DomOperations;
use super::node::NodeRef;

/// A parent node plus the first and last child delimiting a rendered range.
pub trait Bounds {
    fn parent_element(&self) -> NodeRef;
    fn first_node(&self) -> Option<NodeRef>;
    fn last_node(&self) -> Option<NodeRef>;
}

/// Bounds with fixed endpoints.
#[derive(Clone, Debug)]
pub struct ConcreteBounds {
    pub parent: NodeRef,
    pub first: NodeRef,
    pub last: NodeRef,
}

impl ConcreteBounds {
    pub fn new(parent: NodeRef, first: NodeRef, last: NodeRef) -> Self {
        Self {
            parent,
            first,
            last,
        }
    }

    pub fn single(parent: NodeRef, node: NodeRef) -> Self {
        Self {
            parent,
            first: node.clone(),
            last: node,
        }
    }
}

impl Bounds for ConcreteBounds {
    fn parent_element(&self) -> NodeRef {
        self.parent.clone()
    }

    fn first_node(&self) -> Option<NodeRef> {
        Some(self.first.clone())
    }

    fn last_node(&self) -> Option<NodeRef> {
        Some(self.last.clone())
    }
}

/// Nodes of a range, first to last. Stops early if the range is broken.
pub fn nodes_of(bounds: &dyn Bounds) -> Vec<NodeRef> {
    let (first, last) = match (bounds.first_node(), bounds.last_node()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Vec::new(),
    };
    let mut nodes = Vec::new();
    let mut current = Some(first);
    while let Some(node) = current {
        let done = node.ptr_eq(&last);
        current = node.next_sibling();
        nodes.push(node);
        if done {
            break;
        }
    }
    nodes
}

/// Remove every node of the range; returns the sibling that followed it.
pub fn clear(dom: &dyn DomOperations, bounds: &dyn Bounds) -> Option<NodeRef> {
    let parent = bounds.parent_element();
    let next = bounds.last_node().and_then(|last| last.next_sibling());
    for node in nodes_of(bounds) {
        if let Some(actual) = node.parent() {
            if actual.ptr_eq(&parent) {
                dom.remove_child(&parent, &node);
            } else {
                dom.remove_child(&actual, &node);
            }
        }
    }
    next
}

/// Move every node of the range before `reference`.
pub fn move_bounds(dom: &dyn DomOperations, bounds: &dyn Bounds, reference: Option<&NodeRef>) {
    let parent = bounds.parent_element();
    for node in nodes_of(bounds) {
        dom.insert_before(&parent, &node, reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn test_clear_returns_next_sibling() {
        let document = Document::new();
        let div = document.element_with_html("div", "a<b>b</b>c<i>d</i>");
        let children = div.children();
        let bounds = ConcreteBounds::new(div.clone(), children[1].clone(), children[2].clone());

        let next = clear(&document, &bounds).unwrap();
        assert!(next.ptr_eq(&children[3]));
        assert_eq!(div.inner_html(), "a<i>d</i>");
    }

    #[test]
    fn test_move_bounds() {
        let document = Document::new();
        let div = document.element_with_html("div", "<i>1</i><i>2</i><i>3</i>");
        let children = div.children();
        let bounds = ConcreteBounds::new(div.clone(), children[1].clone(), children[2].clone());

        move_bounds(&document, &bounds, Some(&children[0]));
        assert_eq!(div.inner_html(), "<i>2</i><i>3</i><i>1</i>");
    }
}
