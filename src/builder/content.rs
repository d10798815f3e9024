//! Dynamic content: the `{{value}}` and `{{{value}}}` insertion points.
//!
//! A [`DynamicContent`] remembers what kind of content it inserted. Updates
//! that keep the kind patch in place (only a text node's data changes);
//! updates that change it clear the range and build the content again.

use super::strategy::{AppendStrategy, BuildStrategy, Position};
use crate::dom::bounds::clear;
use crate::dom::{Bounds, ConcreteBounds, DomOperations, NodeRef};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

enum ContentKind {
    Text(String),
    Node(NodeRef),
    Html(Rc<str>),
    TrustedHtml(String),
}

struct ContentState {
    kind: ContentKind,
    bounds: ConcreteBounds,
}

pub struct DynamicContent {
    dom: Rc<dyn DomOperations>,
    trusting: bool,
    state: RefCell<ContentState>,
}

/// Display string used for text and trusted HTML; nullish values are empty.
pub fn normalize(value: &Value) -> String {
    if value.is_nullish() {
        String::new()
    } else {
        value.to_display_string()
    }
}

fn normalize_trusted(value: &Value) -> String {
    match value {
        Value::SafeString(html) => html.to_string(),
        other => normalize(other),
    }
}

fn insert(
    strategy: &mut dyn BuildStrategy,
    at: &Position,
    value: &Value,
    trusting: bool,
) -> ContentState {
    let parent = at.element.clone();
    if let Value::Node(node) = value {
        if node.is_fragment() {
            let bounds = match (node.first_child(), node.last_child()) {
                (Some(first), Some(last)) => {
                    strategy.append_node(at, node);
                    ConcreteBounds::new(parent, first, last)
                }
                _ => ConcreteBounds::single(parent, strategy.append_comment(at, "")),
            };
            return ContentState {
                kind: ContentKind::Node(node.clone()),
                bounds,
            };
        }
        strategy.append_node(at, node);
        return ContentState {
            kind: ContentKind::Node(node.clone()),
            bounds: ConcreteBounds::single(parent, node.clone()),
        };
    }

    if trusting {
        let html = normalize_trusted(value);
        let bounds = strategy.append_html(at, &html);
        return ContentState {
            kind: ContentKind::TrustedHtml(html),
            bounds,
        };
    }

    if let Value::SafeString(html) = value {
        let bounds = strategy.append_html(at, html);
        return ContentState {
            kind: ContentKind::Html(html.clone()),
            bounds,
        };
    }

    let text = normalize(value);
    let node = strategy.append_text(at, &text);
    ContentState {
        kind: ContentKind::Text(text),
        bounds: ConcreteBounds::single(parent, node),
    }
}

impl DynamicContent {
    pub(crate) fn build(
        dom: Rc<dyn DomOperations>,
        strategy: &mut dyn BuildStrategy,
        at: &Position,
        value: &Value,
        trusting: bool,
    ) -> Rc<Self> {
        let state = insert(strategy, at, value, trusting);
        Rc::new(Self {
            dom,
            trusting,
            state: RefCell::new(state),
        })
    }

    pub fn update(&self, value: &Value) {
        let keep = {
            let mut state = self.state.borrow_mut();
            let ContentState { kind, bounds } = &mut *state;
            match kind {
                ContentKind::Text(last) => match value {
                    Value::Node(_) | Value::SafeString(_) => false,
                    other => {
                        let text = normalize(other);
                        if text != *last {
                            self.dom.set_text(&bounds.first, &text);
                            *last = text;
                        }
                        true
                    }
                },
                ContentKind::Node(last) => matches!(value, Value::Node(node) if node.ptr_eq(last)),
                ContentKind::Html(last) => {
                    matches!(value, Value::SafeString(html) if **html == **last)
                }
                ContentKind::TrustedHtml(last) => {
                    !matches!(value, Value::Node(_)) && normalize_trusted(value) == *last
                }
            }
        };
        if !keep {
            self.retry(value);
        }
    }

    /// Throw the current content away and insert `value` where it was.
    fn retry(&self, value: &Value) {
        let parent = self.parent_element();
        let next = clear(self.dom.as_ref(), self);
        let at = Position {
            dom: self.dom.as_ref(),
            element: &parent,
            next_sibling: next.as_ref(),
        };
        let state = insert(&mut AppendStrategy, &at, value, self.trusting);
        *self.state.borrow_mut() = state;
    }
}

impl Bounds for DynamicContent {
    fn parent_element(&self) -> NodeRef {
        self.state.borrow().bounds.parent.clone()
    }

    fn first_node(&self) -> Option<NodeRef> {
        Some(self.state.borrow().bounds.first.clone())
    }

    fn last_node(&self) -> Option<NodeRef> {
        Some(self.state.borrow().bounds.last.clone())
    }
}
