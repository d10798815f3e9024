// The element builder is the append VM's only way of touching the DOM. It keeps a stack
// of cursors (the element being filled and the sibling new nodes go before) and a stack of
// block trackers that record which nodes each block produced. How nodes are obtained is
// delegated to a BuildStrategy chosen from the render mode: appending creates them,
// serializing creates them and adds marker comments, rehydrating adopts the nodes a
// server already rendered.
//
// An element is built in two steps. `open_element` produces the node and makes it the
// element under construction so attributes can be written to it; `flush_element` inserts
// it, makes it the new cursor and records it in the current block. Updates after the
// first render always build with the appending strategy, through `resume` for Try blocks
// and `for_initial_render` for new list items.

//! DOM construction for the append VM.

pub mod attribute;
pub mod content;
pub mod rehydrate;
pub mod strategy;
pub mod tracker;

pub use attribute::DynamicAttribute;
pub use content::DynamicContent;
pub use rehydrate::RehydrateStrategy;
pub use strategy::{AppendStrategy, BuildStrategy, Position, SerializeStrategy};
pub use tracker::{BlockTracker, Destroyable};

use crate::core::{RenderMode, VmError, VmResult};
use crate::dom::{Bounds, ConcreteBounds, DomOperations, NodeRef, Prop};
use crate::value::Value;
use crate::vm::updating::{ListId, UpdatingArena};
use std::cell::RefCell;
use std::rc::Rc;

struct Cursor {
    element: NodeRef,
    next_sibling: Option<NodeRef>,
}

fn position<'a>(dom: &'a dyn DomOperations, cursors: &'a [Cursor]) -> VmResult<Position<'a>> {
    let cursor = cursors.last().ok_or(VmError::MissingFrame {
        what: "element cursor",
    })?;
    Ok(Position {
        dom,
        element: &cursor.element,
        next_sibling: cursor.next_sibling.as_ref(),
    })
}

pub struct ElementBuilder {
    dom: Rc<dyn DomOperations>,
    cursors: Vec<Cursor>,
    blocks: Vec<Rc<BlockTracker>>,
    constructing: Option<NodeRef>,
    strategy: Box<dyn BuildStrategy>,
}

impl ElementBuilder {
    pub fn new(
        dom: Rc<dyn DomOperations>,
        parent: NodeRef,
        next_sibling: Option<NodeRef>,
        mode: RenderMode,
    ) -> VmResult<Self> {
        let strategy: Box<dyn BuildStrategy> = match mode {
            RenderMode::Append => Box::new(AppendStrategy),
            RenderMode::Serialize => Box::new(SerializeStrategy::default()),
            RenderMode::Rehydrate => {
                Box::new(RehydrateStrategy::new(&parent, next_sibling.as_ref())?)
            }
        };
        Ok(Self {
            dom,
            cursors: vec![Cursor {
                element: parent,
                next_sibling,
            }],
            blocks: Vec::new(),
            constructing: None,
            strategy,
        })
    }

    /// Builder with a root simple block already open.
    pub fn for_initial_render(
        dom: Rc<dyn DomOperations>,
        parent: NodeRef,
        next_sibling: Option<NodeRef>,
        mode: RenderMode,
    ) -> VmResult<Self> {
        let mut builder = Self::new(dom, parent, next_sibling, mode)?;
        builder.push_simple_block()?;
        Ok(builder)
    }

    /// Builder that refills `tracker` in front of `next_sibling`.
    pub fn resume(
        dom: Rc<dyn DomOperations>,
        tracker: Rc<BlockTracker>,
        next_sibling: Option<NodeRef>,
    ) -> VmResult<Self> {
        let parent = tracker.parent_element();
        let mut builder = Self::new(dom, parent, next_sibling, RenderMode::Append)?;
        builder.push_simple_block()?;
        builder.push_block_tracker(tracker, false)?;
        Ok(builder)
    }

    pub fn dom(&self) -> &Rc<dyn DomOperations> {
        &self.dom
    }

    /// Element currently receiving children.
    pub fn element(&self) -> VmResult<&NodeRef> {
        self.cursors
            .last()
            .map(|cursor| &cursor.element)
            .ok_or(VmError::MissingFrame {
                what: "element cursor",
            })
    }

    pub fn block(&self) -> VmResult<&Rc<BlockTracker>> {
        self.blocks.last().ok_or(VmError::MissingFrame { what: "block" })
    }

    pub fn push_simple_block(&mut self) -> VmResult<Rc<BlockTracker>> {
        let tracker = BlockTracker::simple(self.element()?.clone());
        self.push_block_tracker(tracker, false)
    }

    pub fn push_updatable_block(&mut self) -> VmResult<Rc<BlockTracker>> {
        let tracker = BlockTracker::updatable(self.element()?.clone());
        self.push_block_tracker(tracker, false)
    }

    pub fn push_block_list(
        &mut self,
        list: ListId,
        arena: &Rc<RefCell<UpdatingArena>>,
    ) -> VmResult<Rc<BlockTracker>> {
        let tracker = BlockTracker::list(self.element()?.clone(), list, arena);
        self.push_block_tracker(tracker, false)
    }

    fn push_block_tracker(
        &mut self,
        tracker: Rc<BlockTracker>,
        remote: bool,
    ) -> VmResult<Rc<BlockTracker>> {
        if let Some(current) = self.blocks.last() {
            current.new_destroyable(tracker.clone());
            if !remote {
                current.did_append_bounds(tracker.clone());
            }
        }
        let at = position(self.dom.as_ref(), &self.cursors)?;
        self.strategy.open_block(&at);
        self.blocks.push(tracker.clone());
        Ok(tracker)
    }

    pub fn pop_block(&mut self) -> VmResult<Rc<BlockTracker>> {
        if self.block()?.needs_placeholder() {
            self.append_comment("")?;
        }
        let at = position(self.dom.as_ref(), &self.cursors)?;
        self.strategy.close_block(&at);
        self.blocks
            .pop()
            .ok_or(VmError::MissingFrame { what: "block" })
    }

    pub fn open_element(&mut self, tag: &str) -> VmResult<NodeRef> {
        let at = position(self.dom.as_ref(), &self.cursors)?;
        let element = self.strategy.open_element(&at, tag);
        self.constructing = Some(element.clone());
        Ok(element)
    }

    pub fn constructing(&self) -> VmResult<&NodeRef> {
        self.constructing.as_ref().ok_or(VmError::MissingFrame {
            what: "element under construction",
        })
    }

    pub fn set_static_attribute(
        &mut self,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) -> VmResult<()> {
        self.set_constructing_attribute(name, value, namespace)
    }

    pub(crate) fn set_constructing_attribute(
        &mut self,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) -> VmResult<()> {
        let element = self.constructing.as_ref().ok_or(VmError::MissingFrame {
            what: "element under construction",
        })?;
        self.strategy
            .set_attribute(self.dom.as_ref(), element, name, value, namespace);
        Ok(())
    }

    pub(crate) fn set_constructing_property(&mut self, name: &str, value: Prop) -> VmResult<()> {
        let element = self.constructing.as_ref().ok_or(VmError::MissingFrame {
            what: "element under construction",
        })?;
        self.strategy
            .set_property(self.dom.as_ref(), element, name, value);
        Ok(())
    }

    /// Write `value` through the strategy picked for `name` and return it
    /// for later updates.
    pub fn set_dynamic_attribute(
        &mut self,
        name: &str,
        value: &Value,
        namespace: Option<&str>,
    ) -> VmResult<Box<dyn DynamicAttribute>> {
        let element = self.constructing()?.clone();
        let mut attribute = attribute::dynamic_attribute_for(&element, name, namespace);
        attribute.set(self, value)?;
        Ok(attribute)
    }

    pub fn flush_element(&mut self) -> VmResult<()> {
        let element = self.constructing.take().ok_or(VmError::MissingFrame {
            what: "element under construction",
        })?;
        let at = position(self.dom.as_ref(), &self.cursors)?;
        self.strategy.flush_element(&at, &element);
        self.block()?.open_element(&element);
        self.cursors.push(Cursor {
            element,
            next_sibling: None,
        });
        Ok(())
    }

    pub fn close_element(&mut self) -> VmResult<()> {
        if self.cursors.len() <= 1 {
            return Err(VmError::MissingFrame {
                what: "open element",
            });
        }
        self.strategy.will_close_element(self.dom.as_ref());
        self.block()?.close_element();
        self.cursors.pop();
        Ok(())
    }

    /// Render into `element` instead of the current position until
    /// [`pop_remote_element`](Self::pop_remote_element).
    pub fn push_remote_element(
        &mut self,
        element: NodeRef,
        next_sibling: Option<NodeRef>,
    ) -> VmResult<()> {
        if !self.strategy.supports_remote_elements() {
            return Err(VmError::Unsupported {
                reason: "remote elements while rehydrating".into(),
            });
        }
        self.cursors.push(Cursor {
            element: element.clone(),
            next_sibling,
        });
        let tracker = BlockTracker::remote(element, self.dom.clone());
        self.push_block_tracker(tracker, true)?;
        Ok(())
    }

    pub fn pop_remote_element(&mut self) -> VmResult<()> {
        self.pop_block()?;
        self.cursors.pop();
        Ok(())
    }

    pub fn append_text(&mut self, text: &str) -> VmResult<NodeRef> {
        let at = position(self.dom.as_ref(), &self.cursors)?;
        let node = self.strategy.append_text(&at, text);
        self.block()?.did_append_node(&node);
        Ok(node)
    }

    pub fn append_comment(&mut self, text: &str) -> VmResult<NodeRef> {
        let at = position(self.dom.as_ref(), &self.cursors)?;
        let node = self.strategy.append_comment(&at, text);
        self.block()?.did_append_node(&node);
        Ok(node)
    }

    pub fn append_html(&mut self, html: &str) -> VmResult<Rc<ConcreteBounds>> {
        let at = position(self.dom.as_ref(), &self.cursors)?;
        let bounds = Rc::new(self.strategy.append_html(&at, html));
        self.block()?.did_append_bounds(bounds.clone());
        Ok(bounds)
    }

    pub fn append_trusting_dynamic_content(&mut self, value: &Value) -> VmResult<Rc<DynamicContent>> {
        self.append_dynamic_content(value, true)
    }

    pub fn append_cautious_dynamic_content(&mut self, value: &Value) -> VmResult<Rc<DynamicContent>> {
        self.append_dynamic_content(value, false)
    }

    fn append_dynamic_content(&mut self, value: &Value, trusting: bool) -> VmResult<Rc<DynamicContent>> {
        let at = position(self.dom.as_ref(), &self.cursors)?;
        let content =
            DynamicContent::build(self.dom.clone(), self.strategy.as_mut(), &at, value, trusting);
        self.block()?.did_append_bounds(content.clone());
        Ok(content)
    }

    pub fn new_destroyable(&self, destroyable: Rc<dyn Destroyable>) -> VmResult<()> {
        self.block()?.new_destroyable(destroyable);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn builder(mode: RenderMode) -> (Rc<Document>, NodeRef, ElementBuilder) {
        let doc = Rc::new(Document::new());
        let root = doc.create_element("div", None);
        let builder = ElementBuilder::for_initial_render(doc.clone(), root.clone(), None, mode)
            .expect("builder");
        (doc, root, builder)
    }

    #[test]
    fn test_elements_and_text() {
        let (_, root, mut builder) = builder(RenderMode::Append);
        builder.open_element("p").unwrap();
        builder.set_static_attribute("class", "intro", None).unwrap();
        builder.flush_element().unwrap();
        builder.append_text("hello").unwrap();
        builder.close_element().unwrap();
        let block = builder.pop_block().unwrap();

        assert_eq!(root.inner_html(), "<p class=\"intro\">hello</p>");
        assert!(block.first_node().unwrap().ptr_eq(&root.first_child().unwrap()));
        assert!(block.last_node().unwrap().ptr_eq(&root.first_child().unwrap()));
    }

    #[test]
    fn test_empty_block_gets_placeholder() {
        let (_, root, mut builder) = builder(RenderMode::Append);
        builder.push_simple_block().unwrap();
        let inner = builder.pop_block().unwrap();
        assert!(inner.first_node().unwrap().is_comment());
        assert_eq!(root.inner_html(), "<!---->");
    }

    #[test]
    fn test_serialize_wraps_blocks() {
        let (_, root, mut builder) = builder(RenderMode::Serialize);
        builder.append_text("x").unwrap();
        builder.pop_block().unwrap();
        assert_eq!(root.inner_html(), "<!--%+block:0%-->x<!--%-block:0%-->");
    }

    #[test]
    fn test_remote_element() {
        let (doc, root, mut builder) = builder(RenderMode::Append);
        let portal = doc.create_element("section", None);
        builder.push_remote_element(portal.clone(), None).unwrap();
        builder.append_text("away").unwrap();
        builder.pop_remote_element().unwrap();
        builder.append_text("here").unwrap();
        let block = builder.pop_block().unwrap();

        assert_eq!(portal.inner_html(), "away");
        assert_eq!(root.inner_html(), "here");
        block.destroy();
        assert_eq!(portal.child_count(), 0);
    }

    #[test]
    fn test_dynamic_attribute_sanitizes() {
        let (_, root, mut builder) = builder(RenderMode::Append);
        let link = builder.open_element("a").unwrap();
        builder
            .set_dynamic_attribute("href", &Value::from("javascript:alert(1)"), None)
            .unwrap();
        builder.flush_element().unwrap();
        builder.close_element().unwrap();

        assert_eq!(
            link.attribute("href").as_deref(),
            Some("unsafe:javascript:alert(1)")
        );
        assert_eq!(root.child_count(), 1);
    }

    #[test]
    fn test_close_without_open_element() {
        let (_, _, mut builder) = builder(RenderMode::Append);
        assert!(matches!(
            builder.close_element(),
            Err(VmError::MissingFrame { .. })
        ));
    }
}
