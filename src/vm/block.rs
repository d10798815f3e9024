//! Re-executable blocks: Try and ListBlock updating opcodes.
//!
//! A Try block remembers where its bytecode starts and the VM state it was
//! entered with, so a failed branch assertion inside it can throw its DOM away
//! and run the same bytecode again. A ListBlock owns one Try per list item and
//! reconciles them against the iterable when the iterable's tag moves.

use super::append::AppendVM;
use super::stack::StackValue;
use super::updating::{list_tag, FrameHandler, ListId, OpId, UpdatingArena, UpdatingVM};
use super::{DynamicScope, Scope};
use crate::builder::{BlockTracker, ElementBuilder};
use crate::core::{RenderMode, VmError, VmResult};
use crate::dom::bounds::{clear, move_bounds};
use crate::dom::{Bounds, NodeRef};
use crate::environment::Environment;
use crate::reference::{
    combine, ItemRefs, IterationArtifacts, IteratorSynchronizer, Revision, SyncTarget, Tag,
    UpdatableTag,
};
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What a block needs to run its bytecode again.
#[derive(Clone)]
pub struct VmState {
    pub scope: Scope,
    pub dynamic_scope: DynamicScope,
    pub stack: Vec<StackValue>,
}

impl VmState {
    /// Captured stack with every iterator rewound to an unconsumed copy.
    pub(crate) fn restore_stack(&self) -> Vec<StackValue> {
        self.stack
            .iter()
            .map(|value| match value {
                StackValue::Iterator(iterator) => StackValue::Iterator(Rc::new(iterator.restart())),
                other => other.clone(),
            })
            .collect()
    }
}

pub struct TryOpcode {
    start: u32,
    state: VmState,
    bounds: Rc<BlockTracker>,
    children: ListId,
    tag: Rc<UpdatableTag>,
}

impl TryOpcode {
    pub(crate) fn new(
        env: &Environment,
        start: u32,
        state: VmState,
        bounds: Rc<BlockTracker>,
        children: ListId,
    ) -> Self {
        Self {
            start,
            state,
            bounds,
            children,
            tag: UpdatableTag::new(env.clock(), Tag::Constant),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag.tag()
    }

    pub fn bounds(&self) -> &Rc<BlockTracker> {
        &self.bounds
    }

    pub fn children(&self) -> ListId {
        self.children
    }

    pub(crate) fn did_initialize_children(&self, arena: &UpdatingArena) {
        self.tag.update(list_tag(arena, self.children));
    }

    /// Discard the rendered subtree and run the block again in place.
    pub(crate) fn handle_exception(&self, env: &Rc<Environment>, id: OpId) -> VmResult<()> {
        log::debug!("branch invalidated, re-executing block {id:?}");
        // List trackers read their range through the arena, so reset first.
        let next = self.bounds.reset(env);
        env.arena().borrow_mut().clear_list(self.children);

        let builder = ElementBuilder::resume(env.dom().clone(), self.bounds.clone(), next)?;
        let mut vm = AppendVM::new(
            env.clone(),
            self.state.scope.clone(),
            self.state.dynamic_scope.clone(),
            builder,
        );
        let stack = self.state.restore_stack();
        vm.execute(self.start, |vm| {
            vm.restore_stack(stack);
            vm.enter_detached(id)
        })?;
        Ok(())
    }
}

pub struct ListBlockOpcode {
    start: u32,
    state: VmState,
    bounds: Rc<BlockTracker>,
    children: ListId,
    artifacts: Rc<IterationArtifacts>,
    map: RefCell<HashMap<String, OpId>>,
    last_iterated: Cell<Revision>,
    inner: Rc<UpdatableTag>,
    tag: Tag,
}

impl ListBlockOpcode {
    pub(crate) fn new(
        env: &Environment,
        start: u32,
        state: VmState,
        bounds: Rc<BlockTracker>,
        children: ListId,
        artifacts: Rc<IterationArtifacts>,
    ) -> Self {
        let inner = UpdatableTag::new(env.clock(), Tag::Constant);
        let tag = combine([artifacts.tag(), inner.tag()]);
        Self {
            start,
            state,
            bounds,
            children,
            last_iterated: Cell::new(artifacts.tag().value()),
            artifacts,
            map: RefCell::new(HashMap::new()),
            inner,
            tag,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag.clone()
    }

    pub fn bounds(&self) -> &Rc<BlockTracker> {
        &self.bounds
    }

    pub fn children(&self) -> ListId {
        self.children
    }

    /// Item block rendered for `key`.
    pub fn item(&self, key: &str) -> Option<OpId> {
        self.map.borrow().get(key).copied()
    }

    pub(crate) fn register_item(&self, key: &str, id: OpId) {
        self.map.borrow_mut().insert(key.to_string(), id);
    }

    pub(crate) fn did_initialize_children(&self, arena: &UpdatingArena, changed: bool) {
        self.last_iterated.set(self.artifacts.tag().value());
        if changed {
            self.inner.update(list_tag(arena, self.children));
        }
    }

    pub(crate) fn evaluate(&self, vm: &mut UpdatingVM) -> VmResult<()> {
        if !self.artifacts.tag().validate(self.last_iterated.get()) {
            let env = vm.env.clone();
            let dom = env.dom().clone();
            let parent = self.bounds.parent_element();
            let last = self.bounds.last_node().ok_or_else(|| VmError::Unsupported {
                reason: "reconciling a list block that rendered no items".into(),
            })?;
            let marker = dom.create_comment("");
            dom.insert_before(&parent, &marker, last.next_sibling().as_ref());

            let mut reconciler = ListReconciler {
                block: self,
                env: &env,
                marker: &marker,
                did_insert: false,
                did_delete: false,
            };
            let synced = IteratorSynchronizer::new(self.artifacts.clone(), &mut reconciler)
                .and_then(|synchronizer| synchronizer.sync());
            if let Some(actual) = marker.parent() {
                dom.remove_child(&actual, &marker);
            }
            synced?;
        }
        vm.enter(self.children, FrameHandler::None);
        Ok(())
    }
}

/// Applies reconciliation operations to the DOM and the item blocks.
struct ListReconciler<'a> {
    block: &'a ListBlockOpcode,
    env: &'a Rc<Environment>,
    marker: &'a NodeRef,
    did_insert: bool,
    did_delete: bool,
}

impl ListReconciler<'_> {
    fn item_bounds(&self, id: OpId) -> Option<Rc<BlockTracker>> {
        let op = self.env.arena().borrow().op(id);
        op.and_then(|op| op.bounds())
    }

    /// Block and first node the item keyed `before` starts at, or the marker.
    fn reference(&self, before: Option<&str>) -> (Option<OpId>, Option<NodeRef>) {
        match before.and_then(|key| self.block.item(key)) {
            Some(id) => {
                let node = self
                    .item_bounds(id)
                    .and_then(|bounds| bounds.first_node())
                    .or_else(|| Some(self.marker.clone()));
                (Some(id), node)
            }
            None => (None, Some(self.marker.clone())),
        }
    }
}

impl SyncTarget for ListReconciler<'_> {
    fn retain(&mut self, _item: &ItemRefs) -> VmResult<()> {
        Ok(())
    }

    fn insert(&mut self, item: &ItemRefs, before: Option<&str>) -> VmResult<()> {
        log::debug!("list insert {} before {:?}", item.key, before);
        let (reference, next) = self.reference(before);
        let builder = ElementBuilder::for_initial_render(
            self.env.dom().clone(),
            self.block.bounds.parent_element(),
            next,
            RenderMode::Append,
        )?;
        let mut vm = AppendVM::new(
            self.env.clone(),
            self.block.state.scope.clone(),
            self.block.state.dynamic_scope.clone(),
            builder,
        );

        let mut inserted = None;
        vm.execute(self.block.start, |vm| {
            let id = vm.iterate(item.memo_ref(), item.value_ref())?;
            inserted = Some(id);
            vm.enter_detached(id)
        })?;

        let id = inserted.ok_or(VmError::MissingFrame { what: "list item" })?;
        self.env
            .arena()
            .borrow_mut()
            .insert_before(self.block.children, id, reference);
        self.block.register_item(&item.key, id);
        self.did_insert = true;
        Ok(())
    }

    fn move_item(&mut self, item: &ItemRefs, before: Option<&str>) -> VmResult<()> {
        log::debug!("list move {} before {:?}", item.key, before);
        let Some(id) = self.block.item(&item.key) else {
            return Ok(());
        };
        let (reference, next) = self.reference(before);
        if let Some(bounds) = self.item_bounds(id) {
            move_bounds(self.env.dom().as_ref(), bounds.as_ref(), next.as_ref());
        }
        let mut arena = self.env.arena().borrow_mut();
        arena.remove(id);
        arena.insert_before(self.block.children, id, reference);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> VmResult<()> {
        log::debug!("list delete {key}");
        let Some(id) = self.block.map.borrow_mut().remove(key) else {
            return Ok(());
        };
        if let Some(bounds) = self.item_bounds(id) {
            self.env.did_destroy(bounds.clone());
            clear(self.env.dom().as_ref(), bounds.as_ref());
        }
        self.env.arena().borrow_mut().free_op(id);
        self.did_delete = true;
        Ok(())
    }

    fn done(&mut self) -> VmResult<()> {
        let arena = self.env.arena().borrow();
        self.block
            .did_initialize_children(&arena, self.did_insert || self.did_delete);
        Ok(())
    }
}
