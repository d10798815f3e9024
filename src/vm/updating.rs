// The updating program. The append VM records, next to the DOM it builds, a tree of
// updating opcodes that know how to bring that DOM up to date. Opcodes live in an arena
// and are addressed by OpId; the lists they form (the root list and the children of every
// Try and ListBlock) are intrusive doubly linked lists over the arena, so reconciliation
// can splice an item block out of one position and into another in constant time without
// any owning back references.
//
// The UpdatingVM walks a list depth first. Every frame remembers the list it walks, the
// next opcode to run and who handles a BranchInvalidated raised while the frame is on top:
// a Try block re-executes itself, the root turns the signal into a render error, and a
// ListBlock frame has no handler. Frames advance before the current opcode runs, so a
// JumpIfNotModified can retarget the frame at its label.

//! Updating opcodes and the updating VM.

use super::block::{ListBlockOpcode, TryOpcode};
use crate::builder::{BlockTracker, DynamicAttribute, DynamicContent};
use crate::component::{Component, ComponentManager, ModifierInstance, ModifierManager};
use crate::core::{VmError, VmResult};
use crate::environment::Environment;
use crate::reference::{combine, ReferenceCache, ReferenceRef, Revalidation, Revision, Tag};
use crate::value::Value;
use crate::vm::DynamicScope;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A list of updating opcodes in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(usize);

/// An updating opcode in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(usize);

struct OpSlot {
    op: Rc<UpdatingOpcode>,
    list: Option<ListId>,
    prev: Option<OpId>,
    next: Option<OpId>,
}

#[derive(Default)]
struct ListHead {
    head: Option<OpId>,
    tail: Option<OpId>,
}

/// Storage for every updating opcode of an environment.
#[derive(Default)]
pub struct UpdatingArena {
    ops: Vec<Option<OpSlot>>,
    lists: Vec<Option<ListHead>>,
    free_ops: Vec<usize>,
    free_lists: Vec<usize>,
}

impl UpdatingArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_list(&mut self) -> ListId {
        match self.free_lists.pop() {
            Some(index) => {
                self.lists[index] = Some(ListHead::default());
                ListId(index)
            }
            None => {
                self.lists.push(Some(ListHead::default()));
                ListId(self.lists.len() - 1)
            }
        }
    }

    /// Store an opcode without linking it into any list.
    pub fn allocate(&mut self, op: UpdatingOpcode) -> OpId {
        let slot = OpSlot {
            op: Rc::new(op),
            list: None,
            prev: None,
            next: None,
        };
        match self.free_ops.pop() {
            Some(index) => {
                self.ops[index] = Some(slot);
                OpId(index)
            }
            None => {
                self.ops.push(Some(slot));
                OpId(self.ops.len() - 1)
            }
        }
    }

    fn slot(&self, id: OpId) -> Option<&OpSlot> {
        self.ops.get(id.0).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: OpId) -> Option<&mut OpSlot> {
        self.ops.get_mut(id.0).and_then(Option::as_mut)
    }

    fn list_mut(&mut self, list: ListId) -> Option<&mut ListHead> {
        self.lists.get_mut(list.0).and_then(Option::as_mut)
    }

    pub fn op(&self, id: OpId) -> Option<Rc<UpdatingOpcode>> {
        self.slot(id).map(|slot| slot.op.clone())
    }

    pub fn head(&self, list: ListId) -> Option<OpId> {
        self.lists.get(list.0)?.as_ref()?.head
    }

    pub fn tail(&self, list: ListId) -> Option<OpId> {
        self.lists.get(list.0)?.as_ref()?.tail
    }

    pub fn next(&self, id: OpId) -> Option<OpId> {
        self.slot(id)?.next
    }

    /// Ids of a list in order.
    pub fn ids(&self, list: ListId) -> Vec<OpId> {
        let mut ids = Vec::new();
        let mut cursor = self.head(list);
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.next(id);
        }
        ids
    }

    /// Opcodes of a list in order.
    pub fn ops(&self, list: ListId) -> Vec<Rc<UpdatingOpcode>> {
        self.ids(list)
            .into_iter()
            .filter_map(|id| self.op(id))
            .collect()
    }

    pub fn len(&self, list: ListId) -> usize {
        self.ids(list).len()
    }

    pub fn append(&mut self, list: ListId, id: OpId) {
        self.insert_before(list, id, None);
    }

    /// Link `id` into `list` before `reference`, or at the end.
    pub fn insert_before(&mut self, list: ListId, id: OpId, reference: Option<OpId>) {
        let prev = match reference {
            Some(reference) => self.slot(reference).and_then(|slot| slot.prev),
            None => self.tail(list),
        };
        if let Some(slot) = self.slot_mut(id) {
            slot.list = Some(list);
            slot.prev = prev;
            slot.next = reference;
        }
        match prev {
            Some(prev) => {
                if let Some(slot) = self.slot_mut(prev) {
                    slot.next = Some(id);
                }
            }
            None => {
                if let Some(head) = self.list_mut(list) {
                    head.head = Some(id);
                }
            }
        }
        match reference {
            Some(reference) => {
                if let Some(slot) = self.slot_mut(reference) {
                    slot.prev = Some(id);
                }
            }
            None => {
                if let Some(head) = self.list_mut(list) {
                    head.tail = Some(id);
                }
            }
        }
    }

    /// Unlink `id` from its list. The opcode stays allocated.
    pub fn remove(&mut self, id: OpId) {
        let Some((list, prev, next)) = self.slot(id).and_then(|s| Some((s.list?, s.prev, s.next)))
        else {
            return;
        };
        match prev {
            Some(prev) => {
                if let Some(slot) = self.slot_mut(prev) {
                    slot.next = next;
                }
            }
            None => {
                if let Some(head) = self.list_mut(list) {
                    head.head = next;
                }
            }
        }
        match next {
            Some(next) => {
                if let Some(slot) = self.slot_mut(next) {
                    slot.prev = prev;
                }
            }
            None => {
                if let Some(head) = self.list_mut(list) {
                    head.tail = prev;
                }
            }
        }
        if let Some(slot) = self.slot_mut(id) {
            slot.list = None;
            slot.prev = None;
            slot.next = None;
        }
    }

    /// Unlink and free an opcode and everything nested in it.
    pub fn free_op(&mut self, id: OpId) {
        self.remove(id);
        let child = self.slot(id).and_then(|slot| slot.op.child_list());
        if let Some(child) = child {
            self.free_list(child);
        }
        if let Some(slot) = self.ops.get_mut(id.0) {
            if slot.take().is_some() {
                self.free_ops.push(id.0);
            }
        }
    }

    /// Free every opcode of `list`, keeping the list itself.
    pub fn clear_list(&mut self, list: ListId) {
        for id in self.ids(list) {
            self.free_op(id);
        }
    }

    pub fn free_list(&mut self, list: ListId) {
        self.clear_list(list);
        if let Some(head) = self.lists.get_mut(list.0) {
            if head.take().is_some() {
                self.free_lists.push(list.0);
            }
        }
    }

    /// Live opcodes, for diagnostics.
    pub fn live_ops(&self) -> usize {
        self.ops.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Combined tag of a list's opcodes.
pub(crate) fn list_tag(arena: &UpdatingArena, list: ListId) -> Tag {
    combine(arena.ops(list).iter().map(|op| op.tag()))
}

/// Revision guard shared by a JumpIfNotModified and its DidModify.
pub struct CacheGuard {
    tag: Tag,
    last_revision: Cell<Revision>,
    target: OpId,
}

impl CacheGuard {
    pub fn new(tag: Tag, target: OpId) -> Rc<Self> {
        let last_revision = Cell::new(tag.value());
        Rc::new(Self {
            tag,
            last_revision,
            target,
        })
    }

    fn did_modify(&self) {
        self.last_revision.set(self.tag.value());
    }
}

pub struct UpdateAttribute {
    pub reference: ReferenceRef,
    pub attribute: RefCell<Box<dyn DynamicAttribute>>,
    pub last_value: RefCell<Value>,
}

pub struct UpdateModifier {
    pub tag: Tag,
    pub last_updated: Cell<Revision>,
    pub manager: Rc<dyn ModifierManager>,
    pub modifier: Rc<ModifierInstance>,
}

pub struct UpdateComponent {
    pub tag: Tag,
    pub name: Rc<str>,
    pub component: Component,
    pub manager: Rc<dyn ComponentManager>,
    pub dynamic_scope: DynamicScope,
}

pub struct DidUpdateLayout {
    pub manager: Rc<dyn ComponentManager>,
    pub component: Component,
    pub bounds: Rc<BlockTracker>,
}

pub enum UpdatingOpcode {
    /// A branch was taken on this value; a change re-runs the enclosing block.
    Assert(ReferenceCache),
    JumpIfNotModified(Rc<CacheGuard>),
    DidModify(Rc<CacheGuard>),
    Label,
    UpdateDynamicAttribute(UpdateAttribute),
    UpdateDynamicContent {
        reference: ReferenceRef,
        content: Rc<DynamicContent>,
        last_revision: Cell<Revision>,
    },
    UpdateModifier(UpdateModifier),
    UpdateComponent(UpdateComponent),
    DidUpdateLayout(DidUpdateLayout),
    Try(TryOpcode),
    ListBlock(ListBlockOpcode),
}

impl UpdatingOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            UpdatingOpcode::Assert(_) => "assert",
            UpdatingOpcode::JumpIfNotModified(_) => "jump-if-not-modified",
            UpdatingOpcode::DidModify(_) => "did-modify",
            UpdatingOpcode::Label => "label",
            UpdatingOpcode::UpdateDynamicAttribute(_) => "patch-element",
            UpdatingOpcode::UpdateDynamicContent { .. } => "update-content",
            UpdatingOpcode::UpdateModifier(_) => "update-modifier",
            UpdatingOpcode::UpdateComponent(_) => "update-component",
            UpdatingOpcode::DidUpdateLayout(_) => "did-update-layout",
            UpdatingOpcode::Try(_) => "try",
            UpdatingOpcode::ListBlock(_) => "list-block",
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            UpdatingOpcode::Assert(cache) => cache.tag(),
            UpdatingOpcode::JumpIfNotModified(guard) => guard.tag.clone(),
            UpdatingOpcode::DidModify(_)
            | UpdatingOpcode::Label
            | UpdatingOpcode::DidUpdateLayout(_) => Tag::Constant,
            UpdatingOpcode::UpdateDynamicAttribute(update) => update.reference.tag(),
            UpdatingOpcode::UpdateDynamicContent { reference, .. } => reference.tag(),
            UpdatingOpcode::UpdateModifier(update) => update.tag.clone(),
            UpdatingOpcode::UpdateComponent(update) => update.tag.clone(),
            UpdatingOpcode::Try(block) => block.tag(),
            UpdatingOpcode::ListBlock(block) => block.tag(),
        }
    }

    /// Rendered range of a block opcode.
    pub fn bounds(&self) -> Option<Rc<BlockTracker>> {
        match self {
            UpdatingOpcode::Try(block) => Some(block.bounds().clone()),
            UpdatingOpcode::ListBlock(block) => Some(block.bounds().clone()),
            _ => None,
        }
    }

    pub fn child_list(&self) -> Option<ListId> {
        match self {
            UpdatingOpcode::Try(block) => Some(block.children()),
            UpdatingOpcode::ListBlock(block) => Some(block.children()),
            _ => None,
        }
    }

    pub fn as_list_block(&self) -> Option<&ListBlockOpcode> {
        match self {
            UpdatingOpcode::ListBlock(block) => Some(block),
            _ => None,
        }
    }

    /// Called once the append VM has filled the children of a block opcode.
    pub fn did_initialize_children(&self, arena: &UpdatingArena) {
        match self {
            UpdatingOpcode::Try(block) => block.did_initialize_children(arena),
            UpdatingOpcode::ListBlock(block) => block.did_initialize_children(arena, true),
            _ => {}
        }
    }

    pub fn evaluate(&self, vm: &mut UpdatingVM, id: OpId) -> VmResult<()> {
        log::trace!("update {} {:?}", self.name(), id);
        match self {
            UpdatingOpcode::Assert(cache) => match cache.revalidate() {
                Revalidation::NotModified => Ok(()),
                Revalidation::Modified(_) => Err(VmError::BranchInvalidated),
            },
            UpdatingOpcode::JumpIfNotModified(guard) => {
                if !vm.always_revalidate && guard.tag.validate(guard.last_revision.get()) {
                    vm.goto(guard.target);
                }
                Ok(())
            }
            UpdatingOpcode::DidModify(guard) => {
                guard.did_modify();
                Ok(())
            }
            UpdatingOpcode::Label => Ok(()),
            UpdatingOpcode::UpdateDynamicAttribute(update) => {
                let value = update.reference.value();
                if update.last_value.borrow().identical(&value) {
                    return Ok(());
                }
                update
                    .attribute
                    .borrow_mut()
                    .update(&value, vm.env.dom().as_ref());
                *update.last_value.borrow_mut() = value;
                Ok(())
            }
            UpdatingOpcode::UpdateDynamicContent {
                reference,
                content,
                last_revision,
            } => {
                let tag = reference.tag();
                if tag.validate(last_revision.get()) {
                    return Ok(());
                }
                content.update(&reference.value());
                last_revision.set(tag.value());
                Ok(())
            }
            UpdatingOpcode::UpdateModifier(update) => {
                if !update.tag.validate(update.last_updated.get()) {
                    vm.env
                        .schedule_update_modifier(update.modifier.clone(), update.manager.clone());
                    update.last_updated.set(update.tag.value());
                }
                Ok(())
            }
            UpdatingOpcode::UpdateComponent(update) => {
                log::trace!("update component {}", update.name);
                update.manager.update(&update.component, &update.dynamic_scope);
                Ok(())
            }
            UpdatingOpcode::DidUpdateLayout(update) => {
                update.manager.did_update_layout(&update.component, &update.bounds);
                vm.env.did_update(update.component.clone(), update.manager.clone());
                Ok(())
            }
            UpdatingOpcode::Try(block) => {
                vm.enter(block.children(), FrameHandler::Try(id));
                Ok(())
            }
            UpdatingOpcode::ListBlock(block) => block.evaluate(vm),
        }
    }
}

/// Who handles a branch invalidation raised inside a frame.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FrameHandler {
    Root,
    Try(OpId),
    None,
}

struct Frame {
    current: Option<OpId>,
    handler: FrameHandler,
}

/// Re-walks recorded updating opcodes.
pub struct UpdatingVM {
    pub(crate) env: Rc<Environment>,
    frames: Vec<Frame>,
    always_revalidate: bool,
}

impl UpdatingVM {
    pub fn new(env: Rc<Environment>, always_revalidate: bool) -> Self {
        Self {
            env,
            frames: Vec::new(),
            always_revalidate,
        }
    }

    pub(crate) fn enter(&mut self, list: ListId, handler: FrameHandler) {
        let current = self.env.arena().borrow().head(list);
        self.frames.push(Frame { current, handler });
    }

    fn goto(&mut self, target: OpId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.current = Some(target);
        }
    }

    fn next_statement(&mut self) -> Option<Option<(OpId, Rc<UpdatingOpcode>)>> {
        let frame = self.frames.last_mut()?;
        let arena = self.env.arena().borrow();
        let Some(id) = frame.current else {
            return Some(None);
        };
        frame.current = arena.next(id);
        Some(arena.op(id).map(|op| (id, op)))
    }

    pub(crate) fn execute(&mut self, list: ListId, handler: FrameHandler) -> VmResult<()> {
        self.enter(list, handler);
        while let Some(next) = self.next_statement() {
            let Some((id, op)) = next else {
                self.frames.pop();
                continue;
            };
            match op.evaluate(self, id) {
                Ok(()) => {}
                Err(VmError::BranchInvalidated) => self.throw()?,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn throw(&mut self) -> VmResult<()> {
        let Some(frame) = self.frames.pop() else {
            return Err(VmError::BranchInvalidated);
        };
        match frame.handler {
            FrameHandler::Root => Err(VmError::BranchInvalidated),
            FrameHandler::None => Ok(()),
            FrameHandler::Try(id) => {
                let op = self.env.arena().borrow().op(id);
                match op.as_deref() {
                    Some(UpdatingOpcode::Try(block)) => block.handle_exception(&self.env, id),
                    _ => Err(VmError::MissingFrame { what: "try block" }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(arena: &mut UpdatingArena, list: ListId, count: usize) -> Vec<OpId> {
        (0..count)
            .map(|_| {
                let id = arena.allocate(UpdatingOpcode::Label);
                arena.append(list, id);
                id
            })
            .collect()
    }

    #[test]
    fn test_append_and_insert_before() {
        let mut arena = UpdatingArena::new();
        let list = arena.new_list();
        let ids = labels(&mut arena, list, 2);
        let front = arena.allocate(UpdatingOpcode::Label);
        arena.insert_before(list, front, Some(ids[0]));

        assert_eq!(arena.ids(list), vec![front, ids[0], ids[1]]);
        assert_eq!(arena.head(list), Some(front));
        assert_eq!(arena.tail(list), Some(ids[1]));
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let mut arena = UpdatingArena::new();
        let list = arena.new_list();
        let ids = labels(&mut arena, list, 3);

        arena.remove(ids[1]);
        assert_eq!(arena.ids(list), vec![ids[0], ids[2]]);
        arena.remove(ids[2]);
        assert_eq!(arena.tail(list), Some(ids[0]));
        arena.remove(ids[0]);
        assert_eq!(arena.head(list), None);
        assert!(arena.op(ids[1]).is_some());
    }

    #[test]
    fn test_move_to_end() {
        let mut arena = UpdatingArena::new();
        let list = arena.new_list();
        let ids = labels(&mut arena, list, 3);
        arena.remove(ids[0]);
        arena.insert_before(list, ids[0], None);
        assert_eq!(arena.ids(list), vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn test_free_reuses_slots() {
        let mut arena = UpdatingArena::new();
        let list = arena.new_list();
        let ids = labels(&mut arena, list, 2);
        arena.clear_list(list);
        assert_eq!(arena.len(list), 0);
        assert_eq!(arena.live_ops(), 0);
        assert!(arena.op(ids[0]).is_none());

        let again = arena.allocate(UpdatingOpcode::Label);
        assert!(ids.contains(&again));
    }

    #[test]
    fn test_cache_guard_tracks_revision() {
        let clock = crate::reference::RevisionClock::new();
        let dirty = crate::reference::DirtyableTag::new(&clock);
        let guard = CacheGuard::new(dirty.tag(), OpId(0));
        assert!(guard.tag.validate(guard.last_revision.get()));
        dirty.dirty();
        assert!(!guard.tag.validate(guard.last_revision.get()));
        guard.did_modify();
        assert!(guard.tag.validate(guard.last_revision.get()));
    }
}
