// Block trackers own the bounds of one block of rendered output and the resources
// registered while that block was being built. The builder keeps a stack of them; every
// node or nested bounds appended at element nesting depth zero extends the tracker's
// first/last range, so the range is computed lazily from child activity instead of being
// stored as a node pair up front.
//
// Four kinds exist. Simple trackers back plain blocks and component layouts. Remote
// trackers back `-in-element` and clear their range when destroyed. Updatable trackers
// back Try blocks and can be reset for re-execution. List trackers back `each`: their
// range is whatever the first and last item blocks currently span, read through the
// updating arena, so they never record nodes themselves.

//! Bounds tracking for blocks of rendered output.

use crate::dom::bounds::clear;
use crate::dom::{Bounds, DomOperations, NodeRef};
use crate::environment::Environment;
use crate::vm::updating::{ListId, UpdatingArena};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Something that must be torn down with the block that registered it.
pub trait Destroyable {
    fn destroy(&self);

    /// Called as soon as teardown is scheduled, while everything this
    /// destroyable reaches is still alive.
    fn will_destroy(&self) {}
}

/// One end of a tracked range: a node, or the end of nested bounds.
#[derive(Clone)]
pub enum BoundsRef {
    Node(NodeRef),
    Bounds(Rc<dyn Bounds>),
}

impl BoundsRef {
    fn first_node(&self) -> Option<NodeRef> {
        match self {
            BoundsRef::Node(node) => Some(node.clone()),
            BoundsRef::Bounds(bounds) => bounds.first_node(),
        }
    }

    fn last_node(&self) -> Option<NodeRef> {
        match self {
            BoundsRef::Node(node) => Some(node.clone()),
            BoundsRef::Bounds(bounds) => bounds.last_node(),
        }
    }
}

enum TrackerKind {
    Simple,
    Remote(Rc<dyn DomOperations>),
    Updatable,
    List {
        list: ListId,
        arena: Weak<RefCell<UpdatingArena>>,
    },
}

pub struct BlockTracker {
    kind: TrackerKind,
    parent: NodeRef,
    first: RefCell<Option<BoundsRef>>,
    last: RefCell<Option<BoundsRef>>,
    destroyables: RefCell<Vec<Rc<dyn Destroyable>>>,
    nesting: Cell<usize>,
}

impl BlockTracker {
    fn with_kind(parent: NodeRef, kind: TrackerKind) -> Rc<Self> {
        Rc::new(Self {
            kind,
            parent,
            first: RefCell::new(None),
            last: RefCell::new(None),
            destroyables: RefCell::new(Vec::new()),
            nesting: Cell::new(0),
        })
    }

    pub fn simple(parent: NodeRef) -> Rc<Self> {
        Self::with_kind(parent, TrackerKind::Simple)
    }

    pub fn remote(parent: NodeRef, dom: Rc<dyn DomOperations>) -> Rc<Self> {
        Self::with_kind(parent, TrackerKind::Remote(dom))
    }

    pub fn updatable(parent: NodeRef) -> Rc<Self> {
        Self::with_kind(parent, TrackerKind::Updatable)
    }

    /// Tracker whose range spans the item blocks of `list`.
    pub fn list(parent: NodeRef, list: ListId, arena: &Rc<RefCell<UpdatingArena>>) -> Rc<Self> {
        Self::with_kind(
            parent,
            TrackerKind::List {
                list,
                arena: Rc::downgrade(arena),
            },
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, TrackerKind::List { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, TrackerKind::Remote(_))
    }

    /// An element opened at depth zero becomes part of the range; nodes
    /// appended inside it do not.
    pub fn open_element(&self, element: &NodeRef) {
        if self.is_list() {
            return;
        }
        self.did_append_node(element);
        self.nesting.set(self.nesting.get() + 1);
    }

    pub fn close_element(&self) {
        if self.is_list() {
            return;
        }
        self.nesting.set(self.nesting.get().saturating_sub(1));
    }

    pub fn did_append_node(&self, node: &NodeRef) {
        self.did_append(BoundsRef::Node(node.clone()));
    }

    pub fn did_append_bounds(&self, bounds: Rc<dyn Bounds>) {
        self.did_append(BoundsRef::Bounds(bounds));
    }

    fn did_append(&self, end: BoundsRef) {
        if self.is_list() || self.nesting.get() != 0 {
            return;
        }
        let mut first = self.first.borrow_mut();
        if first.is_none() {
            *first = Some(end.clone());
        }
        *self.last.borrow_mut() = Some(end);
    }

    pub fn new_destroyable(&self, destroyable: Rc<dyn Destroyable>) {
        if self.is_list() {
            return;
        }
        self.destroyables.borrow_mut().push(destroyable);
    }

    /// A finished block that produced no nodes still needs one so that later
    /// updates have a position to insert at.
    pub fn needs_placeholder(&self) -> bool {
        !self.is_list() && self.first.borrow().is_none()
    }

    /// Forget the range and hand the destroyables to the environment, ready
    /// for re-execution. Returns the node the cleared range was followed by.
    pub fn reset(&self, env: &Environment) -> Option<NodeRef> {
        let destroyables = std::mem::take(&mut *self.destroyables.borrow_mut());
        for destroyable in destroyables {
            env.did_destroy(destroyable);
        }

        let next = clear(env.dom().as_ref(), self);
        *self.first.borrow_mut() = None;
        *self.last.borrow_mut() = None;
        self.nesting.set(0);
        next
    }

    /// First or last node of the item blocks of a list tracker.
    fn item_bound(&self, head: bool) -> Option<NodeRef> {
        let TrackerKind::List { list, arena } = &self.kind else {
            return None;
        };
        let arena = arena.upgrade()?;
        let op = {
            let arena = arena.borrow();
            let id = if head { arena.head(*list) } else { arena.tail(*list) }?;
            arena.op(id)?
        };
        let bounds = op.bounds()?;
        if head {
            bounds.first_node()
        } else {
            bounds.last_node()
        }
    }

    fn item_blocks(&self) -> Vec<Rc<BlockTracker>> {
        let TrackerKind::List { list, arena } = &self.kind else {
            return Vec::new();
        };
        match arena.upgrade() {
            Some(arena) => arena
                .borrow()
                .ops(*list)
                .iter()
                .filter_map(|op| op.bounds())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Bounds for BlockTracker {
    fn parent_element(&self) -> NodeRef {
        self.parent.clone()
    }

    fn first_node(&self) -> Option<NodeRef> {
        if self.is_list() {
            return self.item_bound(true);
        }
        let first = self.first.borrow().clone();
        first.and_then(|end| end.first_node())
    }

    fn last_node(&self) -> Option<NodeRef> {
        if self.is_list() {
            return self.item_bound(false);
        }
        let last = self.last.borrow().clone();
        last.and_then(|end| end.last_node())
    }
}

impl Destroyable for BlockTracker {
    /// List trackers snapshot their item blocks here: by the time a deferred
    /// `destroy` runs the updating arena may already have freed them.
    fn will_destroy(&self) {
        let nested: Vec<Rc<dyn Destroyable>> = match &self.kind {
            TrackerKind::List { .. } => {
                let items: Vec<Rc<dyn Destroyable>> = self
                    .item_blocks()
                    .into_iter()
                    .map(|block| block as Rc<dyn Destroyable>)
                    .collect();
                *self.destroyables.borrow_mut() = items.clone();
                items
            }
            _ => self.destroyables.borrow().clone(),
        };
        for destroyable in nested {
            destroyable.will_destroy();
        }
    }

    fn destroy(&self) {
        match &self.kind {
            TrackerKind::List { .. } => {
                let snapshot = std::mem::take(&mut *self.destroyables.borrow_mut());
                if snapshot.is_empty() {
                    for block in self.item_blocks() {
                        block.destroy();
                    }
                } else {
                    for block in snapshot {
                        block.destroy();
                    }
                }
            }
            kind => {
                let destroyables = std::mem::take(&mut *self.destroyables.borrow_mut());
                for destroyable in destroyables {
                    destroyable.destroy();
                }
                if let TrackerKind::Remote(dom) = kind {
                    clear(dom.as_ref(), self);
                }
            }
        }
    }
}
