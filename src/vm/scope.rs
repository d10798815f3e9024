// A Scope is the set of bindings a running block can see. Slot 0 is self, the remaining
// slots hold either references (locals, named arguments, block parameters) or blocks
// (`&default`, `&inverse`, `&attrs`). Child scopes copy the slot vector, which is cheap
// because slots only hold shared handles. The caller link lets a yielded block run in the
// scope it was written in, the eval scope exposes named bindings to partials, and the
// partial map carries the outer template's locals into a partial so that MaybeLocal
// lookups can find them before falling back to self.
//
// DynamicScope is the `-with-dynamic-vars` environment: a string-keyed map of references
// copied on child creation so that bindings pushed by an inner block never leak out.

//! Lexical and dynamic scopes.

use crate::core::{VmError, VmResult};
use crate::program::CompiledBlock;
use crate::reference::{undefined_reference, ReferenceRef};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Contents of one scope slot.
#[derive(Clone)]
pub enum ScopeSlot {
    Reference(ReferenceRef),
    Block(Option<Rc<CompiledBlock>>),
}

/// Named bindings visible to a partial evaluated in this scope.
pub type EvalScope = Rc<HashMap<Rc<str>, ScopeSlot>>;

/// Outer locals forwarded into a partial.
pub type PartialMap = Rc<HashMap<Rc<str>, ReferenceRef>>;

#[derive(Clone)]
struct ScopeData {
    slots: Vec<ScopeSlot>,
    caller: Option<Scope>,
    eval_scope: Option<EvalScope>,
    partial_map: Option<PartialMap>,
}

/// Shared handle to a scope.
#[derive(Clone)]
pub struct Scope(Rc<RefCell<ScopeData>>);

impl Scope {
    /// Scope with `self` bound and `size` further slots.
    pub fn root(self_ref: ReferenceRef, size: usize) -> Scope {
        let scope = Scope::sized(size);
        scope.bind_self(self_ref);
        scope
    }

    /// Scope with `size + 1` unbound slots.
    pub fn sized(size: usize) -> Scope {
        let slots = (0..=size)
            .map(|_| ScopeSlot::Reference(undefined_reference()))
            .collect();
        Scope(Rc::new(RefCell::new(ScopeData {
            slots,
            caller: None,
            eval_scope: None,
            partial_map: None,
        })))
    }

    pub fn size(&self) -> usize {
        self.0.borrow().slots.len()
    }

    fn slot(&self, slot: usize) -> VmResult<ScopeSlot> {
        let data = self.0.borrow();
        data.slots
            .get(slot)
            .cloned()
            .ok_or(VmError::ScopeSlotOutOfRange {
                slot,
                size: data.slots.len(),
            })
    }

    fn bind(&self, slot: usize, value: ScopeSlot) -> VmResult<()> {
        let mut data = self.0.borrow_mut();
        let size = data.slots.len();
        match data.slots.get_mut(slot) {
            Some(target) => {
                *target = value;
                Ok(())
            }
            None => Err(VmError::ScopeSlotOutOfRange { slot, size }),
        }
    }

    pub fn get_self(&self) -> VmResult<ReferenceRef> {
        self.get_symbol(0)
    }

    pub fn get_symbol(&self, slot: usize) -> VmResult<ReferenceRef> {
        match self.slot(slot)? {
            ScopeSlot::Reference(reference) => Ok(reference),
            ScopeSlot::Block(_) => Err(VmError::TypeMismatch {
                expected: "reference",
                found: "block",
            }),
        }
    }

    /// Block bound to `slot`; a slot holding a reference reads as no block.
    pub fn get_block(&self, slot: usize) -> VmResult<Option<Rc<CompiledBlock>>> {
        match self.slot(slot)? {
            ScopeSlot::Block(block) => Ok(block),
            ScopeSlot::Reference(_) => Ok(None),
        }
    }

    pub fn bind_self(&self, self_ref: ReferenceRef) {
        let mut data = self.0.borrow_mut();
        if let Some(slot) = data.slots.first_mut() {
            *slot = ScopeSlot::Reference(self_ref);
        }
    }

    pub fn bind_symbol(&self, slot: usize, reference: ReferenceRef) -> VmResult<()> {
        self.bind(slot, ScopeSlot::Reference(reference))
    }

    pub fn bind_block(&self, slot: usize, block: Option<Rc<CompiledBlock>>) -> VmResult<()> {
        self.bind(slot, ScopeSlot::Block(block))
    }

    pub fn bind_caller_scope(&self, caller: Option<Scope>) {
        self.0.borrow_mut().caller = caller;
    }

    pub fn caller_scope(&self) -> Option<Scope> {
        self.0.borrow().caller.clone()
    }

    pub fn bind_eval_scope(&self, eval_scope: Option<EvalScope>) {
        self.0.borrow_mut().eval_scope = eval_scope;
    }

    pub fn eval_scope(&self) -> Option<EvalScope> {
        self.0.borrow().eval_scope.clone()
    }

    pub fn bind_partial_map(&self, partial_map: PartialMap) {
        self.0.borrow_mut().partial_map = Some(partial_map);
    }

    pub fn partial_map(&self) -> Option<PartialMap> {
        self.0.borrow().partial_map.clone()
    }

    /// Copy of this scope sharing caller, eval scope and partial map.
    pub fn child(&self) -> Scope {
        Scope(Rc::new(RefCell::new(self.0.borrow().clone())))
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Copy-on-child map of dynamic variables.
#[derive(Clone, Default)]
pub struct DynamicScope(Rc<RefCell<HashMap<Rc<str>, ReferenceRef>>>);

impl DynamicScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ReferenceRef> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, reference: ReferenceRef) {
        self.0.borrow_mut().insert(Rc::from(key), reference);
    }

    pub fn child(&self) -> DynamicScope {
        DynamicScope(Rc::new(RefCell::new(self.0.borrow().clone())))
    }
}
