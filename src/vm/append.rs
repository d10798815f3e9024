// The append VM runs compiled bytecode once, building DOM through an ElementBuilder and
// recording updating opcodes next to it. It is a plain fetch-decode-execute loop over
// four-word instructions. `pc` is advanced before an instruction runs, and the address of
// the running instruction is kept separately so relative jumps resolve against it.
// Calls save `pc` in `ra`; frames pushed on the evaluation stack save `ra` and `fp`, which
// lets blocks, layouts and partials nest without growing the host call stack.
//
// Updating opcodes are appended to the target on top of the target stack. Entering a
// re-executable block allocates a Try opcode, appends it, and makes its child list the new
// target until the matching Exit. A block re-executed on its own (a Try handling a failed
// assertion, or a list item inserted during reconciliation) has no list to be appended to;
// its opcode already sits in the arena, so it is entered "detached" with a Sole target.
//
// Execution ends when `pc` reaches -1, the return address of the entry block. At that
// point the remaining target and the outermost builder block are what the caller keeps.

//! The append VM: first-render bytecode interpreter.

use super::block::{ListBlockOpcode, TryOpcode, VmState};
use super::register_file::RegisterFile;
use super::stack::{EvaluationStack, StackValue};
use super::updating::{CacheGuard, ListId, OpId, UpdatingOpcode};
use super::{DynamicScope, Scope};
use crate::builder::{BlockTracker, ElementBuilder};
use crate::core::{VmError, VmResult};
use crate::environment::Environment;
use crate::program::{CompiledBlock, Constants, INSTRUCTION_SIZE};
use crate::reference::{combine, ReferenceRef};
use std::rc::Rc;

/// Where new updating opcodes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdatingTarget {
    List(ListId),
    /// A block being re-executed in place; only its own opcode.
    Sole(OpId),
}

/// Outcome of one step.
pub(crate) enum Step {
    Continue,
    Done {
        updating: UpdatingTarget,
        bounds: Rc<BlockTracker>,
    },
}

pub struct AppendVM {
    pub(super) env: Rc<Environment>,
    pub(super) stack: EvaluationStack,
    pub(super) registers: RegisterFile,
    /// Address of the instruction being executed.
    pub(super) address: isize,
    pub(super) scopes: Vec<Scope>,
    pub(super) dynamic_scopes: Vec<DynamicScope>,
    pub(super) targets: Vec<UpdatingTarget>,
    pub(super) list_blocks: Vec<OpId>,
    /// List tail at the start of each open cache group.
    pub(super) cache_groups: Vec<Option<OpId>>,
    pub(super) builder: ElementBuilder,
}

impl AppendVM {
    /// VM resuming inside an existing scope, as Try blocks and list items do.
    pub fn new(
        env: Rc<Environment>,
        scope: Scope,
        dynamic_scope: DynamicScope,
        builder: ElementBuilder,
    ) -> Self {
        Self {
            env,
            stack: EvaluationStack::empty(),
            registers: RegisterFile::new(),
            address: -1,
            scopes: vec![scope],
            dynamic_scopes: vec![dynamic_scope],
            targets: Vec::new(),
            list_blocks: Vec::new(),
            cache_groups: Vec::new(),
            builder,
        }
    }

    /// VM positioned at the start of an entry block, with a fresh root
    /// updating list.
    pub(crate) fn initial(
        env: Rc<Environment>,
        self_ref: ReferenceRef,
        dynamic_scope: DynamicScope,
        builder: ElementBuilder,
        entry: &CompiledBlock,
    ) -> VmResult<Self> {
        let scope = Scope::root(self_ref, entry.symbols.len());
        let mut vm = Self::new(env, scope, dynamic_scope, builder);
        let root = vm.env.arena().borrow_mut().new_list();
        vm.targets.push(UpdatingTarget::List(root));
        vm.registers.pc = vm.env.program().borrow().heap.getaddr(entry.handle)? as isize;
        vm.registers.ra = -1;
        Ok(vm)
    }

    pub fn env(&self) -> &Rc<Environment> {
        &self.env
    }

    pub fn scope(&self) -> VmResult<&Scope> {
        self.scopes.last().ok_or(VmError::MissingFrame { what: "scope" })
    }

    pub fn dynamic_scope(&self) -> VmResult<&DynamicScope> {
        self.dynamic_scopes.last().ok_or(VmError::MissingFrame {
            what: "dynamic scope",
        })
    }

    /// Run from the block handle `start` until it returns. `init` prepares
    /// the stack and updating targets once `pc` is set.
    pub(crate) fn execute(
        &mut self,
        start: u32,
        init: impl FnOnce(&mut AppendVM) -> VmResult<()>,
    ) -> VmResult<()> {
        self.registers.pc = self.env.program().borrow().heap.getaddr(start)? as isize;
        self.registers.ra = -1;
        init(self)?;
        loop {
            if let Step::Done { .. } = self.next()? {
                return Ok(());
            }
        }
    }

    /// Execute one instruction, or finish once `pc` has returned to -1.
    pub(crate) fn next(&mut self) -> VmResult<Step> {
        if self.registers.pc == -1 {
            return self.finish();
        }
        let address = self.registers.pc;
        let opcode = {
            let program = self.env.program().borrow();
            let index = usize::try_from(address).map_err(|_| VmError::MissingFrame {
                what: "instruction address",
            })?;
            program.opcode(index)?
        };
        log::trace!("{address:>6} {:?} {} {} {}", opcode.op, opcode.op1, opcode.op2, opcode.op3);
        self.address = address;
        self.registers.pc += INSTRUCTION_SIZE as isize;
        self.evaluate(opcode)?;
        Ok(Step::Continue)
    }

    fn finish(&mut self) -> VmResult<Step> {
        self.stack.reset();
        let updating = self.targets.pop().ok_or(VmError::MissingFrame {
            what: "updating list",
        })?;
        let bounds = self.builder.pop_block()?;
        Ok(Step::Done { updating, bounds })
    }

    pub(crate) fn restore_stack(&mut self, stack: Vec<StackValue>) {
        self.stack = EvaluationStack::restore(stack);
    }

    /// Read from the constant pool.
    pub(super) fn constants<R>(&self, read: impl FnOnce(&Constants) -> VmResult<R>) -> VmResult<R> {
        let program = self.env.program().borrow();
        read(&program.constants)
    }

    pub(super) fn string(&self, index: u32) -> VmResult<Rc<str>> {
        self.constants(|constants| constants.get_string(index))
    }

    /// Optional string operand (`0` is absent).
    pub(super) fn optional_string(&self, index: u32) -> VmResult<Option<Rc<str>>> {
        match index {
            0 => Ok(None),
            index => self.string(index).map(Some),
        }
    }

    // Control flow

    /// Address `offset` words from the running instruction.
    pub(super) fn target(&self, offset: isize) -> isize {
        self.address + offset
    }

    pub(super) fn goto(&mut self, offset: isize) {
        self.registers.pc = self.target(offset);
    }

    pub(super) fn call(&mut self, handle: u32) -> VmResult<()> {
        self.registers.ra = self.registers.pc;
        self.registers.pc = self.env.program().borrow().heap.getaddr(handle)? as isize;
        Ok(())
    }

    pub(super) fn push_frame(&mut self) {
        self.stack.push(StackValue::Int(self.registers.ra));
        self.stack.push(StackValue::Int(self.stack.fp()));
        self.stack.set_fp(self.stack.sp() - 1);
    }

    pub(super) fn pop_frame(&mut self) -> VmResult<()> {
        let ra = self.stack.from_base(0)?.into_int()?;
        let fp = self.stack.from_base(-1)?.into_int()?;
        self.stack.set_sp(self.stack.fp() - 1)?;
        self.registers.ra = ra;
        self.stack.set_fp(fp);
        Ok(())
    }

    /// Stable handle for an instruction address.
    pub(super) fn handle_at(&self, address: isize) -> VmResult<u32> {
        let address = usize::try_from(address).map_err(|_| VmError::MissingFrame {
            what: "instruction address",
        })?;
        Ok(self.env.program().borrow_mut().heap.gethandle(address))
    }

    // Scopes

    pub(super) fn push_root_scope(&mut self, size: usize, bind_caller: bool) -> VmResult<Scope> {
        let scope = Scope::sized(size);
        if bind_caller {
            scope.bind_caller_scope(Some(self.scope()?.clone()));
        }
        self.scopes.push(scope.clone());
        Ok(scope)
    }

    pub(super) fn push_caller_scope(&mut self, child: bool) -> VmResult<Scope> {
        let caller = self.scope()?.caller_scope().ok_or(VmError::MissingFrame {
            what: "caller scope",
        })?;
        let scope = if child { caller.child() } else { caller };
        self.scopes.push(scope.clone());
        Ok(scope)
    }

    pub(super) fn pop_scope(&mut self) -> VmResult<Scope> {
        self.scopes.pop().ok_or(VmError::MissingFrame { what: "scope" })
    }

    /// Scopes and the top `count` stack values.
    pub(super) fn capture(&self, count: usize) -> VmResult<VmState> {
        Ok(VmState {
            scope: self.scope()?.clone(),
            dynamic_scope: self.dynamic_scope()?.clone(),
            stack: self.stack.capture(count)?,
        })
    }

    // Updating opcodes

    pub(super) fn allocate(&self, op: UpdatingOpcode) -> OpId {
        self.env.arena().borrow_mut().allocate(op)
    }

    fn current_list(&self) -> VmResult<ListId> {
        match self.targets.last() {
            Some(UpdatingTarget::List(list)) => Ok(*list),
            Some(UpdatingTarget::Sole(_)) => Err(VmError::Unsupported {
                reason: "updating opcode outside of a block being re-executed".into(),
            }),
            None => Err(VmError::MissingFrame {
                what: "updating list",
            }),
        }
    }

    /// Record an updating opcode in the current list.
    pub(super) fn update_with(&self, op: UpdatingOpcode) -> VmResult<OpId> {
        let list = self.current_list()?;
        let mut arena = self.env.arena().borrow_mut();
        let id = arena.allocate(op);
        arena.append(list, id);
        Ok(id)
    }

    /// Append a block opcode and make its children the target.
    pub(super) fn did_enter(&mut self, id: OpId) -> VmResult<()> {
        let list = self.current_list()?;
        let children = {
            let mut arena = self.env.arena().borrow_mut();
            arena.append(list, id);
            arena.op(id).and_then(|op| op.child_list())
        }
        .ok_or(VmError::MissingFrame {
            what: "block opcode",
        })?;
        self.targets.push(UpdatingTarget::List(children));
        Ok(())
    }

    /// Target a block opcode that is already placed in the arena.
    pub(crate) fn enter_detached(&mut self, id: OpId) -> VmResult<()> {
        let children = self
            .env
            .arena()
            .borrow()
            .op(id)
            .and_then(|op| op.child_list())
            .ok_or(VmError::MissingFrame {
                what: "block opcode",
            })?;
        self.targets.push(UpdatingTarget::Sole(id));
        self.targets.push(UpdatingTarget::List(children));
        Ok(())
    }

    /// Open a re-executable block over the top `count` stack values.
    pub(super) fn enter(&mut self, count: usize) -> VmResult<()> {
        let state = self.capture(count)?;
        let tracker = self.builder.push_updatable_block()?;
        let start = self.handle_at(self.registers.pc)?;
        let children = self.env.arena().borrow_mut().new_list();
        let id = self.allocate(UpdatingOpcode::Try(TryOpcode::new(
            &self.env, start, state, tracker, children,
        )));
        self.did_enter(id)
    }

    pub(super) fn exit(&mut self) -> VmResult<()> {
        self.builder.pop_block()?;
        self.targets.pop().ok_or(VmError::MissingFrame {
            what: "updating list",
        })?;
        let arena = self.env.arena().borrow();
        let id = match self.targets.last() {
            Some(UpdatingTarget::List(list)) => arena.tail(*list),
            Some(UpdatingTarget::Sole(id)) => Some(*id),
            None => None,
        }
        .ok_or(VmError::MissingFrame {
            what: "block opcode",
        })?;
        if let Some(op) = arena.op(id) {
            op.did_initialize_children(&arena);
        }
        Ok(())
    }

    /// Open the list block of an `each` whose items start at `start`.
    pub(super) fn enter_list(&mut self, start: u32) -> VmResult<()> {
        let state = self.capture(0)?;
        let children = self.env.arena().borrow_mut().new_list();
        let tracker = self.builder.push_block_list(children, self.env.arena())?;
        let artifacts = self.stack.peek()?.into_iterator()?.artifacts().clone();
        let block = ListBlockOpcode::new(&self.env, start, state, tracker, children, artifacts);
        let id = self.allocate(UpdatingOpcode::ListBlock(block));
        self.list_blocks.push(id);
        self.did_enter(id)
    }

    pub(super) fn exit_list(&mut self) -> VmResult<()> {
        self.exit()?;
        self.list_blocks
            .pop()
            .map(|_| ())
            .ok_or(VmError::MissingFrame { what: "list block" })
    }

    /// Start the item block for one iteration: push its value and memo and
    /// open a Try over them. The opcode is not placed in any list.
    pub(crate) fn iterate(&mut self, memo: ReferenceRef, value: ReferenceRef) -> VmResult<OpId> {
        self.stack.push(value);
        self.stack.push(memo);
        let state = self.capture(2)?;
        let tracker = self.builder.push_updatable_block()?;
        let start = self.handle_at(self.registers.pc)?;
        let children = self.env.arena().borrow_mut().new_list();
        Ok(self.allocate(UpdatingOpcode::Try(TryOpcode::new(
            &self.env, start, state, tracker, children,
        ))))
    }

    /// Register an item block with the innermost list block.
    pub(super) fn register_item(&self, key: &str, id: OpId) -> VmResult<()> {
        let list = self
            .list_blocks
            .last()
            .ok_or(VmError::MissingFrame { what: "list block" })?;
        let op = self.env.arena().borrow().op(*list);
        match op.as_deref().and_then(UpdatingOpcode::as_list_block) {
            Some(block) => {
                block.register_item(key, id);
                Ok(())
            }
            None => Err(VmError::MissingFrame { what: "list block" }),
        }
    }

    // Cache groups

    pub(super) fn begin_cache_group(&mut self) -> VmResult<()> {
        let list = self.current_list()?;
        let tail = self.env.arena().borrow().tail(list);
        self.cache_groups.push(tail);
        Ok(())
    }

    /// Guard everything appended since the group began with one tag check.
    pub(super) fn commit_cache_group(&mut self) -> VmResult<()> {
        let marker = self.cache_groups.pop().ok_or(VmError::MissingFrame {
            what: "cache group",
        })?;
        let list = self.current_list()?;
        let mut arena = self.env.arena().borrow_mut();
        let head = match marker {
            Some(marker) => arena.next(marker),
            None => arena.head(list),
        };

        let mut tags = Vec::new();
        let mut cursor = head;
        while let Some(id) = cursor {
            if let Some(op) = arena.op(id) {
                tags.push(op.tag());
            }
            cursor = arena.next(id);
        }

        let label = arena.allocate(UpdatingOpcode::Label);
        let guard = CacheGuard::new(combine(tags), label);
        let jump = arena.allocate(UpdatingOpcode::JumpIfNotModified(guard.clone()));
        arena.insert_before(list, jump, head);
        let did_modify = arena.allocate(UpdatingOpcode::DidModify(guard));
        arena.append(list, did_modify);
        arena.append(list, label);
        Ok(())
    }
}
