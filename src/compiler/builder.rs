//! Per-block instruction buffer with label patching.
//!
//! Jumps are emitted against labels that may not be bound yet. Each jump
//! records a patch; [`OpcodeBuilder::finish`] rewrites the patched operand
//! to a word offset relative to the jumping instruction and commits the
//! whole block to the heap in one piece.

use crate::core::{CompilationSession, CompileError, CompileResult, Instruction};
use crate::program::{Op, Program, INSTRUCTION_SIZE};
use bumpalo::collections::Vec as BumpVec;

/// A jump target within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

pub struct OpcodeBuilder<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    instructions: BumpVec<'arena, Instruction>,
    /// Name and bound instruction index of every label.
    labels: BumpVec<'arena, (&'arena str, Option<usize>)>,
    /// Instruction index and the label its first operand jumps to.
    patches: BumpVec<'arena, (usize, Label)>,
}

impl<'s, 'arena> OpcodeBuilder<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>) -> Self {
        Self {
            session,
            instructions: session.instruction_buffer(),
            labels: BumpVec::new_in(session.arena()),
            patches: BumpVec::new_in(session.arena()),
        }
    }

    /// A fresh unbound label. Names only show up in errors and need not
    /// be unique.
    pub fn label(&mut self, name: &str) -> Label {
        self.labels.push((self.session.intern_str(name), None));
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0].1 = Some(self.instructions.len());
    }

    pub fn push(&mut self, op: Op, op1: u32, op2: u32, op3: u32) {
        self.session.record_instruction(op.name());
        self.instructions.push([op as u32, op1, op2, op3]);
    }

    pub fn push0(&mut self, op: Op) {
        self.push(op, 0, 0, 0);
    }

    pub fn push1(&mut self, op: Op, op1: u32) {
        self.push(op, op1, 0, 0);
    }

    pub fn push2(&mut self, op: Op, op1: u32, op2: u32) {
        self.push(op, op1, op2, 0);
    }

    /// Emit `op` with its first operand jumping to `label`.
    pub fn jump(&mut self, op: Op, label: Label) {
        self.patches.push((self.instructions.len(), label));
        self.push(op, 0, 0, 0);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Resolve jumps and commit to the heap, returning the block handle.
    pub fn finish(mut self, program: &mut Program) -> CompileResult<u32> {
        for &(at, Label(label)) in self.patches.iter() {
            let (name, bound) = self.labels[label];
            let target = bound.ok_or_else(|| CompileError::UnresolvedLabel {
                label: name.to_string(),
            })?;
            let offset = (target as isize - at as isize) * INSTRUCTION_SIZE as isize;
            self.instructions[at][1] = offset as i32 as u32;
            self.session.record_label_patched();
        }
        self.session.record_block_compiled(self.instructions.len());
        log::trace!(
            "committing {} instructions for {}",
            self.instructions.len(),
            self.session.current_template().as_deref().unwrap_or("<anonymous>")
        );
        Ok(program.heap.commit(&self.instructions))
    }
}
