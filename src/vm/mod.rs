// Two virtual machines share this module. The append VM interprets compiled bytecode once
// to produce the initial DOM, and records updating opcodes while it does so. The updating
// VM walks those opcodes on every rerender. Re-executable blocks (block.rs) sit between
// the two: they are updating opcodes that can start a fresh append VM over their own
// bytecode when an assertion inside them fails, or when a list grows.

//! Append and updating virtual machines.

pub mod append;
pub mod arguments;
pub mod block;
mod invoke;
mod opcodes;
pub mod register_file;
pub mod render;
pub mod scope;
pub mod stack;
pub mod updating;

pub use append::AppendVM;
pub use arguments::{Arguments, CapturedArguments};
pub use block::VmState;
pub use register_file::{Register, RegisterFile};
pub use render::{IteratorResult, RenderResult, TemplateIterator};
pub use scope::{DynamicScope, EvalScope, PartialMap, Scope, ScopeSlot};
pub use stack::{EvaluationStack, StackValue};
pub use updating::{UpdatingArena, UpdatingVM};
