// Compiled templates live in one Program per environment: the relocatable instruction
// heap and the constant pool the instructions index into. A CompiledBlock is the runtime
// face of a compiled template or inline block, a heap handle plus the symbol information
// invokers need to set up a scope for it. Invokers are the small strategies the
// InvokeDynamic opcode runs to enter a block computed at runtime (a component layout, a
// yielded block, a partial).

//! Bytecode program: heap, constants and compiled blocks.

pub mod constants;
pub mod heap;
pub mod opcode;

pub use constants::{ConstantCounts, Constants, Other};
pub use heap::Heap;
pub use opcode::{primitive, test_kind, Op, Opcode, INSTRUCTION_SIZE};

use crate::core::VmResult;
use std::rc::Rc;

/// A block committed to the heap.
#[derive(Debug)]
pub struct CompiledBlock {
    pub handle: u32,
    /// Named symbols of an entry point, layout or partial.
    pub symbols: Rc<[Rc<str>]>,
    /// Slots bound to block parameters of an inline block.
    pub parameters: Rc<[usize]>,
    pub has_eval: bool,
}

impl CompiledBlock {
    pub fn inline(handle: u32, parameters: Rc<[usize]>) -> Self {
        Self {
            handle,
            symbols: Rc::from(Vec::new()),
            parameters,
            has_eval: false,
        }
    }

    pub fn with_symbols(handle: u32, symbols: Rc<[Rc<str>]>, has_eval: bool) -> Self {
        Self {
            handle,
            symbols,
            parameters: Rc::from(Vec::new()),
            has_eval,
        }
    }

    /// Slot of a named symbol (slot 0 is self).
    pub fn symbol_slot(&self, name: &str) -> Option<usize> {
        self.symbols.iter().position(|s| &**s == name).map(|i| i + 1)
    }
}

/// How `InvokeDynamic` enters the block on top of the stack.
#[derive(Debug)]
pub enum Invoker {
    /// Component layout; binds self, named arguments and blocks.
    Layout { attrs: Option<Rc<CompiledBlock>> },
    /// Block passed by the caller, with `caller_count` values on the stack.
    Yield { caller_count: usize },
    /// Partial, forwarding the outer template's visible locals.
    Partial {
        outer_symbols: Rc<[Rc<str>]>,
        eval_info: Rc<[usize]>,
    },
}

#[derive(Default)]
pub struct Program {
    pub heap: Heap,
    pub constants: Constants,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the instruction at `address`.
    pub fn opcode(&self, address: usize) -> VmResult<Opcode> {
        Opcode::decode(self.heap.instruction(address)?, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_from_heap() {
        let mut program = Program::new();
        let handle = program.heap.commit(&[[Op::Text as u32, 1, 0, 0], [Op::Return as u32, 0, 0, 0]]);
        let address = program.heap.getaddr(handle).unwrap();
        assert_eq!(program.opcode(address).unwrap().op, Op::Text);
        assert_eq!(program.opcode(address + INSTRUCTION_SIZE).unwrap().op, Op::Return);
    }

    #[test]
    fn test_symbol_slots_are_one_based() {
        let block = CompiledBlock::with_symbols(0, Rc::from(vec![Rc::from("@title"), Rc::from("&default")]), false);
        assert_eq!(block.symbol_slot("@title"), Some(1));
        assert_eq!(block.symbol_slot("&default"), Some(2));
        assert_eq!(block.symbol_slot("&attrs"), None);
    }
}
