// The compiler lowers wire statements into append bytecode. Every template, layout,
// partial and inline block becomes one heap block ending in Return; inline blocks are
// also entered in the constant pool so that InvokeStatic, PushBlock and the component
// invokers can name them. Names are resolved against the environment's registries at
// compile time. A missing helper, modifier or required component is a compile error.
//
// Compilation happens lazily: an entry template on its first render, a component layout
// the first time the component is invoked, a partial the first time it is looked up.
// Each pass runs in its own CompilationSession, and its statistics are folded into the
// environment.

//! Wire statements to append bytecode.

pub mod builder;
mod builtins;
pub mod layout;
mod statements;
pub mod wire;

pub use builder::{Label, OpcodeBuilder};
pub use wire::{ClientSide, Expression, Hash, InlineBlock, Literal, Statement};

use crate::core::{CompilationSession, CompileResult};
use crate::environment::Environment;
use crate::program::{CompiledBlock, Program};
use bumpalo::Bump;
use std::rc::Rc;

/// What a template is compiled as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileMode {
    Entry,
    /// A component layout, already run through [`layout::scan`].
    Layout,
    /// A partial: bare names may be the caller's locals.
    Partial,
}

/// Lowering state for one compile pass.
pub struct Compiler<'a, 's, 'arena> {
    env: &'a Environment,
    program: &'a mut Program,
    session: &'s CompilationSession<'arena>,
    symbols: Rc<[Rc<str>]>,
    mode: CompileMode,
    /// Attributes go to the component element's operations.
    component_attrs: bool,
}

/// Compile a whole template into a block carrying its symbol table.
pub fn compile(
    env: &Environment,
    id: &str,
    symbols: Rc<[Rc<str>]>,
    has_eval: bool,
    statements: &[Statement],
    mode: CompileMode,
) -> CompileResult<Rc<CompiledBlock>> {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    session.set_current_template(id);

    let handle = {
        let mut program = env.program().borrow_mut();
        let mut compiler = Compiler {
            env,
            program: &mut program,
            session: &session,
            symbols: symbols.clone(),
            mode,
            component_attrs: false,
        };
        compiler.compile_block(statements)?
    };

    session.record_template_compiled();
    let stats = session.stats();
    log::debug!(
        "compiled {id} as {mode:?}: {} blocks, {} instructions, {} bytes of scratch",
        stats.blocks_compiled,
        stats.instructions_emitted,
        arena.allocated_bytes()
    );
    env.record_stats(&stats);
    Ok(Rc::new(CompiledBlock::with_symbols(handle, symbols, has_eval)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompileError;
    use crate::program::{Op, Opcode, INSTRUCTION_SIZE};
    use serde_json::json;

    fn decode(statements: serde_json::Value) -> Vec<Statement> {
        let statements = statements.as_array().cloned().unwrap_or_default();
        wire::decode_statements(&statements).unwrap()
    }

    /// Inline blocks are committed before their parent, so a template's own
    /// block runs to the end of the heap.
    fn ops(env: &Environment, block: &CompiledBlock) -> Vec<Opcode> {
        let program = env.program().borrow();
        let start = program.heap.getaddr(block.handle).unwrap();
        (start..program.heap.len())
            .step_by(INSTRUCTION_SIZE)
            .map(|address| program.opcode(address).unwrap())
            .collect()
    }

    fn compile_entry(env: &Environment, statements: serde_json::Value) -> CompileResult<Rc<CompiledBlock>> {
        compile(env, "test", Rc::from(vec![]), false, &decode(statements), CompileMode::Entry)
    }

    #[test]
    fn test_element_and_text() {
        let env = Environment::new();
        let block = compile_entry(&env, json!([[6, "p"], [7], [0, "hi"], [8]])).unwrap();
        let kinds: Vec<Op> = ops(&env, &block).iter().map(|o| o.op).collect();
        assert_eq!(
            kinds,
            vec![Op::OpenElement, Op::FlushElement, Op::Text, Op::CloseElement, Op::Return]
        );
        let stats = env.stats();
        assert_eq!(stats.templates_compiled, 1);
        assert_eq!(stats.instructions_emitted, 5);
    }

    #[test]
    fn test_if_is_replayable_with_resolved_jumps() {
        let env = Environment::new();
        let block = compile_entry(
            &env,
            json!([[4, "if", [[18, "ok"]], null, {"statements": [[0, "yes"]]}, null]]),
        )
        .unwrap();
        let ops = ops(&env, &block);
        assert_eq!(ops[0].op, Op::PushFrame);
        assert_eq!(ops[1].op, Op::ReturnTo);
        let enter = ops.iter().position(|o| o.op == Op::Enter).unwrap();
        assert_eq!(ops[enter].op1, 1);
        assert_eq!(ops[enter - 1].op, Op::Test);
        assert_eq!(ops[enter + 1].op, Op::JumpUnless);

        // ReturnTo lands on the trailing PopFrame.
        let pop_frame = ops.len() - 2;
        assert_eq!(ops[pop_frame].op, Op::PopFrame);
        assert_eq!(ops[1].offset(), ((pop_frame - 1) * INSTRUCTION_SIZE) as isize);
        assert!(env.stats().labels_patched >= 2);
    }

    #[test]
    fn test_block_arity() {
        let env = Environment::new();
        let err = compile_entry(
            &env,
            json!([[4, "if", [], null, {"statements": []}, null]]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "#if requires a single argument");
        let err = compile_entry(
            &env,
            json!([[4, "each", [1, 2], null, {"statements": []}, null]]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "#each requires a single argument");
    }

    #[test]
    fn test_unresolved_names() {
        let env = Environment::new();
        assert!(matches!(
            compile_entry(&env, json!([[1, [25, "shout", [], null], false]])),
            Err(CompileError::UnknownHelper { name }) if name == "shout"
        ));
        assert!(matches!(
            compile_entry(&env, json!([[6, "div"], [3, "on", [], null], [7], [8]])),
            Err(CompileError::UnknownModifier { .. })
        ));
        assert!(matches!(
            compile_entry(&env, json!([[4, "x-list", [], null, {"statements": []}, null]])),
            Err(CompileError::UnknownComponent { name }) if name == "x-list"
        ));
    }

    #[test]
    fn test_literals_use_inline_or_pooled_encodings() {
        use crate::program::primitive;
        let env = Environment::new();
        let block = compile_entry(&env, json!([[1, 7, false], [1, 2.5, false], [1, null, false]])).unwrap();
        let refs: Vec<u32> = ops(&env, &block)
            .iter()
            .filter(|o| o.op == Op::PrimitiveReference)
            .map(|o| o.op1)
            .collect();
        assert_eq!(primitive::decode(refs[0]), (primitive::NUMBER, 7));
        assert_eq!(primitive::decode(refs[1]).0, primitive::FLOAT);
        assert_eq!(
            primitive::decode(refs[2]),
            (primitive::IMMEDIATE, primitive::NULL)
        );
    }

    #[test]
    fn test_unknown_in_partial_resolves_locals() {
        let env = Environment::new();
        let block = compile(
            &env,
            "partial",
            Rc::from(vec![]),
            false,
            &decode(json!([[1, [18, "name"], false]])),
            CompileMode::Partial,
        )
        .unwrap();
        assert!(ops(&env, &block).iter().any(|o| o.op == Op::ResolveMaybeLocal));
    }
}
