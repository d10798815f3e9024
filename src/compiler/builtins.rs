// Built-in block forms. `if`, `unless`, `with`, `each` and `-in-element` are replayable:
// their arguments are evaluated inside a frame and captured by a Try block, so when a
// branch decision turns out stale the whole form re-executes from its arguments. `each`
// additionally opens a list block whose items are Try blocks of their own, started from
// the iteration body. `-with-dynamic-vars` only rebinds the dynamic scope around its body.
//
// Inline blocks are entered with InvokeStatic inside a frame of their own. Block params
// are bound in a child scope from the values the form left below that frame.

//! Built-in block forms.

use super::builder::{Label, OpcodeBuilder};
use super::statements::{FP, SP};
use super::wire::{Expression, InlineBlock};
use super::Compiler;
use crate::core::{CompileError, CompileResult};
use crate::program::{primitive, test_kind, Op};
use std::rc::Rc;

type Builder<'s, 'arena> = OpcodeBuilder<'s, 'arena>;
type HashEntries = [(Rc<str>, Expression)];

fn single<'e>(name: &str, params: &'e [Expression]) -> CompileResult<&'e Expression> {
    match params {
        [param] => Ok(param),
        _ => Err(CompileError::arity(format!(
            "#{name} requires a single argument"
        ))),
    }
}

fn required<'e>(name: &str, template: Option<&'e InlineBlock>) -> CompileResult<&'e InlineBlock> {
    template.ok_or_else(|| CompileError::arity(format!("#{name} requires a block")))
}

fn named<'e>(hash: &'e HashEntries, key: &str) -> Option<&'e Expression> {
    hash.iter()
        .find(|(name, _)| &**name == key)
        .map(|(_, value)| value)
}

impl<'a, 's, 'arena> Compiler<'a, 's, 'arena> {
    pub(super) fn block(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        name: &str,
        params: &[Expression],
        hash: &HashEntries,
        template: Option<&InlineBlock>,
        inverse: Option<&InlineBlock>,
    ) -> CompileResult<()> {
        match name {
            "if" | "unless" => {
                let condition = single(name, params)?;
                let template = required(name, template)?;
                let branch = if name == "if" {
                    Op::JumpUnless
                } else {
                    Op::JumpIf
                };
                self.replayable(
                    b,
                    |c, b| {
                        c.expr(b, condition)?;
                        b.push1(Op::Test, test_kind::ENVIRONMENT);
                        Ok(1)
                    },
                    |c, b| c.branches(b, branch, template, inverse, 0),
                )
            }
            "with" => {
                let value = single(name, params)?;
                let template = required(name, template)?;
                self.replayable(
                    b,
                    |c, b| {
                        c.expr(b, value)?;
                        b.push2(Op::Dup, SP, 0);
                        b.push1(Op::Test, test_kind::ENVIRONMENT);
                        Ok(2)
                    },
                    |c, b| c.branches(b, Op::JumpUnless, template, inverse, 1),
                )
            }
            "each" => {
                let list = single(name, params)?;
                let template = required(name, template)?;
                self.each(b, list, named(hash, "key"), template, inverse)
            }
            "-in-element" => {
                let destination = single(name, params)?;
                let template = required(name, template)?;
                let next_sibling = named(hash, "nextSibling");
                self.replayable(
                    b,
                    |c, b| {
                        c.optional_expr(b, next_sibling)?;
                        c.expr(b, destination)?;
                        b.push2(Op::Dup, SP, 0);
                        b.push1(Op::Test, test_kind::SIMPLE);
                        Ok(3)
                    },
                    |c, b| {
                        let exit = b.label("EXIT");
                        b.jump(Op::JumpUnless, exit);
                        b.push0(Op::PushRemoteElement);
                        c.invoke_static(b, template, 0)?;
                        b.push0(Op::PopRemoteElement);
                        b.bind(exit);
                        Ok(())
                    },
                )
            }
            "-with-dynamic-vars" => {
                let template = required(name, template)?;
                if hash.is_empty() {
                    return Err(CompileError::arity(
                        "#-with-dynamic-vars requires named arguments",
                    ));
                }
                for (_, value) in hash {
                    self.expr(b, value)?;
                }
                let names: Vec<u32> = hash.iter().map(|(name, _)| self.string(name)).collect();
                let names = self.program.constants.array(&names);
                b.push0(Op::PushDynamicScope);
                b.push1(Op::BindDynamicScope, names);
                self.invoke_static(b, template, 0)?;
                b.push0(Op::PopDynamicScope);
                Ok(())
            }
            "component" => self.dynamic_component(b, params, hash, template, inverse),
            _ => match self.curly_component(name) {
                Some(definition) => {
                    self.static_component(b, definition, params, hash, template, inverse)
                }
                None => Err(CompileError::UnknownComponent {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Evaluate arguments inside a frame and open a Try block over them.
    fn replayable(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        args: impl FnOnce(&mut Self, &mut Builder<'s, 'arena>) -> CompileResult<u32>,
        body: impl FnOnce(&mut Self, &mut Builder<'s, 'arena>) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let end = b.label("END");
        b.push0(Op::PushFrame);
        b.jump(Op::ReturnTo, end);
        let count = args(self, b)?;
        b.push1(Op::Enter, count);
        body(self, b)?;
        b.push0(Op::Exit);
        b.push0(Op::Return);
        b.bind(end);
        b.push0(Op::PopFrame);
        Ok(())
    }

    /// Branch with `jump` to the inverse (or past the template).
    fn branches(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        jump: Op,
        template: &InlineBlock,
        inverse: Option<&InlineBlock>,
        caller_count: usize,
    ) -> CompileResult<()> {
        let otherwise = b.label("ELSE");
        b.jump(jump, otherwise);
        self.invoke_static(b, template, caller_count)?;
        self.else_branch(b, otherwise, inverse)
    }

    fn else_branch(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        otherwise: Label,
        inverse: Option<&InlineBlock>,
    ) -> CompileResult<()> {
        match inverse {
            Some(inverse) => {
                let exit = b.label("EXIT");
                b.jump(Op::Jump, exit);
                b.bind(otherwise);
                self.invoke_static(b, inverse, 0)?;
                b.bind(exit);
            }
            None => b.bind(otherwise),
        }
        Ok(())
    }

    fn each(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        list: &Expression,
        key: Option<&Expression>,
        template: &InlineBlock,
        inverse: Option<&InlineBlock>,
    ) -> CompileResult<()> {
        self.replayable(
            b,
            |c, b| {
                c.optional_expr(b, key)?;
                c.expr(b, list)?;
                Ok(2)
            },
            |c, b| {
                let otherwise = b.label("ELSE");
                let iterate = b.label("ITER");
                let body = b.label("BODY");
                let done = b.label("BREAK");

                b.push0(Op::PutIterator);
                b.jump(Op::JumpUnless, otherwise);
                b.push0(Op::PushFrame);
                b.jump(Op::ReturnTo, iterate);
                b.push2(Op::Dup, FP, 1);
                b.jump(Op::EnterList, body);

                b.bind(iterate);
                b.jump(Op::Iterate, done);

                // Each item starts here with its value and memo on the stack.
                b.bind(body);
                c.invoke_static(b, template, 2)?;
                b.push1(Op::Pop, 2);
                b.push0(Op::Exit);
                b.push0(Op::Return);

                b.bind(done);
                b.push0(Op::ExitList);
                b.push0(Op::PopFrame);
                c.else_branch(b, otherwise, inverse)
            },
        )
    }

    /// Call an inline block, binding its params from the top
    /// `caller_count` stack values.
    pub(super) fn invoke_static(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        block: &InlineBlock,
        caller_count: usize,
    ) -> CompileResult<()> {
        let index = self.inline_block(block)?;
        let has_params = !block.parameters.is_empty();
        b.push0(Op::PushFrame);
        if has_params {
            b.push0(Op::ChildScope);
            for (i, slot) in block.parameters.iter().enumerate() {
                if i < caller_count {
                    b.push2(Op::Dup, FP, (caller_count - i) as u32);
                } else {
                    b.push1(
                        Op::PrimitiveReference,
                        primitive::encode(primitive::IMMEDIATE, primitive::UNDEFINED),
                    );
                }
                b.push1(Op::SetVariable, *slot as u32);
            }
        }
        b.push1(Op::InvokeStatic, index);
        if has_params {
            b.push0(Op::PopScope);
        }
        b.push0(Op::PopFrame);
        Ok(())
    }

    /// The expression, or a null reference when absent.
    fn optional_expr(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        expression: Option<&Expression>,
    ) -> CompileResult<()> {
        match expression {
            Some(expression) => self.expr(b, expression),
            None => {
                b.push1(
                    Op::PrimitiveReference,
                    primitive::encode(primitive::IMMEDIATE, primitive::NULL),
                );
                Ok(())
            }
        }
    }
}
