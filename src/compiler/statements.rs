//! Lowering of statements and expressions.

use super::builder::OpcodeBuilder;
use super::wire::{ClientSide, Expression, InlineBlock, Literal, Statement};
use super::{CompileMode, Compiler};
use crate::component::ComponentDefinition;
use crate::core::{CompileError, CompileResult};
use crate::environment::helper::{COMPONENT, LOOKUP_PARTIAL};
use crate::program::{primitive, test_kind, CompiledBlock, Invoker, Op, Other};
use crate::vm::Register;
use std::rc::Rc;

pub(super) const S0: u32 = Register::S0 as u32;
pub(super) const FP: u32 = Register::Fp as u32;
pub(super) const SP: u32 = Register::Sp as u32;

type Builder<'s, 'arena> = OpcodeBuilder<'s, 'arena>;

impl<'a, 's, 'arena> Compiler<'a, 's, 'arena> {
    /// Compile statements into their own heap block.
    pub(super) fn compile_block(&mut self, statements: &[Statement]) -> CompileResult<u32> {
        let mut b = OpcodeBuilder::new(self.session);
        for statement in statements {
            self.statement(&mut b, statement)?;
        }
        b.push0(Op::Return);
        b.finish(self.program)
    }

    /// Compile an inline block and enter it in the constant pool.
    pub(super) fn inline_block(&mut self, block: &InlineBlock) -> CompileResult<u32> {
        let compiled = self.compile_inline(block)?;
        Ok(self.program.constants.block(compiled))
    }

    pub(super) fn compile_inline(&mut self, block: &InlineBlock) -> CompileResult<Rc<CompiledBlock>> {
        let handle = self.compile_block(&block.statements)?;
        Ok(Rc::new(CompiledBlock::inline(
            handle,
            Rc::from(block.parameters.clone()),
        )))
    }

    /// Block constant, or `0` for no block.
    pub(super) fn optional_block(&mut self, block: Option<&InlineBlock>) -> CompileResult<u32> {
        match block {
            Some(block) => self.inline_block(block),
            None => Ok(0),
        }
    }

    pub(super) fn string(&mut self, value: &str) -> u32 {
        self.program.constants.string(value)
    }

    fn optional_string(&mut self, value: Option<&Rc<str>>) -> u32 {
        match value {
            Some(value) => self.string(value),
            None => 0,
        }
    }

    pub(super) fn other(&mut self, other: Other) -> u32 {
        self.program.constants.other(other)
    }

    /// A registered component that no helper of the same name shadows.
    pub(super) fn curly_component(&self, name: &str) -> Option<Rc<ComponentDefinition>> {
        if self.env.lookup_helper(name).is_some() {
            return None;
        }
        self.env.lookup_component(name)
    }

    fn helper_constant(&mut self, name: &str) -> CompileResult<u32> {
        let helper = self
            .env
            .lookup_helper(name)
            .ok_or_else(|| CompileError::UnknownHelper {
                name: name.to_string(),
            })?;
        Ok(self.program.constants.helper(helper))
    }

    pub(super) fn statement(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        statement: &Statement,
    ) -> CompileResult<()> {
        match statement {
            Statement::Text(text) => {
                let text = self.string(text);
                b.push1(Op::Text, text);
            }
            Statement::Comment(text) => {
                let text = self.string(text);
                b.push1(Op::Comment, text);
            }
            Statement::Append { value, trusting } => self.append(b, value, *trusting)?,
            Statement::Modifier { name, params, hash } => {
                let manager =
                    self.env
                        .lookup_modifier(name)
                        .ok_or_else(|| CompileError::UnknownModifier {
                            name: name.to_string(),
                        })?;
                self.args(b, params, hash, true)?;
                let manager = self.other(Other::Modifier(manager));
                b.push1(Op::Modifier, manager);
            }
            Statement::Block {
                name,
                params,
                hash,
                template,
                inverse,
            } => self.block(b, name, params, hash, template.as_ref(), inverse.as_ref())?,
            Statement::Component {
                tag,
                attrs,
                args,
                block,
            } => self.component(b, tag, attrs, args, block.as_ref())?,
            Statement::OpenElement(tag) => {
                let tag = self.string(tag);
                b.push1(Op::OpenElement, tag);
            }
            Statement::FlushElement => b.push0(Op::FlushElement),
            Statement::CloseElement => b.push0(Op::CloseElement),
            Statement::StaticAttr {
                name,
                value,
                namespace,
            } => {
                let name = self.string(name);
                let value = self.string(value);
                let namespace = self.optional_string(namespace.as_ref());
                if self.component_attrs {
                    b.push1(
                        Op::PrimitiveReference,
                        primitive::encode(primitive::STRING, value),
                    );
                    b.push2(Op::ComponentAttr, name, namespace);
                } else {
                    b.push(Op::StaticAttr, name, value, namespace);
                }
            }
            // Trusting attributes go through the same sanitizing path.
            Statement::DynamicAttr {
                name,
                value,
                namespace,
                ..
            } => {
                self.expr(b, value)?;
                let name = self.string(name);
                let namespace = self.optional_string(namespace.as_ref());
                let op = if self.component_attrs {
                    Op::ComponentAttr
                } else {
                    Op::DynamicAttr
                };
                b.push2(op, name, namespace);
            }
            Statement::Yield { to, params } => {
                for param in params {
                    self.expr(b, param)?;
                }
                b.push1(Op::GetBlock, *to as u32);
                b.push0(Op::CompileDynamicBlock);
                let invoker = self.other(Other::Invoker(Rc::new(Invoker::Yield {
                    caller_count: params.len(),
                })));
                b.push1(Op::InvokeDynamic, invoker);
                b.push0(Op::PopScope);
                b.push0(Op::PopFrame);
                if !params.is_empty() {
                    b.push1(Op::Pop, params.len() as u32);
                }
            }
            Statement::Partial { name, eval_info } => self.partial(b, name, eval_info)?,
            Statement::Debugger { eval_info } => {
                let symbols = Other::Symbols(self.symbols.clone());
                let symbols = self.other(symbols);
                let slots: Vec<u32> = eval_info.iter().map(|slot| *slot as u32).collect();
                let eval_info = self.program.constants.array(&slots);
                b.push2(Op::Debugger, symbols, eval_info);
            }
            Statement::ClientSide(client) => match client {
                ClientSide::OpenComponentElement(tag) => {
                    let tag = self.string(tag);
                    b.push1(Op::OpenElementWithOperations, tag);
                }
                ClientSide::DidCreateElement => b.push1(Op::DidCreateElement, S0),
                ClientSide::SetComponentAttrs(on) => self.component_attrs = *on,
                ClientSide::DidRenderLayout => b.push1(Op::DidRenderLayout, S0),
            },
        }
        Ok(())
    }

    fn append(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        value: &Expression,
        trusting: bool,
    ) -> CompileResult<()> {
        if trusting {
            return self.guarded_append(b, value, true);
        }
        match value {
            Expression::Get { .. } | Expression::MaybeLocal(_) => {
                self.guarded_append(b, value, false)
            }
            Expression::Helper { name, params, hash } if &**name == COMPONENT => {
                self.dynamic_component(b, params, hash, None, None)
            }
            Expression::Helper { name, params, hash } => match self.curly_component(name) {
                Some(definition) => self.static_component(b, definition, params, hash, None, None),
                None => self.cautious_append(b, value),
            },
            Expression::Unknown(name) => match self.curly_component(name) {
                Some(definition) => self.static_component(b, definition, &[], &[], None, None),
                None => self.cautious_append(b, value),
            },
            _ => self.cautious_append(b, value),
        }
    }

    fn cautious_append(&mut self, b: &mut Builder<'s, 'arena>, value: &Expression) -> CompileResult<()> {
        self.expr(b, value)?;
        b.push1(Op::DynamicContent, 0);
        Ok(())
    }

    /// Content that may turn out to be a component definition.
    fn guarded_append(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        value: &Expression,
        trusting: bool,
    ) -> CompileResult<()> {
        let end = b.label("END");
        let otherwise = b.label("ELSE");
        b.push0(Op::PushFrame);
        b.jump(Op::ReturnTo, end);
        self.expr(b, value)?;
        b.push2(Op::Dup, SP, 0);
        b.push1(Op::Test, test_kind::COMPONENT);
        b.push1(Op::Enter, 2);
        b.jump(Op::JumpUnless, otherwise);
        b.push0(Op::PushDynamicComponentManager);
        self.invoke_component(b, None, None, &[], &[], None)?;
        b.push0(Op::Exit);
        b.push0(Op::Return);
        b.bind(otherwise);
        b.push1(Op::DynamicContent, trusting as u32);
        b.push0(Op::Exit);
        b.push0(Op::Return);
        b.bind(end);
        b.push0(Op::PopFrame);
        Ok(())
    }

    /// `<Tag>` invocation: a registered component or a plain element.
    fn component(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        tag: &Rc<str>,
        attrs: &[Statement],
        args: &[(Rc<str>, Expression)],
        block: Option<&InlineBlock>,
    ) -> CompileResult<()> {
        if let Some(definition) = self.env.lookup_component(tag) {
            let outer = std::mem::replace(&mut self.component_attrs, true);
            let handle = self.compile_block(attrs);
            self.component_attrs = outer;
            let attrs = Rc::new(CompiledBlock::inline(handle?, Rc::from(Vec::new())));
            let definition = self.other(Other::Component(definition));
            b.push1(Op::PushComponentManager, definition);
            return self.invoke_component(b, block, None, &[], args, Some(attrs));
        }
        if block.is_some_and(|block| !block.parameters.is_empty()) {
            return Err(CompileError::UnknownComponent {
                name: tag.to_string(),
            });
        }

        let tag = self.string(tag);
        b.push1(Op::OpenElement, tag);
        for attr in attrs {
            self.statement(b, attr)?;
        }
        b.push0(Op::FlushElement);
        if let Some(block) = block {
            for statement in &block.statements {
                self.statement(b, statement)?;
            }
        }
        b.push0(Op::CloseElement);
        Ok(())
    }

    pub(super) fn static_component(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        definition: Rc<ComponentDefinition>,
        params: &[Expression],
        hash: &[(Rc<str>, Expression)],
        template: Option<&InlineBlock>,
        inverse: Option<&InlineBlock>,
    ) -> CompileResult<()> {
        let definition = self.other(Other::Component(definition));
        b.push1(Op::PushComponentManager, definition);
        self.invoke_component(b, template, inverse, params, hash, None)
    }

    /// `{{component name ...}}`: the definition is resolved at runtime.
    pub(super) fn dynamic_component(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        params: &[Expression],
        hash: &[(Rc<str>, Expression)],
        template: Option<&InlineBlock>,
        inverse: Option<&InlineBlock>,
    ) -> CompileResult<()> {
        let (definition, rest) = params
            .split_first()
            .ok_or_else(|| CompileError::arity("#component requires at least one argument"))?;
        let end = b.label("END");
        let otherwise = b.label("ELSE");
        b.push0(Op::PushFrame);
        b.jump(Op::ReturnTo, end);
        self.args(b, std::slice::from_ref(definition), &[], true)?;
        let helper = self.helper_constant(COMPONENT)?;
        b.push1(Op::Helper, helper);
        b.push2(Op::Dup, SP, 0);
        b.push1(Op::Test, test_kind::SIMPLE);
        b.push1(Op::Enter, 2);
        b.jump(Op::JumpUnless, otherwise);
        b.push0(Op::PushDynamicComponentManager);
        self.invoke_component(b, template, inverse, rest, hash, None)?;
        b.bind(otherwise);
        b.push0(Op::Exit);
        b.push0(Op::Return);
        b.bind(end);
        b.push0(Op::PopFrame);
        Ok(())
    }

    /// Invoke the component whose state is on top of the stack. `s0` is
    /// saved around the invocation so components nest.
    pub(super) fn invoke_component(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        template: Option<&InlineBlock>,
        inverse: Option<&InlineBlock>,
        params: &[Expression],
        hash: &[(Rc<str>, Expression)],
        attrs: Option<Rc<CompiledBlock>>,
    ) -> CompileResult<()> {
        let default_block = self.optional_block(template)?;
        let inverse_block = self.optional_block(inverse)?;

        b.push1(Op::Fetch, S0);
        b.push2(Op::Dup, SP, 1);
        b.push1(Op::Load, S0);
        b.push1(Op::PushBlock, default_block);
        b.push1(Op::PushBlock, inverse_block);
        self.args(b, params, hash, false)?;
        b.push1(Op::PrepareArgs, S0);
        b.push0(Op::BeginComponentTransaction);
        b.push0(Op::PushDynamicScope);
        let flags = u32::from(template.is_some()) | (u32::from(inverse.is_some()) << 1);
        b.push2(Op::CreateComponent, flags, S0);
        b.push1(Op::RegisterComponentDestructor, S0);
        b.push1(Op::GetComponentSelf, S0);
        b.push1(Op::GetComponentLayout, S0);
        let invoker = self.other(Other::Invoker(Rc::new(Invoker::Layout { attrs })));
        b.push1(Op::InvokeDynamic, invoker);
        b.push0(Op::PopFrame);
        b.push0(Op::PopScope);
        b.push0(Op::PopDynamicScope);
        b.push0(Op::CommitComponentTransaction);
        b.push1(Op::Load, S0);
        b.push1(Op::Pop, 1);
        Ok(())
    }

    fn partial(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        name: &Expression,
        eval_info: &[usize],
    ) -> CompileResult<()> {
        let end = b.label("END");
        let otherwise = b.label("ELSE");
        b.push0(Op::PushFrame);
        b.jump(Op::ReturnTo, end);
        self.args(b, std::slice::from_ref(name), &[], true)?;
        let helper = self.helper_constant(LOOKUP_PARTIAL)?;
        b.push1(Op::Helper, helper);
        b.push2(Op::Dup, SP, 0);
        b.push1(Op::Test, test_kind::SIMPLE);
        b.push1(Op::Enter, 2);
        b.jump(Op::JumpUnless, otherwise);
        b.push0(Op::GetPartialTemplate);
        b.push0(Op::CompileDynamicBlock);
        let invoker = self.other(Other::Invoker(Rc::new(Invoker::Partial {
            outer_symbols: self.symbols.clone(),
            eval_info: Rc::from(eval_info),
        })));
        b.push1(Op::InvokeDynamic, invoker);
        b.push0(Op::PopScope);
        b.push0(Op::PopFrame);
        b.bind(otherwise);
        b.push0(Op::Exit);
        b.push0(Op::Return);
        b.bind(end);
        b.push0(Op::PopFrame);
        Ok(())
    }

    /// Push positional values, their count, named values and their names,
    /// then the `Arguments` over them. Component arguments are named with
    /// a leading `@`.
    pub(super) fn args(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        params: &[Expression],
        hash: &[(Rc<str>, Expression)],
        synthetic: bool,
    ) -> CompileResult<()> {
        for param in params {
            self.expr(b, param)?;
        }
        b.push1(Op::Immediate, params.len() as u32);
        for (_, value) in hash {
            self.expr(b, value)?;
        }
        let names: Rc<[Rc<str>]> = hash
            .iter()
            .map(|(name, _)| {
                if synthetic || name.starts_with('@') {
                    name.clone()
                } else {
                    Rc::from(format!("@{name}"))
                }
            })
            .collect();
        let names = self.other(Other::Names(names));
        b.push1(Op::Constant, names);
        b.push1(Op::PushArgs, synthetic as u32);
        Ok(())
    }

    pub(super) fn expr(
        &mut self,
        b: &mut Builder<'s, 'arena>,
        expression: &Expression,
    ) -> CompileResult<()> {
        match expression {
            Expression::Literal(literal) => {
                let operand = self.primitive(literal);
                b.push1(Op::PrimitiveReference, operand);
            }
            Expression::Unknown(name) => {
                if self.env.lookup_helper(name).is_some() {
                    self.args(b, &[], &[], true)?;
                    let helper = self.helper_constant(name)?;
                    b.push1(Op::Helper, helper);
                } else if self.mode == CompileMode::Partial {
                    let name = self.string(name);
                    b.push1(Op::ResolveMaybeLocal, name);
                } else {
                    b.push1(Op::GetVariable, 0);
                    let name = self.string(name);
                    b.push1(Op::GetProperty, name);
                }
            }
            Expression::Get { symbol, path } => {
                b.push1(Op::GetVariable, *symbol as u32);
                self.path(b, path);
            }
            Expression::MaybeLocal(path) => match path.split_first() {
                Some((head, rest)) if self.mode == CompileMode::Partial => {
                    let head = self.string(head);
                    b.push1(Op::ResolveMaybeLocal, head);
                    self.path(b, rest);
                }
                _ => {
                    b.push1(Op::GetVariable, 0);
                    self.path(b, path);
                }
            },
            Expression::HasBlock(slot) => b.push1(Op::HasBlock, *slot as u32),
            Expression::HasBlockParams(slot) => b.push1(Op::HasBlockParams, *slot as u32),
            Expression::Helper { name, params, hash } => {
                let helper = self.helper_constant(name)?;
                self.args(b, params, hash, true)?;
                b.push1(Op::Helper, helper);
            }
            Expression::Concat(parts) => {
                for part in parts {
                    self.expr(b, part)?;
                }
                b.push1(Op::Concat, parts.len() as u32);
            }
        }
        Ok(())
    }

    fn path(&mut self, b: &mut Builder<'s, 'arena>, path: &[Rc<str>]) {
        for key in path {
            let key = self.string(key);
            b.push1(Op::GetProperty, key);
        }
    }

    fn primitive(&mut self, literal: &Literal) -> u32 {
        use crate::program::primitive::{encode, FALSE, IMMEDIATE, NULL, TRUE, UNDEFINED};
        match literal {
            Literal::Undefined => encode(IMMEDIATE, UNDEFINED),
            Literal::Null => encode(IMMEDIATE, NULL),
            Literal::Bool(true) => encode(IMMEDIATE, TRUE),
            Literal::Bool(false) => encode(IMMEDIATE, FALSE),
            Literal::Number(n)
                if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(primitive::MAX_INLINE) =>
            {
                encode(primitive::NUMBER, *n as u32)
            }
            Literal::Number(n) => {
                let text = self.string(&n.to_string());
                encode(primitive::FLOAT, text)
            }
            Literal::String(s) => {
                let s = self.string(s);
                encode(primitive::STRING, s)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::BasicComponentManager;
    use crate::compiler::{compile, wire};
    use crate::environment::{Environment, SimpleHelper};
    use crate::program::INSTRUCTION_SIZE;
    use crate::template::Template;
    use crate::value::Value;
    use serde_json::json;

    fn compiled_ops(env: &Environment, statements: serde_json::Value) -> Vec<Op> {
        let statements = wire::decode_statements(statements.as_array().unwrap()).unwrap();
        let block = compile(env, "t", Rc::from(vec![]), false, &statements, CompileMode::Entry).unwrap();
        let program = env.program().borrow();
        let start = program.heap.getaddr(block.handle).unwrap();
        (start..program.heap.len())
            .step_by(INSTRUCTION_SIZE)
            .map(|address| program.opcode(address).unwrap().op)
            .collect()
    }

    #[test]
    fn test_get_append_is_guarded() {
        let env = Environment::new();
        let ops = compiled_ops(&env, json!([[1, [19, 0, ["title"]], false]]));
        assert!(ops.contains(&Op::PushDynamicComponentManager));
        assert!(ops.contains(&Op::DynamicContent));
        assert_eq!(ops[..2], [Op::PushFrame, Op::ReturnTo]);
    }

    #[test]
    fn test_helper_append_is_cautious() {
        let env = Environment::new();
        env.register_helper("upper", Rc::new(SimpleHelper::new(|_| Value::from("X"))));
        let ops = compiled_ops(&env, json!([[1, [25, "upper", [1], null], false]]));
        assert_eq!(
            ops,
            vec![
                Op::PrimitiveReference,
                Op::Immediate,
                Op::Constant,
                Op::PushArgs,
                Op::Helper,
                Op::DynamicContent,
                Op::Return
            ]
        );
    }

    #[test]
    fn test_registered_component_tag_invokes_layout() {
        let env = Environment::new();
        let layout = Template::from_statements("x-card", vec![], &[]);
        env.register_component(ComponentDefinition::new(
            "x-card",
            Rc::new(BasicComponentManager),
            layout,
        ));
        let ops = compiled_ops(&env, json!([[5, "x-card", [], [["@title"], ["hi"]], null]]));
        assert_eq!(ops[0], Op::PushComponentManager);
        assert!(ops.contains(&Op::InvokeDynamic));
        assert!(ops.contains(&Op::CommitComponentTransaction));
        assert_eq!(ops[ops.len() - 3..], [Op::Load, Op::Pop, Op::Return]);
    }

    #[test]
    fn test_unregistered_tag_is_an_element() {
        let env = Environment::new();
        let ops = compiled_ops(
            &env,
            json!([[5, "section", [[9, "id", "main", null]], null, {"statements": [[0, "x"]]}]]),
        );
        assert_eq!(
            ops,
            vec![
                Op::OpenElement,
                Op::StaticAttr,
                Op::FlushElement,
                Op::Text,
                Op::CloseElement,
                Op::Return
            ]
        );
    }

    #[test]
    fn test_unregistered_tag_with_block_params_is_an_error() {
        let env = Environment::new();
        let statements = wire::decode_statements(
            json!([[5, "x-list", [], null, {"statements": [], "parameters": [1]}]])
                .as_array()
                .unwrap(),
        )
        .unwrap();
        let err = compile(&env, "t", Rc::from(vec![]), false, &statements, CompileMode::Entry)
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown component: x-list");
    }
}
