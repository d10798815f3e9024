//! Append opcode handlers.
//!
//! Operand conventions: string and constant-pool operands are 1-indexed
//! (`0` is absent), jump offsets are relative to the running instruction,
//! register operands use the numbering of [`Register`].

use super::append::AppendVM;
use super::arguments::Arguments;
use super::register_file::Register;
use super::stack::StackValue;
use super::updating::{UpdateAttribute, UpdateModifier, UpdatingOpcode};
use crate::component::{ComponentElementOperations, ComponentState};
use crate::core::{VmError, VmResult};
use crate::environment::DebugContext;
use crate::program::{primitive, test_kind, Op, Opcode, Other};
use crate::reference::{
    bool_reference, child, is_const, null_reference, undefined_reference, ComputedReference,
    ConcatReference, ConstReference, IterablePresenceReference, IterationArtifacts,
    ReferenceCache, ReferenceIterator, ReferenceRef,
};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

impl AppendVM {
    pub(super) fn evaluate(&mut self, opcode: Opcode) -> VmResult<()> {
        let Opcode { op, op1, op2, op3 } = opcode;
        match op {
            Op::Bug | Op::Function => Err(VmError::Unsupported {
                reason: format!("opcode {}", op.name()),
            }),

            // Expressions
            Op::Helper => {
                let helper = self.constants(|c| c.get_helper(op1))?;
                let args = self.stack.pop()?.into_args()?;
                let result = helper.call(self, args.captured())?;
                args.clear(&mut self.stack)?;
                self.stack.push(result);
                Ok(())
            }
            Op::SetVariable => {
                let reference = self.stack.pop_reference()?;
                self.scope()?.bind_symbol(op1 as usize, reference)
            }
            Op::GetVariable => {
                let reference = self.scope()?.get_symbol(op1 as usize)?;
                self.stack.push(reference);
                Ok(())
            }
            Op::GetProperty => {
                let key = self.string(op1)?;
                let parent = self.stack.pop_reference()?;
                self.stack.push(child(&parent, &key, self.env.clock()));
                Ok(())
            }
            Op::PushBlock => {
                let block = match op1 {
                    0 => None,
                    index => self.constants(|c| c.get_block(index))?,
                };
                self.stack.push(StackValue::Block(block));
                Ok(())
            }
            Op::GetBlock => {
                let block = self.scope()?.get_block(op1 as usize)?;
                self.stack.push(StackValue::Block(block));
                Ok(())
            }
            Op::HasBlock => {
                let block = self.scope()?.get_block(op1 as usize)?;
                self.stack.push(bool_reference(block.is_some()));
                Ok(())
            }
            Op::HasBlockParams => {
                let block = self.scope()?.get_block(op1 as usize)?;
                let has_params = block.is_some_and(|block| !block.parameters.is_empty());
                self.stack.push(bool_reference(has_params));
                Ok(())
            }
            Op::Concat => {
                let mut parts = Vec::with_capacity(op1 as usize);
                for _ in 0..op1 {
                    parts.push(self.stack.pop_reference()?);
                }
                parts.reverse();
                let concat: ReferenceRef = Rc::new(ConcatReference::new(parts));
                self.stack.push(concat);
                Ok(())
            }

            // Stack and registers
            Op::Immediate => {
                self.stack.push(StackValue::Int(op1 as i32 as isize));
                Ok(())
            }
            Op::Constant => match self.constants(|c| c.get_other(op1))? {
                Other::Names(names) => {
                    self.stack.push(StackValue::Names(names));
                    Ok(())
                }
                _ => Err(VmError::UnresolvedConstant {
                    pool: "names",
                    index: op1,
                }),
            },
            Op::PrimitiveReference => {
                let reference = self.primitive_reference(op1)?;
                self.stack.push(reference);
                Ok(())
            }
            Op::Dup => {
                let base = self
                    .registers
                    .address(Register::from_operand(op1)?, &self.stack)?;
                self.stack.dup(base - op2 as isize)
            }
            Op::Pop => self.stack.pop_n(op1 as usize).map(|_| ()),
            Op::Load => {
                let value = self.stack.pop()?;
                self.registers
                    .load(Register::from_operand(op1)?, value, &mut self.stack)
            }
            Op::Fetch => {
                let value = self
                    .registers
                    .fetch(Register::from_operand(op1)?, &self.stack);
                self.stack.push(value);
                Ok(())
            }

            // Scopes and frames
            Op::RootScope => self.push_root_scope(op1 as usize, op2 != 0).map(|_| ()),
            Op::ChildScope => {
                let scope = self.scope()?.child();
                self.scopes.push(scope);
                Ok(())
            }
            Op::PopScope => self.pop_scope().map(|_| ()),
            Op::PushFrame => {
                self.push_frame();
                Ok(())
            }
            Op::PopFrame => self.pop_frame(),
            Op::Return => {
                self.registers.pc = self.registers.ra;
                Ok(())
            }
            Op::ReturnTo => {
                self.registers.ra = self.target(opcode.offset());
                Ok(())
            }
            Op::BindDynamicScope => {
                let names = self.constants(|c| c.get_string_array(op1))?;
                let scope = self.dynamic_scope()?.clone();
                for name in names.iter().rev() {
                    scope.set(name, self.stack.pop_reference()?);
                }
                Ok(())
            }
            Op::PushDynamicScope => {
                let scope = self.dynamic_scope()?.child();
                self.dynamic_scopes.push(scope);
                Ok(())
            }
            Op::PopDynamicScope => self
                .dynamic_scopes
                .pop()
                .map(|_| ())
                .ok_or(VmError::MissingFrame {
                    what: "dynamic scope",
                }),

            // Control flow
            Op::Jump => {
                self.goto(opcode.offset());
                Ok(())
            }
            Op::JumpIf => self.jump_when(opcode.offset(), true),
            Op::JumpUnless => self.jump_when(opcode.offset(), false),
            Op::Enter => self.enter(op1 as usize),
            Op::Exit => self.exit(),
            Op::Test => {
                let reference = self.stack.pop_reference()?;
                let tested = self.test(op1, reference)?;
                self.stack.push(tested);
                Ok(())
            }
            Op::CompileDynamicBlock => {
                let block = match self.stack.pop()? {
                    StackValue::Partial(template) => Some(template.compile_partial(&self.env)?),
                    other => other.into_block()?,
                };
                self.stack.push(StackValue::Block(block));
                Ok(())
            }
            Op::InvokeStatic => {
                let block = self
                    .constants(|c| c.get_block(op1))?
                    .ok_or(VmError::UnresolvedConstant {
                        pool: "blocks",
                        index: op1,
                    })?;
                self.call(block.handle)
            }
            Op::InvokeDynamic => {
                let invoker = match self.constants(|c| c.get_other(op1))? {
                    Other::Invoker(invoker) => invoker,
                    _ => {
                        return Err(VmError::UnresolvedConstant {
                            pool: "invokers",
                            index: op1,
                        })
                    }
                };
                let block = self.stack.pop()?.into_block()?;
                self.invoke(&invoker, block)
            }

            // Lists
            Op::PutIterator => {
                let list = self.stack.pop_reference()?;
                let key = self.stack.pop_reference()?.value();
                let key = if key.is_nullish() {
                    String::new()
                } else {
                    key.to_display_string()
                };
                let iterable = self.env.iterable_for(list, &key);
                let artifacts = IterationArtifacts::new(iterable, self.env.clock());
                self.stack.push(StackValue::Iterator(Rc::new(ReferenceIterator::new(
                    artifacts.clone(),
                ))));
                let presence: ReferenceRef = Rc::new(IterablePresenceReference::new(artifacts));
                self.stack.push(presence);
                Ok(())
            }
            Op::EnterList => {
                let start = self.handle_at(self.target(opcode.offset()))?;
                self.enter_list(start)
            }
            Op::ExitList => self.exit_list(),
            Op::Iterate => {
                let iterator = self.stack.peek()?.into_iterator()?;
                match iterator.next()? {
                    Some(item) => {
                        let id = self.iterate(item.memo_ref(), item.value_ref())?;
                        self.register_item(&item.key, id)?;
                        self.did_enter(id)
                    }
                    None => {
                        self.goto(opcode.offset());
                        Ok(())
                    }
                }
            }

            // DOM
            Op::Text => {
                let text = self.string(op1)?;
                self.builder.append_text(&text).map(|_| ())
            }
            Op::Comment => {
                let text = self.string(op1)?;
                self.builder.append_comment(&text).map(|_| ())
            }
            Op::DynamicContent => {
                let reference = self.stack.pop_reference()?;
                let value = reference.value();
                let content = if op1 != 0 {
                    self.builder.append_trusting_dynamic_content(&value)?
                } else {
                    self.builder.append_cautious_dynamic_content(&value)?
                };
                if !is_const(&reference) {
                    let last_revision = Cell::new(reference.tag().value());
                    self.update_with(UpdatingOpcode::UpdateDynamicContent {
                        reference,
                        content,
                        last_revision,
                    })?;
                }
                Ok(())
            }
            Op::OpenElement => {
                let tag = self.string(op1)?;
                self.builder.open_element(&tag).map(|_| ())
            }
            Op::OpenElementWithOperations => {
                let tag = self.string(op1)?;
                self.builder.open_element(&tag)?;
                self.registers.set_t0(StackValue::Operations(Rc::new(RefCell::new(
                    ComponentElementOperations::new(),
                ))));
                Ok(())
            }
            Op::OpenDynamicElement => {
                let tag = self.stack.pop_reference()?.value().to_display_string();
                self.builder.open_element(&tag).map(|_| ())
            }
            Op::StaticAttr => {
                let name = self.string(op1)?;
                let value = self.string(op2)?;
                let namespace = self.optional_string(op3)?;
                self.builder
                    .set_static_attribute(&name, &value, namespace.as_deref())
            }
            Op::DynamicAttr => {
                let name = self.string(op1)?;
                let namespace = self.optional_string(op2)?;
                let reference = self.stack.pop_reference()?;
                self.set_dynamic_attribute(&name, reference, namespace.as_deref())
            }
            Op::ComponentAttr => {
                let name = self.string(op1)?;
                let namespace = self.optional_string(op2)?;
                let reference = self.stack.pop_reference()?;
                match self.registers.t0().clone() {
                    StackValue::Operations(operations) => {
                        operations
                            .borrow_mut()
                            .set_attribute(&name, reference, namespace);
                        Ok(())
                    }
                    _ => self.set_dynamic_attribute(&name, reference, namespace.as_deref()),
                }
            }
            Op::PutComponentOperations => {
                self.registers.set_t0(StackValue::Operations(Rc::new(RefCell::new(
                    ComponentElementOperations::new(),
                ))));
                Ok(())
            }
            Op::FlushElement => {
                if let StackValue::Operations(operations) = self.registers.take_t0() {
                    let attributes = operations.borrow_mut().take();
                    for (name, reference, namespace) in attributes {
                        self.set_dynamic_attribute(&name, reference, namespace.as_deref())?;
                    }
                }
                self.builder.flush_element()
            }
            Op::CloseElement => self.builder.close_element(),
            Op::Modifier => self.install_modifier(op1),
            Op::PushRemoteElement => {
                let element = self.assert_stable()?;
                let next_sibling = self.assert_stable()?;
                let element = element.as_node().cloned().ok_or(VmError::TypeMismatch {
                    expected: "element",
                    found: element.kind_name(),
                })?;
                let next_sibling = match next_sibling {
                    Value::Node(node) => Some(node),
                    value if value.is_nullish() => None,
                    value => {
                        return Err(VmError::TypeMismatch {
                            expected: "node",
                            found: value.kind_name(),
                        })
                    }
                };
                self.builder.push_remote_element(element, next_sibling)
            }
            Op::PopRemoteElement => self.builder.pop_remote_element(),

            // Components
            Op::PushComponentManager => match self.constants(|c| c.get_other(op1))? {
                Other::Component(definition) => {
                    self.stack.push(StackValue::Component(ComponentState::new(definition)));
                    Ok(())
                }
                _ => Err(VmError::UnresolvedConstant {
                    pool: "components",
                    index: op1,
                }),
            },
            Op::PushDynamicComponentManager => match self.assert_stable()? {
                Value::Component(definition) => {
                    self.stack.push(StackValue::Component(ComponentState::new(definition)));
                    Ok(())
                }
                value => Err(VmError::NotAComponent {
                    kind: value.kind_name(),
                }),
            },
            Op::PushArgs => {
                let args = Arguments::setup(&self.stack, op1 != 0)?;
                self.stack.push(StackValue::Args(Rc::new(args)));
                Ok(())
            }
            Op::PrepareArgs => self.prepare_args(op1),
            Op::CreateComponent => self.create_component(op1, op2),
            Op::RegisterComponentDestructor => {
                let state = self.component_state(op1)?;
                let component = state.component()?;
                if let Some(destructor) = state.manager.get_destructor(&component) {
                    self.builder.new_destroyable(destructor)?;
                }
                Ok(())
            }
            Op::GetComponentSelf => {
                let state = self.component_state(op1)?;
                let self_ref = state.manager.get_self(&state.component()?);
                self.stack.push(self_ref);
                Ok(())
            }
            Op::GetComponentLayout => {
                let state = self.component_state(op1)?;
                let layout =
                    state
                        .manager
                        .layout_for(&state.definition, &state.component()?, &self.env)?;
                self.stack.push(StackValue::Block(Some(layout)));
                Ok(())
            }
            Op::BeginComponentTransaction => {
                self.begin_cache_group()?;
                self.builder.push_simple_block().map(|_| ())
            }
            Op::CommitComponentTransaction => self.commit_cache_group(),
            Op::DidCreateElement => {
                let state = self.component_state(op1)?;
                let component = state.component()?;
                let element = self.builder.constructing()?.clone();
                match self.registers.t0().clone() {
                    StackValue::Operations(operations) => state.manager.did_create_element(
                        &component,
                        &element,
                        &mut operations.borrow_mut(),
                    ),
                    _ => state.manager.did_create_element(
                        &component,
                        &element,
                        &mut ComponentElementOperations::new(),
                    ),
                }
                Ok(())
            }
            Op::DidRenderLayout => self.did_render_layout(op1),

            // Partials and debugging
            Op::GetPartialTemplate => {
                let name = self.stack.pop_reference()?.value().to_display_string();
                let template = self
                    .env
                    .lookup_partial(&name)
                    .ok_or(VmError::UnknownPartial { name })?;
                self.stack.push(StackValue::Partial(template));
                Ok(())
            }
            Op::ResolveMaybeLocal => {
                let name = self.string(op1)?;
                let scope = self.scope()?;
                let local = scope
                    .partial_map()
                    .and_then(|locals| locals.get(&name).cloned());
                let reference = match local {
                    Some(reference) => reference,
                    None => child(&scope.get_self()?, &name, self.env.clock()),
                };
                self.stack.push(reference);
                Ok(())
            }
            Op::Debugger => self.debugger(op1, op2),
        }
    }

    fn primitive_reference(&self, operand: u32) -> VmResult<ReferenceRef> {
        let (flag, value) = primitive::decode(operand);
        Ok(match flag {
            primitive::NUMBER => ConstReference::create(Value::Number(f64::from(value))),
            primitive::STRING => ConstReference::create(Value::String(self.string(value)?)),
            primitive::FLOAT => {
                let text = self.string(value)?;
                ConstReference::create(Value::Number(text.parse().unwrap_or(f64::NAN)))
            }
            _ => match value {
                primitive::FALSE => bool_reference(false),
                primitive::TRUE => bool_reference(true),
                primitive::NULL => null_reference(),
                _ => undefined_reference(),
            },
        })
    }

    /// Branch on the reference on top of the stack. A branch on a value
    /// that can change is asserted on every later update.
    fn jump_when(&mut self, offset: isize, when: bool) -> VmResult<()> {
        let reference = self.stack.pop_reference()?;
        let value = if is_const(&reference) {
            reference.value()
        } else {
            let cache = ReferenceCache::new(reference);
            let value = cache.peek();
            self.update_with(UpdatingOpcode::Assert(cache))?;
            value
        };
        if value.is_truthy() == when {
            self.goto(offset);
        }
        Ok(())
    }

    /// Value of the reference on top of the stack, asserted stable when it
    /// is not constant.
    fn assert_stable(&mut self) -> VmResult<Value> {
        let reference = self.stack.pop_reference()?;
        if is_const(&reference) {
            return Ok(reference.value());
        }
        let cache = ReferenceCache::new(reference);
        let value = cache.peek();
        self.update_with(UpdatingOpcode::Assert(cache))?;
        Ok(value)
    }

    fn test(&self, kind: u32, reference: ReferenceRef) -> VmResult<ReferenceRef> {
        Ok(match kind {
            test_kind::CONST => bool_reference(reference.value().is_truthy()),
            test_kind::SIMPLE => reference,
            test_kind::ENVIRONMENT => self.env.to_conditional_reference(reference),
            test_kind::COMPONENT => {
                let tag = reference.tag();
                Rc::new(ComputedReference::new(tag, move || {
                    Value::Bool(matches!(reference.value(), Value::Component(_)))
                }))
            }
            kind => {
                return Err(VmError::Unsupported {
                    reason: format!("test kind {kind}"),
                })
            }
        })
    }

    fn set_dynamic_attribute(
        &mut self,
        name: &str,
        reference: ReferenceRef,
        namespace: Option<&str>,
    ) -> VmResult<()> {
        let value = reference.value();
        let attribute = self
            .builder
            .set_dynamic_attribute(name, &value, namespace)?;
        if !is_const(&reference) {
            self.update_with(UpdatingOpcode::UpdateDynamicAttribute(UpdateAttribute {
                reference,
                attribute: RefCell::new(attribute),
                last_value: RefCell::new(value),
            }))?;
        }
        Ok(())
    }

    fn install_modifier(&mut self, operand: u32) -> VmResult<()> {
        let manager = match self.constants(|c| c.get_other(operand))? {
            Other::Modifier(manager) => manager,
            _ => {
                return Err(VmError::UnresolvedConstant {
                    pool: "modifiers",
                    index: operand,
                })
            }
        };
        let args = self.stack.pop()?.into_args()?;
        let element = self.builder.constructing()?.clone();
        let modifier = manager.create(
            &element,
            args.capture(),
            self.dynamic_scope()?,
            self.env.dom().clone(),
        );
        args.clear(&mut self.stack)?;

        self.env
            .schedule_install_modifier(modifier.clone(), manager.clone());
        if let Some(destructor) = manager.get_destructor(&modifier) {
            self.builder.new_destroyable(destructor)?;
        }
        let tag = manager.get_tag(&modifier);
        if !tag.is_const() {
            self.update_with(UpdatingOpcode::UpdateModifier(UpdateModifier {
                last_updated: Cell::new(tag.value()),
                tag,
                manager,
                modifier,
            }))?;
        }
        Ok(())
    }

    fn debugger(&self, symbols: u32, eval_info: u32) -> VmResult<()> {
        let symbols = match self.constants(|c| c.get_other(symbols))? {
            Other::Symbols(symbols) => symbols,
            _ => {
                return Err(VmError::UnresolvedConstant {
                    pool: "symbols",
                    index: symbols,
                })
            }
        };
        let eval_info = self.constants(|c| c.get_array(eval_info))?;
        let scope = self.scope()?;
        let mut locals = Vec::with_capacity(eval_info.len());
        for slot in eval_info.iter().map(|slot| *slot as usize) {
            let Some(name) = slot.checked_sub(1).and_then(|i| symbols.get(i)) else {
                continue;
            };
            if let Ok(reference) = scope.get_symbol(slot) {
                locals.push((name.clone(), reference.value()));
            }
        }
        let context = DebugContext {
            self_value: scope.get_self()?.value(),
            locals,
        };
        match self.env.debugger() {
            Some(callback) => callback(&context),
            None => log::debug!(
                "debugger: self = {:?}, locals = {:?}",
                context.self_value,
                context.locals
            ),
        }
        Ok(())
    }
}
