// Component invocation and the InvokeDynamic strategies.
//
// A component invocation leaves this on the stack before InvokeDynamic runs the layout:
// the default and inverse blocks, the argument layout, self, and the layout block itself.
// The Layout invoker consumes all of it while building the layout's root scope. Named
// arguments land in the slots of the matching `@name` symbols and blocks in `&default`,
// `&inverse` and `&attrs`. When the layout contains a partial, the same bindings are also
// kept by name in an eval scope, so the partial can see them.
//
// Yield runs the caller's block in the caller's scope, binding block parameters from the
// values the yield pushed. Partial runs a partial in a fresh root scope that shares the
// outer self, caller and eval scope, and carries the outer locals as a partial map.

//! Component opcodes and dynamic block invokers.

use super::append::AppendVM;
use super::arguments::Arguments;
use super::register_file::Register;
use super::scope::ScopeSlot;
use super::stack::StackValue;
use super::updating::{DidUpdateLayout, UpdateComponent, UpdatingOpcode};
use super::Scope;
use crate::component::ComponentState;
use crate::core::{VmError, VmResult};
use crate::program::{CompiledBlock, Invoker};
use crate::reference::{undefined_reference, ReferenceRef};
use hashbrown::HashMap;
use std::rc::Rc;

const ATTRS: &str = "&attrs";
const DEFAULT: &str = "&default";
const INVERSE: &str = "&inverse";

impl AppendVM {
    /// Component state held in `register`.
    pub(super) fn component_state(&self, register: u32) -> VmResult<Rc<ComponentState>> {
        self.registers
            .fetch(Register::from_operand(register)?, &self.stack)
            .into_component()
    }

    /// Let the manager rewrite the arguments on top of the stack.
    pub(super) fn prepare_args(&mut self, register: u32) -> VmResult<()> {
        let state = self.component_state(register)?;
        let args = self.stack.pop()?.into_args()?;
        let args = match state
            .manager
            .prepare_args(&state.definition, args.captured())
        {
            Some(prepared) => {
                args.clear(&mut self.stack)?;
                Arguments::push_layout(&mut self.stack, &prepared);
                Rc::new(Arguments::setup(&self.stack, false)?)
            }
            None => args,
        };
        self.stack.push(StackValue::Args(args));
        Ok(())
    }

    /// `flags` bit 0: a default block was passed.
    pub(super) fn create_component(&mut self, flags: u32, register: u32) -> VmResult<()> {
        let state = self.component_state(register)?;
        let args = self.stack.pop()?.into_args()?;
        let caller_self = self.scope()?.get_self()?;
        let dynamic_scope = self.dynamic_scope()?.clone();
        let component = state.manager.create(
            &self.env,
            &state.definition,
            args.capture(),
            &dynamic_scope,
            &caller_self,
            flags & 1 != 0,
        )?;
        state.set_component(component.clone());
        log::debug!("created component {}", state.definition.name());

        let tag = state.manager.get_tag(&component);
        if !tag.is_const() {
            self.update_with(UpdatingOpcode::UpdateComponent(UpdateComponent {
                tag,
                name: Rc::from(state.definition.name()),
                component,
                manager: state.manager.clone(),
                dynamic_scope,
            }))?;
        }
        Ok(())
    }

    pub(super) fn did_render_layout(&mut self, register: u32) -> VmResult<()> {
        let state = self.component_state(register)?;
        let component = state.component()?;
        let bounds = self.builder.pop_block()?;
        state.manager.did_render_layout(&component, &bounds);
        self.env.did_create(component.clone(), state.manager.clone());
        self.update_with(UpdatingOpcode::DidUpdateLayout(DidUpdateLayout {
            manager: state.manager.clone(),
            component,
            bounds,
        }))?;
        Ok(())
    }

    pub(super) fn invoke(
        &mut self,
        invoker: &Invoker,
        block: Option<Rc<CompiledBlock>>,
    ) -> VmResult<()> {
        match invoker {
            Invoker::Layout { attrs } => self.invoke_layout(block, attrs.clone()),
            Invoker::Yield { caller_count } => self.invoke_yield(block, *caller_count),
            Invoker::Partial {
                outer_symbols,
                eval_info,
            } => self.invoke_partial(block, outer_symbols, eval_info),
        }
    }

    fn invoke_layout(
        &mut self,
        block: Option<Rc<CompiledBlock>>,
        attrs: Option<Rc<CompiledBlock>>,
    ) -> VmResult<()> {
        let block = block.ok_or(VmError::MissingFrame {
            what: "component layout",
        })?;
        let scope = self.push_root_scope(block.symbols.len(), true)?;
        scope.bind_self(self.stack.pop_reference()?);

        let mut lookup: Option<HashMap<Rc<str>, ScopeSlot>> = block.has_eval.then(HashMap::new);
        let mut bind_block = |name: &str, value: Option<Rc<CompiledBlock>>| -> VmResult<()> {
            if let Some(slot) = block.symbol_slot(name) {
                scope.bind_block(slot, value.clone())?;
            }
            if let Some(lookup) = lookup.as_mut() {
                lookup.insert(Rc::from(name), ScopeSlot::Block(value));
            }
            Ok(())
        };
        bind_block(ATTRS, attrs)?;

        let names = self.stack.pop()?.into_names()?;
        let mut named = Vec::with_capacity(names.len());
        for name in names.iter().rev() {
            named.push((name.clone(), self.stack.pop_reference()?));
        }
        let count = self.stack.pop()?.into_int()?;
        self.stack.pop_n(count.max(0) as usize)?;
        let inverse = self.stack.pop()?.into_block()?;
        let default = self.stack.pop()?.into_block()?;
        bind_block(INVERSE, inverse)?;
        bind_block(DEFAULT, default)?;

        for (name, reference) in named {
            if let Some(slot) = block.symbol_slot(&name) {
                scope.bind_symbol(slot, reference.clone())?;
            }
            if let Some(lookup) = lookup.as_mut() {
                lookup.insert(name, ScopeSlot::Reference(reference));
            }
        }
        scope.bind_eval_scope(lookup.map(Rc::new));

        self.push_frame();
        self.call(block.handle)
    }

    fn invoke_yield(
        &mut self,
        block: Option<Rc<CompiledBlock>>,
        caller_count: usize,
    ) -> VmResult<()> {
        let Some(block) = block else {
            // Nothing to run; the frame and scope are popped right after.
            self.push_frame();
            self.push_caller_scope(false)?;
            return Ok(());
        };

        self.push_frame();
        let scope = self.push_caller_scope(!block.parameters.is_empty())?;
        for (i, slot) in block.parameters.iter().enumerate() {
            let reference: ReferenceRef = if i < caller_count {
                self.stack
                    .from_base((caller_count - i) as isize)?
                    .into_reference()?
            } else {
                undefined_reference()
            };
            scope.bind_symbol(*slot, reference)?;
        }
        self.call(block.handle)
    }

    fn invoke_partial(
        &mut self,
        block: Option<Rc<CompiledBlock>>,
        outer_symbols: &[Rc<str>],
        eval_info: &[usize],
    ) -> VmResult<()> {
        let block = block.ok_or(VmError::MissingFrame { what: "partial" })?;
        let outer = self.scope()?.clone();
        let scope = Scope::root(outer.get_self()?, block.symbols.len());
        scope.bind_caller_scope(outer.caller_scope());
        let eval_scope = outer.eval_scope();
        scope.bind_eval_scope(eval_scope.clone());

        let mut locals: HashMap<Rc<str>, ReferenceRef> = outer
            .partial_map()
            .map(|map| (*map).clone())
            .unwrap_or_default();
        for &slot in eval_info {
            let Some(name) = slot.checked_sub(1).and_then(|i| outer_symbols.get(i)) else {
                continue;
            };
            if let Ok(reference) = outer.get_symbol(slot) {
                locals.insert(name.clone(), reference);
            }
        }

        if let Some(eval_scope) = eval_scope {
            for (name, value) in eval_scope.iter() {
                let Some(slot) = block.symbol_slot(name) else {
                    continue;
                };
                match value {
                    ScopeSlot::Reference(reference) => scope.bind_symbol(slot, reference.clone())?,
                    ScopeSlot::Block(inner) => scope.bind_block(slot, inner.clone())?,
                }
            }
        }
        scope.bind_partial_map(Rc::new(locals));
        self.scopes.push(scope);

        self.push_frame();
        self.call(block.handle)
    }
}
