// Helpers turn captured arguments into a reference. The VM calls them with itself so that
// builtins can read the dynamic scope or reach the environment; user helpers are usually
// plain functions of argument values, which SimpleHelper adapts into a reference computed
// against the arguments' combined tag.
//
// Three helpers are always registered. `-get-dynamic-var` reads a `-with-dynamic-vars`
// binding and follows it when it is rebound. `component` resolves a component definition
// from a name so `{{component}}` can invoke whatever its first argument names. The partial
// lookup helper normalizes the value naming a partial so that a falsy name renders nothing.

//! Helpers and the builtin helper set.

use crate::core::VmResult;
use crate::environment::Environment;
use crate::reference::{combine, ComputedReference, Reference, ReferenceRef, Tag, UpdatableTag};
use crate::value::Value;
use crate::vm::{AppendVM, CapturedArguments, DynamicScope};
use std::rc::{Rc, Weak};

pub const GET_DYNAMIC_VAR: &str = "-get-dynamic-var";
pub const COMPONENT: &str = "component";
pub(crate) const LOOKUP_PARTIAL: &str = "-lookup-partial";

pub trait Helper {
    fn call(&self, vm: &AppendVM, args: &CapturedArguments) -> VmResult<ReferenceRef>;
}

/// Helper computed from argument values by a closure.
pub struct SimpleHelper {
    compute: Rc<dyn Fn(&CapturedArguments) -> Value>,
}

impl SimpleHelper {
    pub fn new(compute: impl Fn(&CapturedArguments) -> Value + 'static) -> Self {
        Self {
            compute: Rc::new(compute),
        }
    }
}

impl Helper for SimpleHelper {
    fn call(&self, _vm: &AppendVM, args: &CapturedArguments) -> VmResult<ReferenceRef> {
        let compute = self.compute.clone();
        let captured = args.clone();
        Ok(Rc::new(ComputedReference::new(args.tag(), move || {
            compute(&captured)
        })))
    }
}

/// Current value of a dynamic variable, following rebinding of its name.
struct DynamicVarReference {
    scope: DynamicScope,
    name: ReferenceRef,
    inner: Rc<UpdatableTag>,
    tag: Tag,
}

impl DynamicVarReference {
    fn new(env: &Environment, scope: DynamicScope, name: ReferenceRef) -> Self {
        let inner = UpdatableTag::new(env.clock(), Tag::Constant);
        let tag = combine([name.tag(), inner.tag()]);
        Self {
            scope,
            name,
            inner,
            tag,
        }
    }
}

impl Reference for DynamicVarReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Value {
        let name = self.name.value().to_display_string();
        match self.scope.get(&name) {
            Some(reference) => {
                self.inner.update(reference.tag());
                reference.value()
            }
            None => {
                self.inner.update(Tag::Constant);
                Value::Undefined
            }
        }
    }
}

struct GetDynamicVar;

impl Helper for GetDynamicVar {
    fn call(&self, vm: &AppendVM, args: &CapturedArguments) -> VmResult<ReferenceRef> {
        let scope = vm.dynamic_scope()?.clone();
        Ok(Rc::new(DynamicVarReference::new(vm.env(), scope, args.at(0))))
    }
}

/// Resolves its first argument to a component definition.
struct ComponentHelper;

impl Helper for ComponentHelper {
    fn call(&self, vm: &AppendVM, args: &CapturedArguments) -> VmResult<ReferenceRef> {
        let env: Weak<Environment> = Rc::downgrade(vm.env());
        let spec = args.at(0);
        let tag = spec.tag();
        Ok(Rc::new(ComputedReference::new(tag, move || {
            match spec.value() {
                Value::Component(definition) => Value::Component(definition),
                Value::String(name) => env
                    .upgrade()
                    .and_then(|env| env.lookup_component(&name))
                    .map(Value::Component)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }
        })))
    }
}

/// Name of the partial to render, null when the name is falsy.
struct LookupPartial;

impl Helper for LookupPartial {
    fn call(&self, _vm: &AppendVM, args: &CapturedArguments) -> VmResult<ReferenceRef> {
        let name = args.at(0);
        Ok(Rc::new(ComputedReference::new(name.tag(), move || {
            let value = name.value();
            if value.is_truthy() {
                Value::from(value.to_display_string())
            } else {
                Value::Null
            }
        })))
    }
}

pub(crate) fn register_builtins(env: &Environment) {
    env.register_helper(GET_DYNAMIC_VAR, Rc::new(GetDynamicVar));
    env.register_helper(COMPONENT, Rc::new(ComponentHelper));
    env.register_helper(LOOKUP_PARTIAL, Rc::new(LookupPartial));
}
