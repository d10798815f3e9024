// Components pair a layout template with a manager. The VM never looks inside a component
// instance; every lifecycle step goes through the ComponentManager capability set, so an
// embedding can bring its own component model. BasicComponentManager is the model the
// render binary and the tests use: self is an observable object whose keys mirror the
// named arguments, refreshed on update so that only the keys whose values moved dirty.
//
// ComponentState is what the VM carries on its stack and in `s0` while invoking a
// component: the definition, its manager and, once created, the instance.

//! Component definitions, managers and instances.

pub mod modifier;
pub mod operations;

pub use modifier::{ModifierInstance, ModifierManager, SimpleModifierManager};
pub use operations::ComponentElementOperations;

use crate::builder::{BlockTracker, Destroyable};
use crate::core::{VmError, VmResult};
use crate::dom::NodeRef;
use crate::environment::Environment;
use crate::program::CompiledBlock;
use crate::reference::{ConstReference, ReferenceRef, Tag};
use crate::template::Template;
use crate::value::{ObjectModel, Value};
use crate::vm::{CapturedArguments, DynamicScope};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A live component.
pub type Component = Rc<ComponentInstance>;

pub struct ComponentInstance {
    definition: Rc<ComponentDefinition>,
    args: RefCell<CapturedArguments>,
    self_object: Rc<ObjectModel>,
    self_ref: ReferenceRef,
    element: RefCell<Option<NodeRef>>,
    has_default_block: bool,
}

impl ComponentInstance {
    pub fn new(
        definition: Rc<ComponentDefinition>,
        args: CapturedArguments,
        self_object: Rc<ObjectModel>,
        has_default_block: bool,
    ) -> Component {
        let self_ref = ConstReference::create(Value::Object(self_object.clone()));
        Rc::new(Self {
            definition,
            args: RefCell::new(args),
            self_object,
            self_ref,
            element: RefCell::new(None),
            has_default_block,
        })
    }

    pub fn definition(&self) -> &Rc<ComponentDefinition> {
        &self.definition
    }

    pub fn args(&self) -> CapturedArguments {
        self.args.borrow().clone()
    }

    pub fn self_object(&self) -> &Rc<ObjectModel> {
        &self.self_object
    }

    pub fn self_ref(&self) -> ReferenceRef {
        self.self_ref.clone()
    }

    /// Top-level element of the layout, once it has been created.
    pub fn element(&self) -> Option<NodeRef> {
        self.element.borrow().clone()
    }

    pub fn set_element(&self, element: NodeRef) {
        *self.element.borrow_mut() = Some(element);
    }

    pub fn has_default_block(&self) -> bool {
        self.has_default_block
    }
}

/// Lifecycle capabilities of a component model.
///
/// Hooks with default bodies are optional.
pub trait ComponentManager {
    /// Replace the arguments before the component sees them.
    fn prepare_args(
        &self,
        _definition: &ComponentDefinition,
        _args: &CapturedArguments,
    ) -> Option<CapturedArguments> {
        None
    }

    fn create(
        &self,
        env: &Environment,
        definition: &Rc<ComponentDefinition>,
        args: CapturedArguments,
        dynamic_scope: &DynamicScope,
        caller_self: &ReferenceRef,
        has_default_block: bool,
    ) -> VmResult<Component>;

    fn get_self(&self, component: &Component) -> ReferenceRef;

    /// Tag that invalidates when the component needs `update`.
    fn get_tag(&self, component: &Component) -> Tag;

    fn layout_for(
        &self,
        definition: &ComponentDefinition,
        _component: &Component,
        env: &Environment,
    ) -> VmResult<Rc<CompiledBlock>> {
        definition.layout().compile_layout(env)
    }

    fn did_create_element(
        &self,
        _component: &Component,
        _element: &NodeRef,
        _operations: &mut ComponentElementOperations,
    ) {
    }

    fn did_render_layout(&self, _component: &Component, _bounds: &Rc<BlockTracker>) {}

    fn did_create(&self, _component: &Component) {}

    fn update(&self, _component: &Component, _dynamic_scope: &DynamicScope) {}

    fn did_update_layout(&self, _component: &Component, _bounds: &Rc<BlockTracker>) {}

    fn did_update(&self, _component: &Component) {}

    fn get_destructor(&self, _component: &Component) -> Option<Rc<dyn Destroyable>> {
        None
    }
}

pub struct ComponentDefinition {
    name: Rc<str>,
    manager: Rc<dyn ComponentManager>,
    layout: Rc<Template>,
}

impl ComponentDefinition {
    pub fn new(
        name: &str,
        manager: Rc<dyn ComponentManager>,
        layout: Rc<Template>,
    ) -> Rc<ComponentDefinition> {
        Rc::new(Self {
            name: Rc::from(name),
            manager,
            layout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Rc<dyn ComponentManager> {
        &self.manager
    }

    pub fn layout(&self) -> &Rc<Template> {
        &self.layout
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .finish()
    }
}

/// Component being invoked: what the VM keeps in `s0`.
pub struct ComponentState {
    pub definition: Rc<ComponentDefinition>,
    pub manager: Rc<dyn ComponentManager>,
    component: RefCell<Option<Component>>,
}

impl ComponentState {
    pub fn new(definition: Rc<ComponentDefinition>) -> Rc<Self> {
        let manager = definition.manager().clone();
        Rc::new(Self {
            definition,
            manager,
            component: RefCell::new(None),
        })
    }

    pub fn component(&self) -> VmResult<Component> {
        self.component
            .borrow()
            .clone()
            .ok_or(VmError::MissingFrame {
                what: "component instance",
            })
    }

    pub fn set_component(&self, component: Component) {
        *self.component.borrow_mut() = Some(component);
    }
}

/// Self is an object with one key per named argument.
#[derive(Default)]
pub struct BasicComponentManager;

impl BasicComponentManager {
    fn refresh(component: &Component) {
        for (name, value) in component.args().named_values() {
            component.self_object().set(&name, value);
        }
    }
}

impl ComponentManager for BasicComponentManager {
    fn create(
        &self,
        env: &Environment,
        definition: &Rc<ComponentDefinition>,
        args: CapturedArguments,
        _dynamic_scope: &DynamicScope,
        _caller_self: &ReferenceRef,
        has_default_block: bool,
    ) -> VmResult<Component> {
        let object = ObjectModel::from_pairs(env.clock(), args.named_values());
        Ok(ComponentInstance::new(
            definition.clone(),
            args,
            object,
            has_default_block,
        ))
    }

    fn get_self(&self, component: &Component) -> ReferenceRef {
        component.self_ref()
    }

    fn get_tag(&self, component: &Component) -> Tag {
        component.args().tag()
    }

    fn did_create_element(
        &self,
        component: &Component,
        element: &NodeRef,
        _operations: &mut ComponentElementOperations,
    ) {
        component.set_element(element.clone());
    }

    fn update(&self, component: &Component, _dynamic_scope: &DynamicScope) {
        Self::refresh(component);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{RevisionClock, UpdatableReference};

    #[test]
    fn test_basic_update_refreshes_self() {
        let env = Environment::new();
        let layout = Template::from_statements("layout", vec![], &[]);
        let definition = ComponentDefinition::new("x-item", Rc::new(BasicComponentManager), layout);
        let clock: &RevisionClock = env.clock();
        let title = UpdatableReference::new(Value::from("a"), clock);
        let title_ref: ReferenceRef = title.clone();
        let args = CapturedArguments::new(vec![], vec![(Rc::from("title"), title_ref)]);

        let manager = BasicComponentManager;
        let component = manager
            .create(
                &env,
                &definition,
                args,
                &DynamicScope::new(),
                &crate::reference::null_reference(),
                false,
            )
            .unwrap();
        assert_eq!(component.self_object().get("title").to_display_string(), "a");

        let tag = manager.get_tag(&component);
        let snapshot = tag.value();
        title.update(Value::from("b"));
        assert!(!tag.validate(snapshot));
        manager.update(&component, &DynamicScope::new());
        assert_eq!(component.self_object().get("title").to_display_string(), "b");
    }

    #[test]
    fn test_state_requires_creation() {
        let env = Environment::new();
        let layout = Template::from_statements("layout", vec![], &[]);
        let definition = ComponentDefinition::new("x-item", Rc::new(BasicComponentManager), layout);
        let state = ComponentState::new(definition);
        assert!(state.component().is_err());
        assert_eq!(state.definition.name(), "x-item");
    }
}
