//! Element modifiers: `{{action ...}}`-style hooks attached to an element.
//!
//! Modifiers are created while the element is being built, but installed
//! only when the transaction commits, after the DOM they observe exists.

use crate::builder::Destroyable;
use crate::dom::{DomOperations, NodeRef};
use crate::reference::Tag;
use crate::vm::{CapturedArguments, DynamicScope};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// One modifier attached to one element.
pub struct ModifierInstance {
    pub element: NodeRef,
    pub args: CapturedArguments,
    pub dynamic_scope: DynamicScope,
    pub dom: Rc<dyn DomOperations>,
    /// Manager-owned state.
    pub state: RefCell<Option<Box<dyn Any>>>,
}

pub trait ModifierManager {
    fn create(
        &self,
        element: &NodeRef,
        args: CapturedArguments,
        dynamic_scope: &DynamicScope,
        dom: Rc<dyn DomOperations>,
    ) -> Rc<ModifierInstance> {
        Rc::new(ModifierInstance {
            element: element.clone(),
            args,
            dynamic_scope: dynamic_scope.clone(),
            dom,
            state: RefCell::new(None),
        })
    }

    fn get_tag(&self, modifier: &ModifierInstance) -> Tag {
        modifier.args.tag()
    }

    fn install(&self, modifier: &ModifierInstance);

    fn update(&self, modifier: &ModifierInstance);

    fn get_destructor(&self, _modifier: &Rc<ModifierInstance>) -> Option<Rc<dyn Destroyable>> {
        None
    }
}

type Hook = Rc<dyn Fn(&ModifierInstance)>;

/// Modifier manager assembled from closures.
pub struct SimpleModifierManager {
    install: Hook,
    update: Hook,
    destroy: Option<Hook>,
}

impl SimpleModifierManager {
    pub fn new(
        install: impl Fn(&ModifierInstance) + 'static,
        update: impl Fn(&ModifierInstance) + 'static,
    ) -> Self {
        Self {
            install: Rc::new(install),
            update: Rc::new(update),
            destroy: None,
        }
    }

    pub fn on_destroy(mut self, destroy: impl Fn(&ModifierInstance) + 'static) -> Self {
        self.destroy = Some(Rc::new(destroy));
        self
    }
}

struct ModifierDestructor {
    modifier: Rc<ModifierInstance>,
    hook: Hook,
}

impl Destroyable for ModifierDestructor {
    fn destroy(&self) {
        (self.hook)(&self.modifier);
    }
}

impl ModifierManager for SimpleModifierManager {
    fn install(&self, modifier: &ModifierInstance) {
        (self.install)(modifier);
    }

    fn update(&self, modifier: &ModifierInstance) {
        (self.update)(modifier);
    }

    fn get_destructor(&self, modifier: &Rc<ModifierInstance>) -> Option<Rc<dyn Destroyable>> {
        self.destroy.as_ref().map(|hook| {
            Rc::new(ModifierDestructor {
                modifier: modifier.clone(),
                hook: hook.clone(),
            }) as Rc<dyn Destroyable>
        })
    }
}
