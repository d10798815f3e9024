//! Lifecycle side effects batched across one VM pass.

use crate::builder::Destroyable;
use crate::component::{Component, ComponentManager, ModifierInstance, ModifierManager};
use std::rc::Rc;

type ComponentHook = (Component, Rc<dyn ComponentManager>);
type ModifierHook = (Rc<ModifierInstance>, Rc<dyn ModifierManager>);

/// Hooks collected while a render or rerender pass runs.
#[derive(Default)]
pub struct Transaction {
    created: Vec<ComponentHook>,
    updated: Vec<ComponentHook>,
    destructors: Vec<Rc<dyn Destroyable>>,
    installs: Vec<ModifierHook>,
    updates: Vec<ModifierHook>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn did_create(&mut self, component: Component, manager: Rc<dyn ComponentManager>) {
        self.created.push((component, manager));
    }

    pub fn did_update(&mut self, component: Component, manager: Rc<dyn ComponentManager>) {
        self.updated.push((component, manager));
    }

    pub fn did_destroy(&mut self, destroyable: Rc<dyn Destroyable>) {
        self.destructors.push(destroyable);
    }

    pub fn schedule_install_modifier(
        &mut self,
        modifier: Rc<ModifierInstance>,
        manager: Rc<dyn ModifierManager>,
    ) {
        self.installs.push((modifier, manager));
    }

    pub fn schedule_update_modifier(
        &mut self,
        modifier: Rc<ModifierInstance>,
        manager: Rc<dyn ModifierManager>,
    ) {
        self.updates.push((modifier, manager));
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.destructors.is_empty()
            && self.installs.is_empty()
            && self.updates.is_empty()
    }

    /// Run every hook: created components, updated components, destructors,
    /// modifier installs, then modifier updates.
    pub fn commit(self) {
        log::debug!(
            "commit: {} created, {} updated, {} destroyed, {} installs, {} modifier updates",
            self.created.len(),
            self.updated.len(),
            self.destructors.len(),
            self.installs.len(),
            self.updates.len()
        );
        for (component, manager) in &self.created {
            manager.did_create(component);
        }
        for (component, manager) in &self.updated {
            manager.did_update(component);
        }
        for destroyable in &self.destructors {
            destroyable.destroy();
        }
        for (modifier, manager) in &self.installs {
            manager.install(modifier);
        }
        for (modifier, manager) in &self.updates {
            manager.update(modifier);
        }
    }
}
