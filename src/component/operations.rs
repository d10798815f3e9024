//! Attributes collected for a component's top-level element.
//!
//! Between `OpenElementWithOperations` and `FlushElement` the layout's own
//! attributes and the invocation's `...attributes` are buffered here instead
//! of being written to the element. A later write to the same name replaces
//! the earlier value but keeps its position; `class` values accumulate.

use crate::reference::{ClassListReference, ReferenceRef};
use std::rc::Rc;

struct DeferredAttribute {
    name: Rc<str>,
    value: ReferenceRef,
    namespace: Option<Rc<str>>,
}

#[derive(Default)]
pub struct ComponentElementOperations {
    attributes: Vec<DeferredAttribute>,
    classes: Vec<ReferenceRef>,
}

impl ComponentElementOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attribute(&mut self, name: &str, value: ReferenceRef, namespace: Option<Rc<str>>) {
        if name == "class" {
            self.classes.push(value.clone());
        }
        match self.attributes.iter_mut().find(|a| &*a.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.namespace = namespace;
            }
            None => self.attributes.push(DeferredAttribute {
                name: Rc::from(name),
                value,
                namespace,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Buffered attributes in insertion order, `class` merged into one
    /// reference.
    pub fn take(&mut self) -> Vec<(Rc<str>, ReferenceRef, Option<Rc<str>>)> {
        let classes = std::mem::take(&mut self.classes);
        std::mem::take(&mut self.attributes)
            .into_iter()
            .map(|attribute| {
                let value = if &*attribute.name == "class" {
                    Rc::new(ClassListReference::new(classes.clone())) as ReferenceRef
                } else {
                    attribute.value
                };
                (attribute.name, value, attribute.namespace)
            })
            .collect()
    }
}
