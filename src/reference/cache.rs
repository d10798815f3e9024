//! Revalidation cache over a reference.

use super::reference::ReferenceRef;
use super::tag::{Revision, Tag};
use crate::value::Value;
use std::cell::{Cell, RefCell};

/// Outcome of [`ReferenceCache::revalidate`].
#[derive(Debug)]
pub enum Revalidation {
    NotModified,
    Modified(Value),
}

/// Remembers the last value read through a reference and reports whether a
/// later read produced a different one.
pub struct ReferenceCache {
    reference: ReferenceRef,
    tag: Tag,
    last_value: RefCell<Option<Value>>,
    last_revision: Cell<Revision>,
}

impl ReferenceCache {
    pub fn new(reference: ReferenceRef) -> Self {
        let tag = reference.tag();
        Self {
            reference,
            tag,
            last_value: RefCell::new(None),
            last_revision: Cell::new(0),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag.clone()
    }

    /// Last value, reading the reference the first time.
    pub fn peek(&self) -> Value {
        if let Some(value) = &*self.last_value.borrow() {
            return value.clone();
        }
        self.initialize()
    }

    pub fn revalidate(&self) -> Revalidation {
        if self.last_value.borrow().is_none() {
            return Revalidation::Modified(self.initialize());
        }
        if self.tag.validate(self.last_revision.get()) {
            return Revalidation::NotModified;
        }

        let current = self.reference.value();
        self.last_revision.set(self.tag.value());
        let unchanged = self
            .last_value
            .borrow()
            .as_ref()
            .is_some_and(|last| last.identical(&current));
        if unchanged {
            return Revalidation::NotModified;
        }
        *self.last_value.borrow_mut() = Some(current.clone());
        Revalidation::Modified(current)
    }

    fn initialize(&self) -> Value {
        let value = self.reference.value();
        self.last_revision.set(self.tag.value());
        *self.last_value.borrow_mut() = Some(value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::reference::UpdatableReference;
    use crate::reference::tag::RevisionClock;

    #[test]
    fn test_revalidate() {
        let clock = RevisionClock::new();
        let reference = UpdatableReference::new(Value::from(true), &clock);
        let cache = ReferenceCache::new(reference.clone());

        assert!(cache.peek().is_truthy());
        assert!(matches!(cache.revalidate(), Revalidation::NotModified));

        reference.update(Value::from(false));
        match cache.revalidate() {
            Revalidation::Modified(value) => assert!(!value.is_truthy()),
            other => panic!("expected modification, got {other:?}"),
        }
        assert!(matches!(cache.revalidate(), Revalidation::NotModified));
    }

    #[test]
    fn test_same_value_after_dirty_is_not_modified() {
        let clock = RevisionClock::new();
        let reference = UpdatableReference::new(Value::from("a"), &clock);
        let cache = ReferenceCache::new(reference.clone());
        cache.peek();

        reference.update(Value::from("b"));
        reference.update(Value::from("a"));
        assert!(matches!(cache.revalidate(), Revalidation::NotModified));
    }
}
