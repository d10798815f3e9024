//! Render entry: the template iterator and the result it produces.

use super::append::{AppendVM, Step, UpdatingTarget};
use super::updating::{FrameHandler, ListId, UpdatingVM};
use crate::builder::BlockTracker;
use crate::core::{RerenderOptions, VmError, VmResult};
use crate::dom::bounds::clear;
use crate::dom::{Bounds, NodeRef};
use crate::environment::Environment;
use std::rc::Rc;

/// Outcome of one [`TemplateIterator::next`] call.
pub enum IteratorResult {
    Continue,
    Done(RenderResult),
}

/// A first render in progress. Not restartable once finished.
pub struct TemplateIterator {
    vm: AppendVM,
    owns_transaction: bool,
    done: bool,
}

impl TemplateIterator {
    pub(crate) fn new(vm: AppendVM, owns_transaction: bool) -> Self {
        Self {
            vm,
            owns_transaction,
            done: false,
        }
    }

    /// Execute one instruction.
    pub fn next(&mut self) -> VmResult<IteratorResult> {
        if self.done {
            return Err(VmError::Unsupported {
                reason: "advancing a finished template iterator".into(),
            });
        }
        let step = match self.vm.next() {
            Ok(step) => step,
            Err(error) => {
                self.done = true;
                if self.owns_transaction {
                    self.vm.env().rollback();
                }
                return Err(error);
            }
        };
        let (updating, bounds) = match step {
            Step::Continue => return Ok(IteratorResult::Continue),
            Step::Done { updating, bounds } => (updating, bounds),
        };
        self.done = true;

        let env = self.vm.env().clone();
        let UpdatingTarget::List(updating) = updating else {
            if self.owns_transaction {
                env.rollback();
            }
            return Err(VmError::MissingFrame {
                what: "root updating list",
            });
        };
        if self.owns_transaction {
            env.commit();
        }
        log::debug!(
            "render complete: {} top-level updating opcodes",
            env.arena().borrow().len(updating)
        );
        Ok(IteratorResult::Done(RenderResult {
            env,
            updating,
            bounds,
        }))
    }

    /// Run to completion.
    pub fn sync(mut self) -> VmResult<RenderResult> {
        loop {
            if let IteratorResult::Done(result) = self.next()? {
                return Ok(result);
            }
        }
    }
}

/// A rendered template: its DOM range and the program that updates it.
pub struct RenderResult {
    env: Rc<Environment>,
    updating: ListId,
    bounds: Rc<BlockTracker>,
}

impl RenderResult {
    pub fn env(&self) -> &Rc<Environment> {
        &self.env
    }

    pub fn rerender(&self) -> VmResult<()> {
        self.rerender_with(RerenderOptions::default())
    }

    pub fn rerender_with(&self, options: RerenderOptions) -> VmResult<()> {
        let owns_transaction = !self.env.in_transaction();
        if owns_transaction {
            self.env.begin();
        }
        let mut vm = UpdatingVM::new(self.env.clone(), options.always_revalidate);
        match vm.execute(self.updating, FrameHandler::Root) {
            Ok(()) => {
                if owns_transaction {
                    self.env.commit();
                }
                log::debug!("rerender complete at revision {}", self.env.clock().current());
                Ok(())
            }
            Err(error) => {
                if owns_transaction {
                    self.env.rollback();
                }
                Err(error)
            }
        }
    }

    /// Tear down: run destructors, remove the rendered nodes and free the
    /// updating program.
    pub fn destroy(self) {
        let owns_transaction = !self.env.in_transaction();
        if owns_transaction {
            self.env.begin();
        }
        self.env.did_destroy(self.bounds.clone());
        clear(self.env.dom().as_ref(), self.bounds.as_ref());
        self.env.arena().borrow_mut().free_list(self.updating);
        if owns_transaction {
            self.env.commit();
        }
    }

    pub fn bounds(&self) -> &Rc<BlockTracker> {
        &self.bounds
    }

    pub fn parent_element(&self) -> NodeRef {
        self.bounds.parent_element()
    }

    pub fn first_node(&self) -> Option<NodeRef> {
        self.bounds.first_node()
    }

    pub fn last_node(&self) -> Option<NodeRef> {
        self.bounds.last_node()
    }
}
