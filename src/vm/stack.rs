//! The evaluation stack and the values it holds.

use super::arguments::Arguments;
use crate::component::{ComponentElementOperations, ComponentState};
use crate::core::{VmError, VmResult};
use crate::program::CompiledBlock;
use crate::reference::{ReferenceIterator, ReferenceRef};
use crate::template::Template;
use std::cell::RefCell;
use std::rc::Rc;

/// A value on the evaluation stack or in a scratch register.
#[derive(Clone, Default)]
pub enum StackValue {
    #[default]
    Null,
    Int(isize),
    Reference(ReferenceRef),
    Block(Option<Rc<CompiledBlock>>),
    Names(Rc<[Rc<str>]>),
    Args(Rc<Arguments>),
    Iterator(Rc<ReferenceIterator>),
    Component(Rc<ComponentState>),
    Operations(Rc<RefCell<ComponentElementOperations>>),
    /// A partial looked up by name, compiled on demand.
    Partial(Rc<Template>),
}

macro_rules! stack_accessor {
    ($name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $name(self) -> VmResult<$ty> {
            match self {
                StackValue::$variant(value) => Ok(value),
                other => Err(VmError::TypeMismatch {
                    expected: $expected,
                    found: other.kind_name(),
                }),
            }
        }
    };
}

impl StackValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StackValue::Null => "null",
            StackValue::Int(_) => "integer",
            StackValue::Reference(_) => "reference",
            StackValue::Block(_) => "block",
            StackValue::Names(_) => "names",
            StackValue::Args(_) => "arguments",
            StackValue::Iterator(_) => "iterator",
            StackValue::Component(_) => "component state",
            StackValue::Operations(_) => "element operations",
            StackValue::Partial(_) => "partial",
        }
    }

    stack_accessor!(into_reference, Reference, ReferenceRef, "reference");
    stack_accessor!(into_int, Int, isize, "integer");
    stack_accessor!(into_names, Names, Rc<[Rc<str>]>, "names");
    stack_accessor!(into_args, Args, Rc<Arguments>, "arguments");
    stack_accessor!(into_iterator, Iterator, Rc<ReferenceIterator>, "iterator");
    stack_accessor!(into_component, Component, Rc<ComponentState>, "component state");

    /// Block slot value; `Null` reads as the absent block.
    pub fn into_block(self) -> VmResult<Option<Rc<CompiledBlock>>> {
        match self {
            StackValue::Block(block) => Ok(block),
            StackValue::Null => Ok(None),
            other => Err(VmError::TypeMismatch {
                expected: "block",
                found: other.kind_name(),
            }),
        }
    }
}

impl From<ReferenceRef> for StackValue {
    fn from(reference: ReferenceRef) -> Self {
        StackValue::Reference(reference)
    }
}

/// Operand stack with a frame pointer. `sp` always indexes the top value.
pub struct EvaluationStack {
    stack: Vec<StackValue>,
    fp: isize,
}

impl EvaluationStack {
    pub fn empty() -> Self {
        Self {
            stack: Vec::new(),
            fp: 0,
        }
    }

    /// Stack holding a captured snapshot, with the frame pointer at 0.
    pub fn restore(snapshot: Vec<StackValue>) -> Self {
        Self {
            stack: snapshot,
            fp: 0,
        }
    }

    pub fn fp(&self) -> isize {
        self.fp
    }

    pub fn sp(&self) -> isize {
        self.stack.len() as isize - 1
    }

    pub fn set_fp(&mut self, fp: isize) {
        self.fp = fp;
    }

    /// Drop everything above `sp`.
    pub fn set_sp(&mut self, sp: isize) -> VmResult<()> {
        if sp < -1 || sp > self.sp() {
            return Err(VmError::StackUnderflow { position: sp });
        }
        self.stack.truncate((sp + 1) as usize);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn push(&mut self, value: impl Into<StackValue>) {
        self.stack.push(value.into());
    }

    /// Push a copy of the value at an absolute position.
    pub fn dup(&mut self, position: isize) -> VmResult<()> {
        let value = self.at(position)?;
        self.stack.push(value);
        Ok(())
    }

    /// Remove `count` values and return the one that was on top.
    pub fn pop_n(&mut self, count: usize) -> VmResult<StackValue> {
        let len = self.stack.len();
        if count > len {
            return Err(VmError::StackUnderflow {
                position: len as isize - count as isize - 1,
            });
        }
        let top = if count == 0 {
            StackValue::Null
        } else {
            self.stack[len - 1].clone()
        };
        self.stack.truncate(len - count);
        Ok(top)
    }

    pub fn pop(&mut self) -> VmResult<StackValue> {
        self.stack
            .pop()
            .ok_or(VmError::StackUnderflow { position: -1 })
    }

    pub fn pop_reference(&mut self) -> VmResult<ReferenceRef> {
        self.pop()?.into_reference()
    }

    pub fn peek(&self) -> VmResult<StackValue> {
        self.from_top(0)
    }

    pub fn from_base(&self, offset: isize) -> VmResult<StackValue> {
        self.at(self.fp - offset)
    }

    pub fn from_top(&self, offset: isize) -> VmResult<StackValue> {
        self.at(self.sp() - offset)
    }

    /// The top `count` values, bottom first.
    pub fn capture(&self, count: usize) -> VmResult<Vec<StackValue>> {
        let len = self.stack.len();
        if count > len {
            return Err(VmError::StackUnderflow {
                position: len as isize - count as isize,
            });
        }
        Ok(self.stack[len - count..].to_vec())
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.fp = 0;
    }

    fn at(&self, position: isize) -> VmResult<StackValue> {
        if position < 0 {
            return Err(VmError::StackUnderflow { position });
        }
        self.stack
            .get(position as usize)
            .cloned()
            .ok_or(VmError::StackUnderflow { position })
    }
}
