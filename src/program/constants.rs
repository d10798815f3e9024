//! The constant pool.
//!
//! Every pool is 1-indexed so that an operand of `0` can stand for "absent".
//! Strings and integer arrays are deduplicated; blocks, helpers and the
//! remaining runtime objects are stored as given.

use super::{CompiledBlock, Invoker};
use crate::component::{ComponentDefinition, ModifierManager};
use crate::core::{VmError, VmResult};
use crate::environment::Helper;
use hashbrown::HashMap;
use std::fmt;
use std::rc::Rc;

/// Runtime objects referenced by `Constant` and friends.
#[derive(Clone)]
pub enum Other {
    /// Argument names pushed for `PushArgs`.
    Names(Rc<[Rc<str>]>),
    /// Symbol table captured for `Debugger`.
    Symbols(Rc<[Rc<str>]>),
    Component(Rc<ComponentDefinition>),
    Modifier(Rc<dyn ModifierManager>),
    Invoker(Rc<Invoker>),
}

impl Other {
    fn kind(&self) -> &'static str {
        match self {
            Other::Names(_) => "names",
            Other::Symbols(_) => "symbols",
            Other::Component(_) => "component",
            Other::Modifier(_) => "modifier",
            Other::Invoker(_) => "invoker",
        }
    }
}

impl fmt::Debug for Other {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Other::{}", self.kind())
    }
}

#[derive(Default)]
pub struct Constants {
    strings: Vec<Rc<str>>,
    string_index: HashMap<Rc<str>, u32>,
    arrays: Vec<Rc<[u32]>>,
    array_index: HashMap<Rc<[u32]>, u32>,
    blocks: Vec<Rc<CompiledBlock>>,
    helpers: Vec<Rc<dyn Helper>>,
    others: Vec<Other>,
}

/// Pool sizes, for statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstantCounts {
    pub strings: usize,
    pub arrays: usize,
    pub blocks: usize,
    pub helpers: usize,
    pub others: usize,
}

fn lookup<T: Clone>(pool: &[T], index: u32, name: &'static str) -> VmResult<T> {
    index
        .checked_sub(1)
        .and_then(|i| pool.get(i as usize))
        .cloned()
        .ok_or(VmError::UnresolvedConstant { pool: name, index })
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let value: Rc<str> = Rc::from(value);
        self.strings.push(value.clone());
        let index = self.strings.len() as u32;
        self.string_index.insert(value, index);
        index
    }

    pub fn get_string(&self, index: u32) -> VmResult<Rc<str>> {
        lookup(&self.strings, index, "string")
    }

    pub fn array(&mut self, values: &[u32]) -> u32 {
        if let Some(index) = self.array_index.get(values) {
            return *index;
        }
        let values: Rc<[u32]> = Rc::from(values);
        self.arrays.push(values.clone());
        let index = self.arrays.len() as u32;
        self.array_index.insert(values, index);
        index
    }

    pub fn get_array(&self, index: u32) -> VmResult<Rc<[u32]>> {
        lookup(&self.arrays, index, "array")
    }

    /// Strings named by an array of string constants.
    pub fn get_string_array(&self, index: u32) -> VmResult<Vec<Rc<str>>> {
        self.get_array(index)?
            .iter()
            .map(|s| self.get_string(*s))
            .collect()
    }

    pub fn block(&mut self, block: Rc<CompiledBlock>) -> u32 {
        self.blocks.push(block);
        self.blocks.len() as u32
    }

    /// Block at `index`; `0` is the absent block.
    pub fn get_block(&self, index: u32) -> VmResult<Option<Rc<CompiledBlock>>> {
        if index == 0 {
            return Ok(None);
        }
        lookup(&self.blocks, index, "block").map(Some)
    }

    pub fn helper(&mut self, helper: Rc<dyn Helper>) -> u32 {
        self.helpers.push(helper);
        self.helpers.len() as u32
    }

    pub fn get_helper(&self, index: u32) -> VmResult<Rc<dyn Helper>> {
        lookup(&self.helpers, index, "helper")
    }

    pub fn other(&mut self, other: Other) -> u32 {
        self.others.push(other);
        self.others.len() as u32
    }

    pub fn get_other(&self, index: u32) -> VmResult<Other> {
        lookup(&self.others, index, "other")
    }

    pub fn counts(&self) -> ConstantCounts {
        ConstantCounts {
            strings: self.strings.len(),
            arrays: self.arrays.len(),
            blocks: self.blocks.len(),
            helpers: self.helpers.len(),
            others: self.others.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_are_deduplicated_and_one_indexed() {
        let mut constants = Constants::new();
        let a = constants.string("class");
        let b = constants.string("id");
        assert_eq!(a, 1);
        assert_eq!(constants.string("class"), a);
        assert_eq!(&*constants.get_string(b).unwrap(), "id");
        assert!(constants.get_string(0).is_err());
    }

    #[test]
    fn test_arrays_are_deduplicated() {
        let mut constants = Constants::new();
        let first = constants.array(&[1, 2]);
        assert_eq!(constants.array(&[1, 2]), first);
        assert_ne!(constants.array(&[2, 1]), first);
        assert_eq!(constants.counts().arrays, 2);
    }

    #[test]
    fn test_block_zero_is_absent() {
        let constants = Constants::new();
        assert!(constants.get_block(0).unwrap().is_none());
        assert!(matches!(
            constants.get_block(3),
            Err(VmError::UnresolvedConstant { pool: "block", index: 3 })
        ));
    }
}
