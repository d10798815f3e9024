// This module defines the error types for reflow using the thiserror crate. CompileError
// covers everything that can go wrong while turning wire-format templates into bytecode:
// unresolved helper, modifier or component names, built-in blocks invoked with the wrong
// arity, malformed statement tuples, labels that were never bound, and JSON decoding
// failures. VmError covers runtime faults of the append and updating VMs: stack underflow,
// out of range scope slots, unresolved heap handles, undecodable opcode words and stack
// values of the wrong kind. It also carries the BranchInvalidated signal that a Try block
// catches to re-execute its subtree. Runtime compilation of layouts and partials can
// surface a CompileError, which converts into VmError::Compile.

//! Error types for the template compiler and the virtual machines.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Errors raised while compiling wire-format templates into bytecode.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unknown helper: {name}")]
    UnknownHelper { name: String },

    #[error("Unknown modifier: {name}")]
    UnknownModifier { name: String },

    #[error("Unknown component: {name}")]
    UnknownComponent { name: String },

    #[error("{message}")]
    BlockArity { message: String },

    #[error("Malformed {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Unresolved label: {label}")]
    UnresolvedLabel { label: String },

    #[error("Invalid template wire format: {0}")]
    Wire(#[from] serde_json::Error),
}

impl CompileError {
    pub(crate) fn arity(message: impl Into<String>) -> Self {
        CompileError::BlockArity {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        CompileError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors raised while executing bytecode or revalidating updating opcodes.
#[derive(Error, Debug)]
pub enum VmError {
    #[error("Evaluation stack underflow at {position}")]
    StackUnderflow { position: isize },

    #[error("Scope slot {slot} out of range (scope has {size} slots)")]
    ScopeSlotOutOfRange { slot: usize, size: usize },

    #[error("Unresolved heap handle {handle}")]
    UnresolvedHandle { handle: u32 },

    #[error("Invalid opcode {word} at address {address}")]
    InvalidOpcode { word: u32, address: usize },

    #[error("Invalid register operand {operand}")]
    InvalidRegister { operand: u32 },

    #[error("Address {address} is outside the program heap")]
    AddressOutOfRange { address: usize },

    #[error("No {pool} constant at index {index}")]
    UnresolvedConstant { pool: &'static str, index: u32 },

    #[error("Expected {expected} on the stack, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("No active {what}")]
    MissingFrame { what: &'static str },

    /// A branch condition asserted during the first render changed. Caught by
    /// the nearest enclosing Try block, fatal otherwise.
    #[error("Branch condition changed outside of a re-executable block")]
    BranchInvalidated,

    #[error("Cannot key item with `{key}` (value has no such key)")]
    MissingIterationKey { key: String },

    #[error("Value of kind {kind} cannot be iterated")]
    NotIterable { kind: &'static str },

    #[error("Value of kind {kind} is not a component definition")]
    NotAComponent { kind: &'static str },

    #[error("Unknown partial: {name}")]
    UnknownPartial { name: String },

    #[error("Unsupported operation: {reason}")]
    Unsupported { reason: String },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Result type alias for VM operations.
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_message_is_verbatim() {
        let err = CompileError::arity("#if requires a single argument");
        assert_eq!(err.to_string(), "#if requires a single argument");
    }

    #[test]
    fn test_compile_error_converts_into_vm_error() {
        let err: VmError = CompileError::UnknownHelper {
            name: "missing".into(),
        }
        .into();
        assert!(matches!(err, VmError::Compile(CompileError::UnknownHelper { .. })));
        assert_eq!(err.to_string(), "Unknown helper: missing");
    }
}
