// This module gathers the infrastructure shared by every other part of reflow: the error
// enums and result aliases used by the compiler and both virtual machines, the arena-backed
// compilation session with its statistics, and the render configuration types (render mode,
// render options, rerender options).

//! Core infrastructure: errors, compilation sessions and configuration.

pub mod config;
pub mod error;
pub mod session;

pub use config::{RenderMode, RenderOptions, RerenderOptions};
pub use error::{CompileError, CompileResult, VmError, VmResult};
pub use session::{CompilationSession, Instruction, SessionStats};
