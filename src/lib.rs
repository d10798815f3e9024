//! Reflow - a reactive template-rendering virtual machine.
//!
//! Precompiled templates are compiled into a flat bytecode heap and run
//! once by an append VM that builds DOM and records updating opcodes.
//! Rerenders walk only those opcodes, and only where a revision tag says
//! something changed.
//!
//! # Primary Usage
//!
//! ```ignore
//! use reflow::{Environment, RenderOptions, Template, Value};
//!
//! let env = Environment::new();
//! let template = Template::from_json(source)?;
//! let data = Value::from_json(env.clock(), &json);
//! let result = template.render(&env, RenderOptions::new(data, parent))?.sync()?;
//! // ... mutate `data` ...
//! result.rerender()?;
//! ```
//!
//! # Architecture
//!
//! - [`reference`] - Revision tags and references
//! - [`compiler`] - Wire format and bytecode compiler
//! - [`program`] - Instruction heap and constant pool
//! - [`vm`] - Append and updating virtual machines
//! - [`builder`] - DOM construction strategies
//! - [`dom`] - Minimal in-memory DOM and HTML utilities

pub mod builder;
pub mod component;
pub mod compiler;
pub mod core;
pub mod dom;
pub mod environment;
pub mod program;
pub mod reference;
pub mod template;
pub mod value;
pub mod vm;

pub use crate::core::{
    CompileError, CompileResult, RenderMode, RenderOptions, RerenderOptions, SessionStats,
    VmError, VmResult,
};
pub use component::{BasicComponentManager, ComponentDefinition, ComponentManager};
pub use dom::{Document, DomOperations, NodeRef};
pub use environment::{Environment, Helper, SimpleHelper};
pub use template::Template;
pub use value::Value;
pub use vm::{IteratorResult, RenderResult, TemplateIterator};
