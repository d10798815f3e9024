//! Minimal DOM: node handles, the mutation capability, bounds and HTML text.

pub mod bounds;
pub mod document;
pub mod html;
pub mod node;

pub use bounds::{Bounds, ConcreteBounds};
pub use document::{Document, DomOperations};
pub use node::{Attribute, NodeRef, NodeType, Prop, SVG_NAMESPACE, XLINK_NAMESPACE};
