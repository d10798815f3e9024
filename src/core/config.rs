//! Render configuration.
//!
//! Options are plain data; the builder strategy is chosen from [`RenderMode`]
//! when a template starts rendering.

use crate::dom::NodeRef;
use crate::value::Value;
use crate::vm::DynamicScope;

/// Which builder strategy the append VM drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Create fresh nodes.
    #[default]
    Append,
    /// Reuse server-rendered nodes already present under the parent.
    Rehydrate,
    /// Create fresh nodes plus the marker comments rehydration consumes.
    Serialize,
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(RenderMode::Append),
            "rehydrate" => Ok(RenderMode::Rehydrate),
            "serialize" => Ok(RenderMode::Serialize),
            other => Err(format!("unknown render mode `{other}`")),
        }
    }
}

/// Arguments of a template render.
pub struct RenderOptions {
    pub self_value: Value,
    pub parent: NodeRef,
    pub next_sibling: Option<NodeRef>,
    pub dynamic_scope: Option<DynamicScope>,
    pub mode: RenderMode,
}

impl RenderOptions {
    pub fn new(self_value: Value, parent: NodeRef) -> Self {
        Self {
            self_value,
            parent,
            next_sibling: None,
            dynamic_scope: None,
            mode: RenderMode::Append,
        }
    }

    pub fn mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dynamic_scope(mut self, scope: DynamicScope) -> Self {
        self.dynamic_scope = Some(scope);
        self
    }

    pub fn next_sibling(mut self, node: NodeRef) -> Self {
        self.next_sibling = Some(node);
        self
    }
}

/// Knobs for one rerender pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RerenderOptions {
    /// Evaluate every opcode inside cache groups even when their combined
    /// tag is unchanged.
    pub always_revalidate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_mode_parse() {
        assert_eq!("serialize".parse::<RenderMode>(), Ok(RenderMode::Serialize));
        assert_eq!("rehydrate".parse::<RenderMode>(), Ok(RenderMode::Rehydrate));
        assert!("stream".parse::<RenderMode>().is_err());
        assert_eq!(RenderMode::default(), RenderMode::Append);
    }
}
