pub mod context;
pub mod error;
pub mod flow;
pub mod node;
pub mod telemetry;
pub mod validation;

/// The value type exchanged between the phases of a step.
pub type NodeValue = serde_json::Value;

/// Outcome used for routing when a step's `post` returns `None`.
pub const DEFAULT_OUTCOME: &str = "default";
