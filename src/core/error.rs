use crate::core::flow::StepId;
use thiserror::Error;

/// Why a step's `exec` phase failed.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0}")]
    Failed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sub-flow failed: {0}")]
    SubFlow(#[source] Box<FlowError>),

    #[error(transparent)]
    External(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl NodeError {
    pub fn msg(message: impl Into<String>) -> Self {
        NodeError::Failed(message.into())
    }
}

/// The only errors that escape `Flow::run`.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        source: NodeError,
    },

    #[error("flow routed to unknown step {0}")]
    UnknownStep(StepId),

    #[error("flow exceeded its limit of {limit} executed steps")]
    StepLimitExceeded { limit: usize },
}

impl FlowError {
    /// Name of the step that failed, if the failure came from a step.
    pub fn step(&self) -> Option<&str> {
        match self {
            FlowError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
