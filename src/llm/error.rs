use crate::core::error::NodeError;
use crate::pool::PoolError;
use thiserror::Error;

/// A generator failure, classified by what the credential pool should do about it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// Rate limit or quota hit; the text may carry a retry hint.
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// The service is overloaded or briefly unavailable.
    #[error("Transient service error: {0}")]
    Transient(String),

    /// The credential itself was rejected.
    #[error("Credential rejected: {0}")]
    Permanent(String),

    #[error("No usable credential: {0}")]
    Exhausted(#[from] PoolError),

    #[error("Generation failed: {0}")]
    Other(String),
}

impl GenerateError {
    /// True for every failure that means "the service cannot serve us right now".
    /// Steps route these to their fallback reply.
    pub fn is_overload(&self) -> bool {
        !matches!(self, GenerateError::Other(_))
    }

    /// Classifies a provider error message when no status code is available.
    pub fn from_provider_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let lower = text.to_lowercase();
        if text.contains("429") || text.contains("RESOURCE_EXHAUSTED") || lower.contains("quota") {
            GenerateError::QuotaExhausted(text)
        } else if text.contains("500") || text.contains("503") || lower.contains("overload") {
            GenerateError::Transient(text)
        } else if lower.contains("api key not valid") || lower.contains("api_key_invalid") {
            GenerateError::Permanent(text)
        } else {
            GenerateError::Other(text)
        }
    }
}

impl From<GenerateError> for NodeError {
    fn from(err: GenerateError) -> Self {
        NodeError::External(Box::new(err))
    }
}
