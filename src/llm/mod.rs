//! Text generation: the `Generator` seam, the pool-aware `GenerationClient`, and (behind the
//! `llm` feature) a Gemini implementation.

pub mod client;
pub mod error;
#[cfg(feature = "llm")]
pub mod gemini;

pub use client::{GenerationClient, estimate_tokens};
pub use error::GenerateError;
#[cfg(feature = "llm")]
pub use gemini::{GeminiConfig, GeminiGenerator};

use crate::pool::Credential;

/// Latency/quality trade-off requested by a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GenerationMode {
    /// Small, fast model. Routing and classification.
    #[default]
    Fast,
    /// Larger model. Final answers.
    Quality,
}

/// An external text-generation service. Calls block the current thread.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        credential: &Credential,
        mode: GenerationMode,
    ) -> Result<String, GenerateError>;
}

impl<F> Generator for F
where
    F: Fn(&str, &Credential, GenerationMode) -> Result<String, GenerateError> + Send + Sync,
{
    fn generate(
        &self,
        prompt: &str,
        credential: &Credential,
        mode: GenerationMode,
    ) -> Result<String, GenerateError> {
        self(prompt, credential, mode)
    }
}
