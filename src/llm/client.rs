use crate::llm::{GenerateError, GenerationMode, Generator};
use crate::pool::CredentialPool;
use std::sync::Arc;

/// A generator wired to the shared credential pool.
///
/// Each call picks a credential, and on a classified failure marks it in the pool and tries the
/// next one, up to one attempt per credential. `Other` failures are returned immediately.
#[derive(Clone)]
pub struct GenerationClient {
    pool: Arc<CredentialPool>,
    generator: Arc<dyn Generator>,
}

impl GenerationClient {
    pub fn new(pool: Arc<CredentialPool>, generator: Arc<dyn Generator>) -> Self {
        Self { pool, generator }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn complete(&self, prompt: &str, mode: GenerationMode) -> Result<String, GenerateError> {
        let attempts = self.pool.len().max(1);
        log::info!(
            "generating ({:?}): ~{} input tokens ({} chars)",
            mode,
            estimate_tokens(prompt),
            prompt.chars().count()
        );

        let mut last_error = None;
        for attempt in 1..=attempts {
            let (credential, id) = self.pool.pick()?;
            match self.generator.generate(prompt, &credential, mode) {
                Ok(text) => {
                    log::info!(
                        "generation succeeded with {}: ~{} output tokens ({} chars)",
                        id,
                        estimate_tokens(&text),
                        text.chars().count()
                    );
                    return Ok(text);
                }
                Err(err) => {
                    match &err {
                        GenerateError::QuotaExhausted(text) => {
                            self.pool.mark_quota_exhausted(id, text)
                        }
                        GenerateError::Transient(_) => self.pool.mark_transient_error(id),
                        GenerateError::Permanent(_) => self.pool.mark_permanent_fail(id),
                        GenerateError::Exhausted(_) | GenerateError::Other(_) => {
                            log::error!("generation failed with {}: {}", id, err);
                            return Err(err);
                        }
                    }
                    log::warn!(
                        "generation attempt {}/{} with {} failed: {}",
                        attempt,
                        attempts,
                        id,
                        err
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GenerateError::Other("no generation attempt made".into())))
    }
}

/// Rough token count for logging.
///
/// Text where more than a tenth of the characters are non-ASCII letters (accented Latin such as
/// Vietnamese) averages about 3.2 characters per token, other text about 3.8.
pub fn estimate_tokens(text: &str) -> usize {
    let total = text.chars().count();
    if total == 0 {
        return 0;
    }
    let accented = text
        .chars()
        .filter(|c| !c.is_ascii() && c.is_alphabetic())
        .count();
    let chars_per_token = if accented as f64 > total as f64 * 0.1 { 3.2 } else { 3.8 };
    ((total as f64 / chars_per_token) as usize).max(1)
}
