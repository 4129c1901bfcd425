//! The steps of the conversation pipeline.
//!
//! Each step keeps the three-phase contract: `prep` snapshots what it needs from the context,
//! `exec` talks to the generator or the retriever and returns a typed decision serialized as a
//! [`NodeValue`], and `post` writes the decision back and names the outcome.

mod compose;
mod decide;
mod fallback;
mod ingest;
mod rag;
mod retrieve;
mod rewrite;
mod topic;

pub use compose::ComposeAnswer;
pub use decide::DecideRoute;
pub use fallback::FallbackReply;
pub use ingest::IngestQuery;
pub use rag::RagAgent;
pub use retrieve::RetrieveFromKb;
pub use rewrite::QueryRewrite;
pub use topic::TopicClassify;

use crate::agent::AgentDeps;
use crate::core::NodeValue;
use crate::core::error::NodeError;
use crate::llm::{GenerateError, GenerationMode};
use crate::parser::{Record, Schema};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Sends `prompt` and parses the reply against `schema`.
///
/// Generator failures are returned as-is so the caller can tell overload from the rest;
/// an unusable reply is `Ok(None)`.
pub(crate) fn ask(
    deps: &AgentDeps,
    prompt: &str,
    mode: GenerationMode,
    schema: &Schema,
) -> Result<Option<Record>, GenerateError> {
    let text = deps.client.complete(prompt, mode)?;
    Ok(deps.parser.parse(&text, schema))
}

pub(crate) fn snapshot<T: Serialize>(value: &T) -> NodeValue {
    serde_json::to_value(value).unwrap_or_else(|err| {
        log::error!("failed to snapshot step input: {err}");
        NodeValue::Null
    })
}

pub(crate) fn decode<T: DeserializeOwned>(value: NodeValue) -> Result<T, NodeError> {
    Ok(serde_json::from_value(value)?)
}

/// Decodes a value in `post`, where there is no error channel.
pub(crate) fn read<T: DeserializeOwned>(step: &str, value: NodeValue) -> Option<T> {
    serde_json::from_value(value)
        .inspect_err(|err| log::error!("{step}: unexpected step value: {err}"))
        .ok()
}

/// A non-blank string field.
pub(crate) fn text_field(record: &Record, name: &str) -> Option<String> {
    record
        .get(name)
        .and_then(NodeValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A list of strings, accepting a bare string as a one-element list.
pub(crate) fn string_list(record: &Record, name: &str) -> Vec<String> {
    match record.get(name) {
        Some(NodeValue::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                NodeValue::String(s) => Some(s.trim().to_string()),
                NodeValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(NodeValue::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators shared by the step tests.

    use crate::agent::{AgentConfig, AgentDeps, KnowledgeEntry, StaticRetriever};
    use crate::llm::{GenerateError, GenerationClient, GenerationMode, Generator};
    use crate::pool::{Credential, CredentialPool, PoolConfig};
    use std::sync::{Arc, Mutex};

    pub struct Script {
        replies: Mutex<Vec<Result<String, GenerateError>>>,
        pub prompts: Mutex<Vec<(String, GenerationMode)>>,
    }

    impl Script {
        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().map(|p| p.0.clone()).unwrap_or_default()
        }
    }

    impl Generator for Script {
        fn generate(
            &self,
            prompt: &str,
            _credential: &Credential,
            mode: GenerationMode,
        ) -> Result<String, GenerateError> {
            self.prompts.lock().unwrap().push((prompt.to_string(), mode));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(GenerateError::Other("script exhausted".into()))
            } else {
                replies.remove(0)
            }
        }
    }

    pub fn kb() -> StaticRetriever {
        StaticRetriever::new(vec![
            KnowledgeEntry::new("1", "Does diabetes affect gum health?", "Yes, gum disease is more common.")
                .with_topic("periodontal", Some("diabetes")),
            KnowledgeEntry::new("2", "How often should I brush my teeth?", "Twice a day.")
                .with_topic("hygiene", None),
            KnowledgeEntry::new("3", "Can gum disease raise blood sugar?", "Inflammation can worsen control.")
                .with_topic("periodontal", Some("glycemic")),
        ])
    }

    pub fn deps(replies: Vec<Result<String, GenerateError>>) -> (AgentDeps, Arc<Script>) {
        deps_with(replies, Arc::new(kb()))
    }

    pub fn deps_with(
        replies: Vec<Result<String, GenerateError>>,
        retriever: Arc<dyn crate::agent::Retriever>,
    ) -> (AgentDeps, Arc<Script>) {
        let script = Arc::new(Script {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        });
        // One key so each reply maps to exactly one generator call.
        let pool = Arc::new(CredentialPool::new(["test-key"], PoolConfig::default()).unwrap());
        let client = GenerationClient::new(pool, script.clone());
        let deps = AgentDeps::new(client, retriever).with_config(AgentConfig {
            topic_retry_wait: std::time::Duration::ZERO,
            ..AgentConfig::default()
        });
        (deps, script)
    }

    pub fn overloaded() -> Result<String, GenerateError> {
        Err(GenerateError::Transient("503 overloaded".into()))
    }
}
