use crate::core::NodeValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One prior message of the conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A lightweight retrieval hit: enough to let the generator pick, not enough to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub question: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Answered straight from the routing decision, no retrieval.
    Direct,
    /// Composed from knowledge-base entries.
    Composed,
    /// Canned apology after a recoverable failure.
    Fallback,
}

/// The reply produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub suggestions: Vec<String>,
    pub kind: AnswerKind,
}

impl Answer {
    pub fn new(text: impl Into<String>, suggestions: Vec<String>, kind: AnswerKind) -> Self {
        Self {
            text: text.into(),
            suggestions,
            kind,
        }
    }
}

/// The mutable state threaded through every step of one run.
///
/// Only `input` and `role` are expected before the run starts. Every other field is
/// written by some step and must be treated as optional by the steps that read it.
/// Step-specific scratch data goes into `extras`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub run_id: Uuid,
    pub input: String,
    pub role: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub original_query: Option<String>,
    #[serde(default)]
    pub retrieval_query: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subtopic: Option<String>,
    #[serde(default)]
    pub retrieved_candidates: Vec<Candidate>,
    #[serde(default)]
    pub selected_ids: Vec<String>,
    #[serde(default)]
    pub retrieve_attempts: u32,
    #[serde(default)]
    pub rag_state: Option<String>,
    #[serde(default)]
    pub answer: Option<Answer>,
    #[serde(default)]
    pub extras: HashMap<String, NodeValue>,
}

impl SharedContext {
    /// Creates the context for one conversational turn.
    pub fn new(input: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input: input.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.context_summary = Some(summary.into());
        self
    }

    /// The normalized query, or the raw input when ingestion has not run yet.
    pub fn query_or_input(&self) -> &str {
        self.query.as_deref().unwrap_or(&self.input)
    }

    /// The query to send to retrieval: the rewritten one if any, else the user query.
    pub fn effective_query(&self) -> &str {
        self.retrieval_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| self.query_or_input())
    }

    pub fn get(&self, key: &str) -> Option<&NodeValue> {
        self.extras.get(key)
    }

    /// Reads a side-channel value, falling back to `default` when the key is absent
    /// or holds something of a different shape.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.extras
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<NodeValue>) {
        self.extras.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<NodeValue> {
        self.extras.remove(key)
    }
}
