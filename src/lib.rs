//! # turnflow
//!
//! Composable conversational orchestration: a question comes in, a graph of steps decides how to
//! handle it, and a persona-aware answer comes out.
//!
//! ## Features
//!
//! - **Outcome-routed graphs**: steps return a label, edges map labels to the next step, flows
//!   nest as steps
//! - **Retries & fallbacks**: per-step retry budget with a deterministic fallback value
//! - **Credential pool**: round-robin API keys with quota cooldowns parsed from provider errors
//! - **Resilient parsing**: YAML/JSON records recovered from fenced, indented or chatty output
//! - **Optional Gemini integration**: behind the `llm` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use turnflow::prelude::*;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(CredentialPool::from_env().expect("set GEMINI_API_KEYS"));
//! let generator = |_prompt: &str, _key: &Credential, _mode: GenerationMode| {
//!     Ok::<_, GenerateError>("type: direct_response\nexplanation: Hello!".to_string())
//! };
//! let client = GenerationClient::new(pool, Arc::new(generator));
//! let deps = AgentDeps::new(client, Arc::new(StaticRetriever::default()));
//!
//! let flow = build_conversation_flow(&deps);
//! let mut ctx = SharedContext::new("hi there", "patient_dental");
//! flow.run(&mut ctx).expect("run failed");
//! println!("{}", ctx.answer.map(|a| a.text).unwrap_or_default());
//! ```
//!
//! ## Module Organization
//!
//! - Graph engine: [`Node`], [`NodeLogic`], [`Flow`], [`SharedContext`]
//! - [`pool`]: the credential pool
//! - [`parser`]: structured-response extraction
//! - [`llm`]: the `Generator` seam and the pool-aware client
//! - [`agent`]: the conversation pipeline built on all of the above
//! - [`prelude`]: commonly used types (import with `use turnflow::prelude::*`)

mod core;

pub mod agent;
pub mod llm;
pub mod parser;
pub mod pool;

pub use core::context::{Answer, AnswerKind, Candidate, ChatTurn, SharedContext};
pub use core::error::{FlowError, NodeError};
pub use core::flow::{Flow, FlowLogic, StepId};
pub use core::node::{Node, NodeCore, NodeLogic};
pub use core::telemetry::{LogTelemetry, MemoryTelemetry, Telemetry, TraceEntry};
pub use core::validation::{ValidationIssue, ValidationResult};
pub use core::{DEFAULT_OUTCOME, NodeValue};

/// Everything needed to build and run flows and the conversation pipeline.
///
/// # Example
/// ```rust
/// use turnflow::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Answer, AnswerKind, ChatTurn, DEFAULT_OUTCOME, Flow, FlowError, FlowLogic, MemoryTelemetry,
        Node, NodeCore, NodeError, NodeLogic, NodeValue, SharedContext, StepId, Telemetry,
        ValidationResult,
    };
    pub use crate::agent::{
        AgentConfig, AgentDeps, KnowledgeEntry, Retriever, StaticRetriever,
        build_conversation_flow,
    };
    pub use crate::llm::{GenerateError, GenerationClient, GenerationMode, Generator};
    pub use crate::parser::{FieldType, ResponseParser, Schema};
    pub use crate::pool::{Credential, CredentialPool, PoolConfig};
}

pub use serde_json::Value as JsonValue;

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
