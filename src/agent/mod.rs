//! The conversational pipeline: ingest a message, decide whether it needs the knowledge base,
//! retrieve and select entries, and compose a persona-aware answer with follow-up suggestions.
//!
//! Every step receives its collaborators through [`AgentDeps`]; nothing here is global.

pub mod nodes;
pub mod persona;
pub mod prompts;
pub mod retriever;

pub use nodes::{
    ComposeAnswer, DecideRoute, FallbackReply, IngestQuery, QueryRewrite, RagAgent,
    RetrieveFromKb, TopicClassify,
};
pub use persona::{DEFAULT_ROLE, Persona};
pub use retriever::{
    KnowledgeEntry, RetrievalError, Retriever, StaticRetriever, TopicFilter, TopicInfo,
};

use crate::core::flow::Flow;
use crate::core::node::Node;
use crate::llm::GenerationClient;
use crate::parser::ResponseParser;
use std::sync::Arc;
use std::time::Duration;

/// Outcome labels used to wire the pipeline.
pub mod outcome {
    pub use crate::core::DEFAULT_OUTCOME as DEFAULT;
    pub const FALLBACK: &str = "fallback";
    pub const RETRIEVE_KB: &str = "retrieve_kb";
    pub const CREATE_RETRIEVAL_QUERY: &str = "create_retrieval_query";
    pub const COMPOSE_ANSWER: &str = "compose_answer";
    pub const DIRECT_RESPONSE: &str = "direct_response";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Candidates requested from the retriever per search
    pub retrieve_top_k: usize,
    /// Searches allowed before the RAG agent must compose with what it has
    pub max_retrieve_attempts: u32,
    /// Prior messages rendered into prompts
    pub history_window: usize,
    /// Entries handed to the composer
    pub compose_max_items: usize,
    pub max_suggestions: usize,
    pub rag_max_retries: u32,
    pub topic_max_retries: u32,
    pub topic_retry_wait: Duration,
    /// Guard against runaway routing loops
    pub max_steps: usize,
    /// Reply when the service is overloaded
    pub fallback_message: String,
    /// Reply when the composer's output cannot be used
    pub compose_failure_message: String,
    /// Reply when retrieval found nothing to answer from
    pub no_answer_message: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            retrieve_top_k: 20,
            max_retrieve_attempts: 3,
            history_window: 6,
            compose_max_items: 6,
            max_suggestions: 3,
            rag_max_retries: 2,
            topic_max_retries: 3,
            topic_retry_wait: Duration::from_secs(2),
            max_steps: 64,
            fallback_message: "Sorry, I am a little overloaded right now. Please wait a moment and ask again."
                .to_string(),
            compose_failure_message:
                "Sorry, I could not put together a suitable answer right now. Could you ask another question?"
                    .to_string(),
            no_answer_message:
                "I could not find information about this in the knowledge base. Could you rephrase the question?"
                    .to_string(),
        }
    }
}

/// Collaborators shared by every step of the pipeline.
#[derive(Clone)]
pub struct AgentDeps {
    pub client: GenerationClient,
    pub retriever: Arc<dyn Retriever>,
    pub parser: ResponseParser,
    pub config: Arc<AgentConfig>,
}

impl AgentDeps {
    pub fn new(client: GenerationClient, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            client,
            retriever,
            parser: ResponseParser::default(),
            config: Arc::new(AgentConfig::default()),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }
}

/// Topic classification followed by retrieval. A `"fallback"` from the classifier ends in the
/// shared apology.
pub fn retrieval_flow(deps: &AgentDeps) -> Flow {
    let config = &deps.config;
    let mut flow = Flow::new(
        Node::new(TopicClassify::new(deps.clone()))
            .named("topic_classify")
            .with_retries(config.topic_max_retries, config.topic_retry_wait),
    )
    .named("retrieval");

    let retrieve = flow.add_step(Node::new(RetrieveFromKb::new(deps.clone())).named("retrieve_kb"));
    let fallback = flow.add_step(Node::new(FallbackReply::new(deps.clone())).named("fallback"));

    let classify = flow.entry();
    flow.add_default_edge(classify, retrieve)
        .add_edge(classify, outcome::FALLBACK, fallback);
    flow
}

/// The full turn:
///
/// ```text
/// ingest -> decide_route
/// decide_route  --retrieve_kb-->            rag_agent
/// rag_agent     --create_retrieval_query--> query_rewrite -> retrieval -> rag_agent
/// rag_agent     --retrieve_kb-->            retrieval
/// rag_agent     --compose_answer-->         compose_answer
/// decide_route | rag_agent | compose_answer | query_rewrite --fallback--> fallback
/// ```
///
/// `direct_response` has no edge: the answer is already in the context and the run ends.
pub fn build_conversation_flow(deps: &AgentDeps) -> Flow {
    let config = &deps.config;
    let mut flow = Flow::new(Node::new(IngestQuery::new()).named("ingest"))
        .named("conversation")
        .with_step_limit(config.max_steps);

    let decide = flow.add_step(Node::new(DecideRoute::new(deps.clone())).named("decide_route"));
    let rag = flow.add_step(
        Node::new(RagAgent::new(deps.clone()))
            .named("rag_agent")
            .with_retries(config.rag_max_retries, Duration::ZERO),
    );
    let rewrite = flow.add_step(Node::new(QueryRewrite::new(deps.clone())).named("query_rewrite"));
    let retrieval = flow.add_step(retrieval_flow(deps));
    let compose = flow.add_step(Node::new(ComposeAnswer::new(deps.clone())).named("compose_answer"));
    let fallback = flow.add_step(Node::new(FallbackReply::new(deps.clone())).named("fallback"));

    let ingest = flow.entry();
    flow.add_default_edge(ingest, decide)
        .add_edge(decide, outcome::RETRIEVE_KB, rag)
        .add_edge(rag, outcome::CREATE_RETRIEVAL_QUERY, rewrite)
        .add_default_edge(rewrite, retrieval)
        .add_edge(rag, outcome::RETRIEVE_KB, retrieval)
        .add_default_edge(retrieval, rag)
        .add_edge(rag, outcome::COMPOSE_ANSWER, compose);

    for step in [decide, rag, compose, rewrite] {
        flow.add_edge(step, outcome::FALLBACK, fallback);
    }
    flow
}
