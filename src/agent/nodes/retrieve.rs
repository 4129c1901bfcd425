use crate::agent::AgentDeps;
use crate::agent::nodes::{decode, read, snapshot};
use crate::agent::retriever::TopicFilter;
use crate::core::NodeValue;
use crate::core::context::{Candidate, SharedContext};
use crate::core::error::NodeError;
use crate::core::node::NodeLogic;
use serde::{Deserialize, Serialize};

/// Searches the knowledge base and keeps lightweight candidates for the RAG agent.
pub struct RetrieveFromKb {
    deps: AgentDeps,
}

#[derive(Serialize, Deserialize)]
struct RetrieveInput {
    query: String,
    filter: TopicFilter,
}

impl RetrieveFromKb {
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps }
    }
}

impl NodeLogic for RetrieveFromKb {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        snapshot(&RetrieveInput {
            query: ctx.effective_query().to_string(),
            filter: TopicFilter {
                topic: ctx.topic.clone(),
                subtopic: ctx.subtopic.clone(),
            },
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        let input: RetrieveInput = decode(input)?;
        let top_k = self.deps.config.retrieve_top_k;
        let retriever = &self.deps.retriever;

        let mut entries = retriever.retrieve(&input.query, &input.filter, top_k)?;
        if entries.is_empty() && !input.filter.is_empty() {
            log::info!("nothing found under {:?}, retrying without a filter", input.filter);
            entries = retriever.retrieve(&input.query, &TopicFilter::none(), top_k)?;
        }

        let candidates: Vec<Candidate> = entries
            .into_iter()
            .map(|e| Candidate {
                id: e.id,
                question: e.question,
            })
            .collect();
        Ok(snapshot(&candidates))
    }

    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
        let candidates: Vec<Candidate> = read("retrieve_kb", exec).unwrap_or_default();
        log::info!(
            "[{}] retrieved {} candidate(s) for {:?}",
            ctx.run_id,
            candidates.len(),
            ctx.effective_query()
        );
        ctx.retrieved_candidates = candidates;
        ctx.rag_state = Some("retrieved".to_string());
        None
    }
}
