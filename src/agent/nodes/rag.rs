use crate::agent::nodes::{ask, decode, read, snapshot, string_list, text_field};
use crate::agent::{AgentDeps, outcome, prompts};
use crate::core::NodeValue;
use crate::core::context::{Candidate, SharedContext};
use crate::core::error::NodeError;
use crate::core::node::NodeLogic;
use crate::llm::GenerationMode;
use crate::parser::{FieldType, Schema};
use serde::{Deserialize, Serialize};

/// Candidates passed on when the generator's own selection is unusable.
const DEFAULT_SELECTION: usize = 5;

/// Decides whether the current candidates can answer the question, or whether another search
/// is needed first.
///
/// Searches are bounded: once `max_retrieve_attempts` is reached the agent composes with what
/// it has, even if that is nothing.
pub struct RagAgent {
    deps: AgentDeps,
    schema: Schema,
}

#[derive(Serialize, Deserialize)]
struct RagInput {
    query: String,
    summary: String,
    candidates: Vec<Candidate>,
    attempts: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RagDecision {
    CreateQuery,
    Retrieve,
    Compose { ids: Vec<String> },
    Fallback,
}

impl RagAgent {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            schema: Schema::new()
                .required("action", FieldType::String)
                .optional("selected_ids", FieldType::Any)
                .optional("reason", FieldType::Any),
        }
    }

    fn top(candidates: &[Candidate]) -> Vec<String> {
        candidates
            .iter()
            .take(DEFAULT_SELECTION)
            .map(|c| c.id.clone())
            .collect()
    }

    fn selection(chosen: Vec<String>, candidates: &[Candidate]) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in chosen {
            if candidates.iter().any(|c| c.id == id) && !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            log::warn!("no usable selected_ids, taking the top {DEFAULT_SELECTION} candidates");
            Self::top(candidates)
        } else {
            ids
        }
    }
}

impl NodeLogic for RagAgent {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        snapshot(&RagInput {
            query: ctx.query_or_input().to_string(),
            summary: ctx.context_summary.clone().unwrap_or_default(),
            candidates: ctx.retrieved_candidates.clone(),
            attempts: ctx.retrieve_attempts,
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        let input: RagInput = decode(input)?;
        let max_attempts = self.deps.config.max_retrieve_attempts;
        let exhausted = input.attempts >= max_attempts;

        if input.candidates.is_empty() {
            let decision = if exhausted {
                log::warn!("no candidates after {} search(es), composing anyway", input.attempts);
                RagDecision::Compose { ids: Vec::new() }
            } else {
                RagDecision::CreateQuery
            };
            return Ok(snapshot(&decision));
        }

        let prompt = prompts::rag_agent(
            &input.query,
            &input.summary,
            &input.candidates,
            input.attempts,
            max_attempts,
        );
        let record = match ask(&self.deps, &prompt, GenerationMode::Fast, &self.schema) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(NodeError::msg("rag decision could not be parsed")),
            Err(err) if err.is_overload() => {
                log::warn!("rag decision unavailable: {err}");
                return Ok(snapshot(&RagDecision::Fallback));
            }
            Err(err) => return Err(err.into()),
        };

        let decision = match text_field(&record, "action").as_deref() {
            Some(outcome::COMPOSE_ANSWER) => RagDecision::Compose {
                ids: Self::selection(string_list(&record, "selected_ids"), &input.candidates),
            },
            Some(outcome::CREATE_RETRIEVAL_QUERY | outcome::RETRIEVE_KB) if exhausted => {
                log::warn!("search limit of {max_attempts} reached, composing with current candidates");
                RagDecision::Compose {
                    ids: Self::top(&input.candidates),
                }
            }
            Some(outcome::CREATE_RETRIEVAL_QUERY) => RagDecision::CreateQuery,
            Some(outcome::RETRIEVE_KB) => RagDecision::Retrieve,
            other => return Err(NodeError::msg(format!("unknown rag action {other:?}"))),
        };
        Ok(snapshot(&decision))
    }

    fn exec_fallback(&self, input: NodeValue, error: &NodeError) -> Option<NodeValue> {
        let input: RagInput = decode(input).ok()?;
        log::warn!("rag agent gave up ({error}), deciding without the generator");
        let decision = if input.candidates.is_empty() {
            RagDecision::Fallback
        } else {
            RagDecision::Compose {
                ids: Self::top(&input.candidates),
            }
        };
        Some(snapshot(&decision))
    }

    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
        let decision = read::<RagDecision>("rag_agent", exec).unwrap_or(RagDecision::Fallback);
        log::info!(
            "[{}] rag decision after {} search(es): {:?}",
            ctx.run_id,
            ctx.retrieve_attempts,
            decision
        );
        let label = match decision {
            RagDecision::CreateQuery => {
                ctx.retrieve_attempts += 1;
                outcome::CREATE_RETRIEVAL_QUERY
            }
            RagDecision::Retrieve => {
                ctx.retrieve_attempts += 1;
                outcome::RETRIEVE_KB
            }
            RagDecision::Compose { ids } => {
                ctx.selected_ids = ids;
                ctx.rag_state = Some("selected".to_string());
                outcome::COMPOSE_ANSWER
            }
            RagDecision::Fallback => outcome::FALLBACK,
        };
        Some(label.to_string())
    }
}
