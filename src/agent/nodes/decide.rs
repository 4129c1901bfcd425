use crate::agent::nodes::{ask, decode, read, snapshot, text_field};
use crate::agent::persona::Persona;
use crate::agent::{AgentDeps, outcome, prompts};
use crate::core::NodeValue;
use crate::core::context::{Answer, AnswerKind, SharedContext};
use crate::core::error::NodeError;
use crate::core::node::NodeLogic;
use crate::llm::GenerationMode;
use crate::parser::{FieldType, Schema};
use serde::{Deserialize, Serialize};

/// Routes a message either to a direct reply or to knowledge-base retrieval.
pub struct DecideRoute {
    deps: AgentDeps,
    schema: Schema,
}

#[derive(Serialize, Deserialize)]
struct DecideInput {
    query: String,
    role: String,
    history: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
enum Route {
    Direct { reply: String },
    Retrieve,
    Fallback,
}

impl DecideRoute {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            schema: Schema::new()
                .required("type", FieldType::String)
                .optional("explanation", FieldType::String),
        }
    }
}

impl NodeLogic for DecideRoute {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        snapshot(&DecideInput {
            query: ctx.query_or_input().to_string(),
            role: ctx.role.clone(),
            history: prompts::format_history(&ctx.history, self.deps.config.history_window),
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        let input: DecideInput = decode(input)?;
        let prompt = prompts::decide_route(&input.query, Persona::for_role(&input.role), &input.history);

        let route = match ask(&self.deps, &prompt, GenerationMode::Fast, &self.schema) {
            Ok(Some(record)) => match text_field(&record, "type").as_deref() {
                Some(outcome::DIRECT_RESPONSE) => match text_field(&record, "explanation") {
                    Some(reply) => Route::Direct { reply },
                    None => {
                        log::warn!("direct_response without a reply, using fallback");
                        Route::Fallback
                    }
                },
                Some(outcome::RETRIEVE_KB) => Route::Retrieve,
                other => {
                    log::warn!("unknown route {other:?}, using fallback");
                    Route::Fallback
                }
            },
            Ok(None) => Route::Fallback,
            Err(err) => {
                log::warn!("route decision unavailable: {err}");
                Route::Fallback
            }
        };
        Ok(snapshot(&route))
    }

    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
        let route = read::<Route>("decide_route", exec).unwrap_or(Route::Fallback);
        log::info!("[{}] route: {:?}", ctx.run_id, route);
        let label = match route {
            Route::Direct { reply } => {
                ctx.answer = Some(Answer::new(reply, Vec::new(), AnswerKind::Direct));
                outcome::DIRECT_RESPONSE
            }
            Route::Retrieve => {
                ctx.retrieve_attempts = 0;
                outcome::RETRIEVE_KB
            }
            Route::Fallback => outcome::FALLBACK,
        };
        Some(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::nodes::testing::{deps, overloaded};
    use crate::core::node::Node;

    fn run(replies: Vec<Result<String, crate::llm::GenerateError>>) -> (String, SharedContext) {
        let (deps, _) = deps(replies);
        let mut ctx = SharedContext::new("hello", "patient_dental");
        ctx.retrieve_attempts = 2;
        let outcome = Node::new(DecideRoute::new(deps)).run(&mut ctx).unwrap();
        (outcome, ctx)
    }

    #[test]
    fn test_direct_response_stores_answer() {
        let (outcome, ctx) = run(vec![Ok(
            "```yaml\ntype: direct_response\nexplanation: \"Hi! How can I help?\"\n```".into(),
        )]);
        assert_eq!(outcome, "direct_response");
        let answer = ctx.answer.unwrap();
        assert_eq!(answer.text, "Hi! How can I help?");
        assert_eq!(answer.kind, AnswerKind::Direct);
        assert!(answer.suggestions.is_empty());
    }

    #[test]
    fn test_retrieve_resets_attempts() {
        let (outcome, ctx) = run(vec![Ok("type: retrieve_kb\nexplanation: \"\"".into())]);
        assert_eq!(outcome, "retrieve_kb");
        assert_eq!(ctx.retrieve_attempts, 0);
        assert!(ctx.answer.is_none());
    }

    #[test]
    fn test_overload_and_garbage_route_to_fallback() {
        assert_eq!(run(vec![overloaded()]).0, "fallback");
        assert_eq!(run(vec![Ok("type: something_else".into())]).0, "fallback");
        assert_eq!(run(vec![Ok("no structure here".into())]).0, "fallback");
        assert_eq!(run(vec![Ok("type: direct_response".into())]).0, "fallback");
    }
}
