use crate::agent::nodes::{ask, decode, read, snapshot, text_field};
use crate::agent::persona::Persona;
use crate::agent::{AgentDeps, outcome, prompts};
use crate::core::NodeValue;
use crate::core::context::{Answer, AnswerKind, SharedContext};
use crate::core::error::NodeError;
use crate::core::node::NodeLogic;
use crate::llm::GenerationMode;
use crate::parser::{FieldType, Record, Schema};
use serde::{Deserialize, Serialize};

/// Writes the final answer from the selected knowledge-base entries, plus follow-up questions.
pub struct ComposeAnswer {
    deps: AgentDeps,
    schema: Schema,
}

#[derive(Serialize, Deserialize)]
struct ComposeInput {
    role: String,
    query: String,
    summary: String,
    ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum Composition {
    Composed { text: String, suggestions: Vec<String> },
    /// Retrieval produced nothing to answer from.
    NoAnswer,
    /// The reply could not be used.
    Failed,
    Overloaded,
}

impl ComposeAnswer {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            schema: Schema::new()
                .required("explanation", FieldType::String)
                .optional("suggestion_questions", FieldType::Any),
        }
    }

    /// Accepts a list, or a block of `- ` lines when the generator flattened the list.
    fn suggestions(record: &Record, max: usize) -> Vec<String> {
        let raw: Vec<String> = match record.get("suggestion_questions") {
            Some(NodeValue::Array(items)) => items
                .iter()
                .filter_map(NodeValue::as_str)
                .map(str::to_string)
                .collect(),
            Some(NodeValue::String(block)) => block.lines().map(str::to_string).collect(),
            _ => Vec::new(),
        };
        raw.iter()
            .map(|s| {
                s.trim()
                    .trim_start_matches(['-', '*'])
                    .trim()
                    .trim_matches('"')
                    .trim()
                    .to_string()
            })
            .filter(|s| !s.is_empty())
            .take(max)
            .collect()
    }
}

impl NodeLogic for ComposeAnswer {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        let ids = if ctx.selected_ids.is_empty() {
            ctx.retrieved_candidates
                .iter()
                .take(self.deps.config.compose_max_items)
                .map(|c| c.id.clone())
                .collect()
        } else {
            ctx.selected_ids.clone()
        };
        snapshot(&ComposeInput {
            role: ctx.role.clone(),
            query: ctx.query_or_input().to_string(),
            summary: ctx.context_summary.clone().unwrap_or_default(),
            ids,
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        let input: ComposeInput = decode(input)?;
        let config = &self.deps.config;
        let entries = if input.ids.is_empty() {
            Vec::new()
        } else {
            self.deps.retriever.fetch(&input.ids)?
        };
        if entries.is_empty() {
            log::warn!("no knowledge-base entries to compose from");
            return Ok(snapshot(&Composition::NoAnswer));
        }

        let prompt = prompts::compose_answer(
            Persona::for_role(&input.role),
            &input.query,
            &input.summary,
            &entries,
            config.compose_max_items,
        );
        let composition = match ask(&self.deps, &prompt, GenerationMode::Quality, &self.schema) {
            Ok(Some(record)) => match text_field(&record, "explanation") {
                Some(text) => Composition::Composed {
                    suggestions: Self::suggestions(&record, config.max_suggestions),
                    text,
                },
                None => Composition::Failed,
            },
            Ok(None) => Composition::Failed,
            Err(err) if err.is_overload() => {
                log::warn!("answer composition unavailable: {err}");
                Composition::Overloaded
            }
            Err(err) => {
                log::warn!("answer composition failed: {err}");
                Composition::Failed
            }
        };
        Ok(snapshot(&composition))
    }

    fn exec_fallback(&self, _input: NodeValue, error: &NodeError) -> Option<NodeValue> {
        log::warn!("could not load entries to compose from: {error}");
        Some(snapshot(&Composition::Failed))
    }

    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
        let config = &self.deps.config;
        let composition = read::<Composition>("compose_answer", exec).unwrap_or(Composition::Failed);
        let answer = match composition {
            Composition::Composed { text, suggestions } => {
                log::info!(
                    "[{}] composed answer with {} suggestion(s)",
                    ctx.run_id,
                    suggestions.len()
                );
                Answer::new(text, suggestions, AnswerKind::Composed)
            }
            Composition::NoAnswer => {
                Answer::new(config.no_answer_message.clone(), Vec::new(), AnswerKind::Fallback)
            }
            Composition::Failed => Answer::new(
                config.compose_failure_message.clone(),
                Vec::new(),
                AnswerKind::Fallback,
            ),
            Composition::Overloaded => return Some(outcome::FALLBACK.to_string()),
        };
        ctx.answer = Some(answer);
        ctx.rag_state = Some("composed".to_string());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::nodes::testing::{Script, deps, overloaded};
    use crate::core::DEFAULT_OUTCOME;
    use crate::core::context::Candidate;
    use crate::core::node::Node;
    use crate::llm::GenerateError;
    use serde_json::json;
    use std::sync::Arc;

    fn run(
        replies: Vec<Result<String, GenerateError>>,
        selected: &[&str],
    ) -> (String, SharedContext, Arc<Script>) {
        let (deps, script) = deps(replies);
        let mut ctx = SharedContext::new("Does diabetes hurt my gums?", "doctor_dental");
        ctx.retrieved_candidates = vec![Candidate {
            id: "1".into(),
            question: "Does diabetes affect gum health?".into(),
        }];
        ctx.selected_ids = selected.iter().map(|s| s.to_string()).collect();
        let outcome = Node::new(ComposeAnswer::new(deps)).run(&mut ctx).unwrap();
        (outcome, ctx, script)
    }

    #[test]
    fn test_composes_answer_with_capped_suggestions() {
        let reply = "```yaml\nexplanation: |\n  Diabetes raises the risk of gum disease.\n  In short, keep sugar in range.\nsuggestion_questions:\n  - \"How do I check my gums?\"\n  - \"Is bleeding normal?\"\n  - \"Which toothpaste?\"\n  - \"A fourth one\"\n```";
        let (outcome, ctx, script) = run(vec![Ok(reply.into())], &["3", "1"]);
        assert_eq!(outcome, DEFAULT_OUTCOME);
        let answer = ctx.answer.unwrap();
        assert_eq!(answer.kind, AnswerKind::Composed);
        assert!(answer.text.starts_with("Diabetes raises"));
        assert_eq!(answer.suggestions.len(), 3);
        assert_eq!(answer.suggestions[0], "How do I check my gums?");
        assert_eq!(ctx.rag_state.as_deref(), Some("composed"));

        let prompt = script.last_prompt();
        assert!(prompt.contains("1. Q: Can gum disease raise blood sugar?"));
        assert!(prompt.contains("2. Q: Does diabetes affect gum health?"));
        assert!(prompt.contains("speaking to a dentist"));
        assert_eq!(script.prompts.lock().unwrap()[0].1, GenerationMode::Quality);
    }

    #[test]
    fn test_suggestions_given_as_text_block() {
        let mut record = Record::new();
        record.insert("suggestion_questions".into(), json!("- first?\n\n- \"second?\"\n"));
        assert_eq!(ComposeAnswer::suggestions(&record, 3), vec!["first?", "second?"]);
        record.insert("suggestion_questions".into(), json!(42));
        assert!(ComposeAnswer::suggestions(&record, 3).is_empty());
    }

    #[test]
    fn test_unselected_uses_retrieved_candidates() {
        let (_, ctx, script) = run(vec![Ok("explanation: fine".into())], &[]);
        assert_eq!(ctx.answer.unwrap().text, "fine");
        assert!(script.last_prompt().contains("Does diabetes affect gum health?"));
    }

    #[test]
    fn test_parse_failure_gives_apology() {
        let (outcome, ctx, _) = run(vec![Ok("suggestion_questions: []".into())], &["1"]);
        assert_eq!(outcome, DEFAULT_OUTCOME);
        let answer = ctx.answer.unwrap();
        assert_eq!(answer.kind, AnswerKind::Fallback);
        assert!(answer.text.contains("could not put together"));
    }

    #[test]
    fn test_unknown_ids_give_no_answer_message() {
        let (_, ctx, script) = run(vec![], &["missing"]);
        assert!(ctx.answer.unwrap().text.contains("knowledge base"));
        assert_eq!(script.calls(), 0);
    }

    #[test]
    fn test_overload_routes_to_fallback() {
        let (outcome, ctx, _) = run(vec![overloaded()], &["1"]);
        assert_eq!(outcome, "fallback");
        assert!(ctx.answer.is_none());
    }
}
