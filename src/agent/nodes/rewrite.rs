use crate::agent::nodes::{ask, decode, read, snapshot, text_field};
use crate::agent::{AgentDeps, outcome, prompts};
use crate::core::NodeValue;
use crate::core::context::SharedContext;
use crate::core::error::NodeError;
use crate::core::node::NodeLogic;
use crate::llm::GenerationMode;
use crate::parser::{FieldType, Schema};
use serde::{Deserialize, Serialize};

/// Turns a conversational question into a short search query.
pub struct QueryRewrite {
    deps: AgentDeps,
    schema: Schema,
}

#[derive(Serialize, Deserialize)]
struct RewriteInput {
    query: String,
    summary: String,
    history: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum Rewrite {
    Rewritten { query: String },
    /// The generator's reply was unusable; search with the user's own words.
    Unchanged,
    Overloaded,
}

impl QueryRewrite {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            schema: Schema::new()
                .required("retrieval_query", FieldType::String)
                .required("reason", FieldType::String)
                .optional("confidence", FieldType::Any),
        }
    }
}

impl NodeLogic for QueryRewrite {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        snapshot(&RewriteInput {
            query: ctx.query_or_input().to_string(),
            summary: ctx.context_summary.clone().unwrap_or_default(),
            history: prompts::format_history(&ctx.history, self.deps.config.history_window),
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        let input: RewriteInput = decode(input)?;
        let prompt = prompts::rewrite_query(&input.query, &input.summary, &input.history);

        let rewrite = match ask(&self.deps, &prompt, GenerationMode::Fast, &self.schema) {
            Ok(Some(record)) => match text_field(&record, "retrieval_query") {
                Some(query) => Rewrite::Rewritten { query },
                None => Rewrite::Unchanged,
            },
            Ok(None) => Rewrite::Unchanged,
            Err(err) if err.is_overload() => {
                log::warn!("query rewrite unavailable: {err}");
                Rewrite::Overloaded
            }
            Err(err) => {
                log::warn!("query rewrite failed, keeping the original query: {err}");
                Rewrite::Unchanged
            }
        };
        Ok(snapshot(&rewrite))
    }

    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
        let rewrite = read::<Rewrite>("query_rewrite", exec).unwrap_or(Rewrite::Unchanged);
        let original = ctx.query_or_input().to_string();
        match rewrite {
            Rewrite::Rewritten { query } => {
                log::info!("[{}] retrieval query: {:?} -> {:?}", ctx.run_id, original, query);
                ctx.original_query = Some(original);
                ctx.retrieval_query = Some(query);
                None
            }
            Rewrite::Unchanged => {
                ctx.retrieval_query = Some(original.clone());
                ctx.original_query = Some(original);
                None
            }
            Rewrite::Overloaded => Some(outcome::FALLBACK.to_string()),
        }
    }
}
