use crate::agent::nodes::{ask, decode, read, snapshot, text_field};
use crate::agent::retriever::{TopicFilter, TopicInfo};
use crate::agent::{AgentDeps, outcome, prompts};
use crate::core::NodeValue;
use crate::core::context::SharedContext;
use crate::core::error::NodeError;
use crate::core::node::NodeLogic;
use crate::llm::GenerationMode;
use crate::parser::{FieldType, Schema};
use serde::{Deserialize, Serialize};

/// Narrows retrieval to one topic (and optionally a subtopic) of the knowledge base.
///
/// Failures are retried; once retries run out, retrieval proceeds unfiltered.
pub struct TopicClassify {
    deps: AgentDeps,
    schema: Schema,
}

#[derive(Serialize, Deserialize)]
struct TopicInput {
    query: String,
    role: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum Classification {
    Filter(TopicFilter),
    Overloaded,
}

impl TopicClassify {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            schema: Schema::new()
                .required("topic", FieldType::String)
                .optional("subtopic", FieldType::Any),
        }
    }

    /// Keeps only names the knowledge base knows, in its own spelling.
    fn resolve(topics: &[TopicInfo], topic: Option<String>, subtopic: Option<String>) -> TopicFilter {
        let Some(info) = topic.and_then(|t| topics.iter().find(|i| i.topic.eq_ignore_ascii_case(&t)))
        else {
            return TopicFilter::none();
        };
        let subtopic = subtopic.and_then(|s| {
            info.subtopics
                .iter()
                .find(|known| known.eq_ignore_ascii_case(&s))
                .cloned()
        });
        TopicFilter {
            topic: Some(info.topic.clone()),
            subtopic,
        }
    }
}

impl NodeLogic for TopicClassify {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        snapshot(&TopicInput {
            query: ctx.effective_query().to_string(),
            role: ctx.role.clone(),
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        let input: TopicInput = decode(input)?;
        let topics = self.deps.retriever.topics(&input.role)?;
        if topics.is_empty() {
            return Ok(snapshot(&Classification::Filter(TopicFilter::none())));
        }

        let prompt = prompts::topic_classify(&input.query, &topics);
        let record = match ask(&self.deps, &prompt, GenerationMode::Fast, &self.schema) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(NodeError::msg("topic classification could not be parsed")),
            Err(err) if err.is_overload() => {
                log::warn!("topic classification unavailable: {err}");
                return Ok(snapshot(&Classification::Overloaded));
            }
            Err(err) => return Err(err.into()),
        };

        let topic = text_field(&record, "topic");
        let subtopic = text_field(&record, "subtopic");
        let filter = Self::resolve(&topics, topic.clone(), subtopic);
        if filter.topic.is_none() {
            log::warn!("classifier chose unknown topic {topic:?}, searching unfiltered");
        }
        Ok(snapshot(&Classification::Filter(filter)))
    }

    fn exec_fallback(&self, _input: NodeValue, error: &NodeError) -> Option<NodeValue> {
        log::warn!("topic classification gave up ({error}), searching unfiltered");
        Some(snapshot(&Classification::Filter(TopicFilter::none())))
    }

    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
        let classification = read::<Classification>("topic_classify", exec)
            .unwrap_or(Classification::Filter(TopicFilter::none()));
        match classification {
            Classification::Filter(filter) => {
                log::info!(
                    "[{}] topic filter: {:?} / {:?}",
                    ctx.run_id,
                    filter.topic,
                    filter.subtopic
                );
                ctx.topic = filter.topic;
                ctx.subtopic = filter.subtopic;
                None
            }
            Classification::Overloaded => Some(outcome::FALLBACK.to_string()),
        }
    }
}
