use crate::agent::{AgentDeps, outcome};
use crate::core::NodeValue;
use crate::core::context::{Answer, AnswerKind, SharedContext};
use crate::core::node::NodeLogic;

/// Terminal step: replaces whatever was pending with the overload apology.
pub struct FallbackReply {
    deps: AgentDeps,
}

impl FallbackReply {
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps }
    }
}

impl NodeLogic for FallbackReply {
    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, _exec: NodeValue) -> Option<String> {
        log::warn!("[{}] answering with the fallback message", ctx.run_id);
        ctx.answer = Some(Answer::new(
            self.deps.config.fallback_message.clone(),
            Vec::new(),
            AnswerKind::Fallback,
        ));
        Some(outcome::FALLBACK.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::nodes::testing::deps;
    use crate::core::node::Node;

    #[test]
    fn test_writes_apology_with_no_suggestions() {
        let (deps, script) = deps(vec![]);
        let expected = deps.config.fallback_message.clone();
        let mut ctx = SharedContext::new("hi", "patient_dental");
        ctx.answer = Some(Answer::new("partial", vec!["q?".into()], AnswerKind::Composed));

        let outcome = Node::new(FallbackReply::new(deps)).run(&mut ctx).unwrap();
        assert_eq!(outcome, "fallback");
        let answer = ctx.answer.unwrap();
        assert_eq!(answer.text, expected);
        assert!(answer.suggestions.is_empty());
        assert_eq!(answer.kind, AnswerKind::Fallback);
        assert_eq!(script.calls(), 0);
    }
}
