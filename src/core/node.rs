use crate::core::context::SharedContext;
use crate::core::error::{FlowError, NodeError};
use crate::core::telemetry::Telemetry;
use crate::core::{DEFAULT_OUTCOME, NodeValue};
use std::thread;
use std::time::Duration;

/// A step in a workflow graph.
pub struct Node {
    /// Name and retry policy
    pub data: NodeCore,
    /// The logic implementation that defines the step's behaviour
    pub behaviour: Box<dyn NodeLogic>,
}

/// Per-step settings that survive across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCore {
    /// Used in logs, traces and `FlowError::StepFailed`
    pub name: String,
    /// Total number of `exec` attempts; 0 and 1 both mean "no retry"
    pub max_retries: u32,
    /// Pause between two attempts
    pub wait: Duration,
}

impl Default for NodeCore {
    fn default() -> Self {
        Self {
            name: String::from("node"),
            max_retries: 1,
            wait: Duration::ZERO,
        }
    }
}

/// What a single step invocation produced, as seen by the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StepRun {
    pub outcome: String,
    pub attempts: u32,
    pub used_fallback: bool,
}

impl Node {
    /// Creates a new step with the given logic, named after the logic type.
    pub fn new<L: NodeLogic>(behaviour: L) -> Self {
        Node {
            data: NodeCore {
                name: short_type_name::<L>().to_string(),
                ..Default::default()
            },
            behaviour: Box::new(behaviour),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.data.name = name.into();
        self
    }

    /// Allows `exec` to be attempted up to `max_retries` times, sleeping `wait` in between.
    pub fn with_retries(mut self, max_retries: u32, wait: Duration) -> Self {
        self.data.max_retries = max_retries;
        self.data.wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Runs the three phases once and returns the outcome label.
    pub fn run(&self, ctx: &mut SharedContext) -> Result<String, FlowError> {
        self.run_step(ctx, None).map(|run| run.outcome)
    }

    pub(crate) fn run_step(
        &self,
        ctx: &mut SharedContext,
        telemetry: Option<&dyn Telemetry>,
    ) -> Result<StepRun, FlowError> {
        let prep_res = self.behaviour.prep(ctx);
        let max_attempts = self.data.max_retries.max(1);

        let mut attempts = 0;
        let (exec_res, used_fallback) = loop {
            attempts += 1;
            match self.behaviour.exec_traced(prep_res.clone(), telemetry) {
                Ok(value) => break (value, false),
                Err(err) if attempts < max_attempts => {
                    log::warn!(
                        "[{}] step '{}' attempt {}/{} failed: {}",
                        ctx.run_id,
                        self.data.name,
                        attempts,
                        max_attempts,
                        err
                    );
                    if !self.data.wait.is_zero() {
                        thread::sleep(self.data.wait);
                    }
                }
                Err(err) => match self.behaviour.exec_fallback(prep_res.clone(), &err) {
                    Some(value) => {
                        log::warn!(
                            "[{}] step '{}' gave up after {} attempt(s), using fallback: {}",
                            ctx.run_id,
                            self.data.name,
                            attempts,
                            err
                        );
                        break (value, true);
                    }
                    None => {
                        return Err(FlowError::StepFailed {
                            step: self.data.name.clone(),
                            attempts,
                            source: err,
                        });
                    }
                },
            }
        };

        let outcome = self
            .behaviour
            .post(ctx, prep_res, exec_res)
            .unwrap_or_else(|| DEFAULT_OUTCOME.to_string());

        Ok(StepRun {
            outcome,
            attempts,
            used_fallback,
        })
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("data", &self.data).finish_non_exhaustive()
    }
}

/// Defines the behaviour of a workflow step.
///
/// `prep` reads the context, `exec` does the work (and is the only phase that is retried),
/// `post` writes results back and picks the outcome used for routing.
pub trait NodeLogic: Send + Sync + 'static {
    /// Read what `exec` needs out of the shared context.
    fn prep(&self, _ctx: &SharedContext) -> NodeValue {
        NodeValue::Null
    }

    /// Execute the core logic of the step. Must not touch the context.
    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        Ok(input)
    }

    /// `exec` as called by a running flow, with that run's telemetry sink. Sub-flows record
    /// their own steps into it; plain steps ignore it.
    fn exec_traced(
        &self,
        input: NodeValue,
        _telemetry: Option<&dyn Telemetry>,
    ) -> Result<NodeValue, NodeError> {
        self.exec(input)
    }

    /// Value to use once every attempt failed. `None` surfaces the error to the caller of the run.
    fn exec_fallback(&self, _input: NodeValue, _error: &NodeError) -> Option<NodeValue> {
        None
    }

    /// Update the context and return the outcome label; `None` routes on `"default"`.
    fn post(
        &self,
        _ctx: &mut SharedContext,
        _prep_res: NodeValue,
        _exec_res: NodeValue,
    ) -> Option<String> {
        None
    }
}

impl<L: NodeLogic> From<L> for Node {
    fn from(logic: L) -> Self {
        Node::new(logic)
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: Arc<AtomicU32>,
        succeed_on: u32,
        fallback: Option<NodeValue>,
    }

    impl NodeLogic for Flaky {
        fn exec(&self, _input: NodeValue) -> Result<NodeValue, NodeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(json!(n))
            } else {
                Err(NodeError::msg(format!("attempt {n} failed")))
            }
        }

        fn exec_fallback(&self, _input: NodeValue, _error: &NodeError) -> Option<NodeValue> {
            self.fallback.clone()
        }

        fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, exec: NodeValue) -> Option<String> {
            ctx.set("result", exec);
            Some("done".into())
        }
    }

    fn flaky(succeed_on: u32, fallback: Option<NodeValue>) -> (Flaky, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Flaky {
                calls: calls.clone(),
                succeed_on,
                fallback,
            },
            calls,
        )
    }

    #[test]
    fn test_default_name_is_short_type_name() {
        let (logic, _) = flaky(1, None);
        let node = Node::new(logic);
        assert_eq!(node.name(), "Flaky");
        assert_eq!(node.data.max_retries, 1);
        assert_eq!(node.named("custom").name(), "custom");
    }

    #[test]
    fn test_post_returning_none_routes_default() {
        struct Silent;
        impl NodeLogic for Silent {}

        let mut ctx = SharedContext::new("hi", "user");
        let outcome = Node::new(Silent).run(&mut ctx).unwrap();
        assert_eq!(outcome, DEFAULT_OUTCOME);
    }

    #[test]
    fn test_retries_until_success() {
        let (logic, calls) = flaky(3, None);
        let node = Node::new(logic).with_retries(3, Duration::ZERO);
        let mut ctx = SharedContext::new("hi", "user");

        let run = node.run_step(&mut ctx, None).unwrap();
        assert_eq!(run.outcome, "done");
        assert_eq!(run.attempts, 3);
        assert!(!run.used_fallback);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.get("result"), Some(&json!(3)));
    }

    #[test]
    fn test_exhausted_retries_surface_last_error() {
        let (logic, calls) = flaky(10, None);
        let node = Node::new(logic).with_retries(2, Duration::ZERO);
        let mut ctx = SharedContext::new("hi", "user");

        let err = node.run(&mut ctx).unwrap_err();
        match err {
            FlowError::StepFailed { step, attempts, source } => {
                assert_eq!(step, "Flaky");
                assert_eq!(attempts, 2);
                assert_eq!(source.to_string(), "attempt 2 failed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ctx.get("result").is_none());
    }

    #[test]
    fn test_fallback_value_used_after_retries() {
        let (logic, calls) = flaky(10, Some(json!("fallback")));
        let node = Node::new(logic).with_retries(3, Duration::ZERO);
        let mut ctx = SharedContext::new("hi", "user");

        let run = node.run_step(&mut ctx, None).unwrap();
        assert!(run.used_fallback);
        assert_eq!(run.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.get("result"), Some(&json!("fallback")));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let (logic, calls) = flaky(1, None);
        let node = Node::new(logic).with_retries(0, Duration::ZERO);
        let mut ctx = SharedContext::new("hi", "user");

        node.run(&mut ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
