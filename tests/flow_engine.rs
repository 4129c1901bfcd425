//! Integration tests for the graph engine: routing, retries, fallbacks and nesting.

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use turnflow::prelude::*;

/// Appends its name to the `visited` list and returns a fixed outcome.
struct Mark {
    name: &'static str,
    outcome: Option<&'static str>,
}

impl NodeLogic for Mark {
    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, _exec: NodeValue) -> Option<String> {
        let mut visited: Vec<String> = ctx.get_or("visited", Vec::new());
        visited.push(self.name.to_string());
        ctx.set("visited", json!(visited));
        self.outcome.map(str::to_string)
    }
}

fn mark(name: &'static str, outcome: Option<&'static str>) -> Node {
    Node::new(Mark { name, outcome }).named(name)
}

fn visited(ctx: &SharedContext) -> Vec<String> {
    ctx.get_or("visited", Vec::new())
}

struct AlwaysFails {
    calls: Arc<AtomicU32>,
}

impl NodeLogic for AlwaysFails {
    fn exec(&self, _input: NodeValue) -> Result<NodeValue, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NodeError::msg("boom"))
    }

    fn post(&self, _ctx: &mut SharedContext, _prep: NodeValue, _exec: NodeValue) -> Option<String> {
        Some("ok".into())
    }
}

#[test]
fn test_follows_labelled_edges_to_terminal_step() {
    let mut flow = Flow::new(mark("a", Some("left")));
    let b = flow.add_step(mark("b", None));
    let c = flow.add_step(mark("c", Some("done")));
    let a = flow.entry();
    flow.add_edge(a, "left", b).add_edge(a, "right", c).add_default_edge(b, c);

    let mut ctx = SharedContext::new("hi", "patient_dental");
    let outcome = flow.run(&mut ctx).unwrap();

    assert_eq!(outcome, "done");
    assert_eq!(visited(&ctx), vec!["a", "b", "c"]);
}

#[test]
fn test_unmatched_outcome_ends_run_without_error() {
    let mut flow = Flow::new(mark("a", Some("nowhere")));
    let b = flow.add_step(mark("b", None));
    flow.add_default_edge(flow.entry(), b);

    let mut ctx = SharedContext::new("hi", "patient_dental");
    assert_eq!(flow.run(&mut ctx).unwrap(), "nowhere");
    assert_eq!(visited(&ctx), vec!["a"]);
}

#[test]
fn test_failing_entry_stops_before_any_successor() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut flow = Flow::new(
        Node::new(AlwaysFails { calls: calls.clone() })
            .named("a")
            .with_retries(3, Duration::ZERO),
    );
    let b = flow.add_step(mark("b", None));
    let c = flow.add_step(mark("c", None));
    let a = flow.entry();
    flow.add_edge(a, "ok", b).add_edge(a, "fail", c);

    let mut ctx = SharedContext::new("hi", "patient_dental");
    let err = flow.run(&mut ctx).unwrap_err();

    assert_eq!(err.step(), Some("a"));
    assert!(matches!(err, FlowError::StepFailed { attempts: 3, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(visited(&ctx).is_empty());
}

#[test]
fn test_nested_flow_shares_context_and_reports_outcome() {
    let mut inner = Flow::new(mark("inner_a", None)).named("inner");
    let inner_b = inner.add_step(mark("inner_b", Some("finished")));
    inner.add_default_edge(inner.entry(), inner_b);

    let mut outer = Flow::new(mark("start", None));
    let nested = outer.add_step(inner);
    let after = outer.add_step(mark("after", None));
    outer
        .add_default_edge(outer.entry(), nested)
        .add_edge(nested, "finished", after);

    let mut ctx = SharedContext::new("hi", "patient_dental");
    let run_id = ctx.run_id;
    outer.run(&mut ctx).unwrap();

    assert_eq!(visited(&ctx), vec!["start", "inner_a", "inner_b", "after"]);
    assert_eq!(ctx.run_id, run_id);
}

#[test]
fn test_cycles_are_bounded_by_step_limit() {
    let mut flow = Flow::new(mark("loop", Some("again"))).with_step_limit(5);
    let entry = flow.entry();
    flow.add_edge(entry, "again", entry);

    let mut ctx = SharedContext::new("hi", "patient_dental");
    let err = flow.run(&mut ctx).unwrap_err();

    assert!(matches!(err, FlowError::StepLimitExceeded { limit: 5 }));
    assert_eq!(visited(&ctx).len(), 5);
}

#[test]
fn test_telemetry_records_every_step() {
    let mut flow = Flow::new(mark("a", None)).named("traced");
    let b = flow.add_step(mark("b", Some("end")));
    flow.add_default_edge(flow.entry(), b);

    let telemetry = MemoryTelemetry::new();
    let mut ctx = SharedContext::new("hi", "patient_dental");
    flow.run_with_telemetry(&mut ctx, &telemetry).unwrap();

    let traces = telemetry.get_traces();
    assert_eq!(traces.len(), 2);
    assert_eq!(telemetry.steps(), vec!["a", "b"]);
    assert!(traces.iter().all(|t| t.run_id == ctx.run_id && t.flow == "traced"));
    assert_eq!(traces[1].outcome.as_deref(), Some("end"));
}

#[test]
fn test_validate_flags_unreachable_steps() {
    let mut flow = Flow::new(mark("a", None));
    let b = flow.add_step(mark("b", None));
    flow.add_step(mark("orphan", None));
    flow.add_default_edge(flow.entry(), b);

    let report = flow.validate();
    assert!(report.is_safe());
    assert!(report.has_warnings());
    assert!(report.warnings().any(|w| w.contains("orphan")));
}
