use crate::core::context::SharedContext;
use crate::core::error::{FlowError, NodeError};
use crate::core::node::{Node, NodeLogic};
use crate::core::telemetry::{Telemetry, TraceEntry};
use crate::core::validation::ValidationResult;
use crate::core::{DEFAULT_OUTCOME, NodeValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Position of a step inside the flow that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(usize);

impl StepId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The orchestration logic behind a [`Flow`].
///
/// Steps live in an arena indexed by [`StepId`]; edges map `(source, outcome)` to a destination.
pub struct FlowLogic {
    name: String,
    steps: Vec<Node>,
    edges: BTreeMap<StepId, BTreeMap<String, StepId>>,
    start: StepId,
    step_limit: Option<usize>,
    telemetry: Option<Arc<dyn Telemetry>>,
}

/// A directed graph of steps connected by outcome labels.
///
/// A flow is itself usable as a step: convert it with `Node::from(flow)` (or pass it anywhere an
/// `impl Into<Node>` is accepted). The nested graph then runs on a copy of the parent's context,
/// writes the result back, and reports its terminal step's outcome to the parent.
pub struct Flow {
    logic: FlowLogic,
}

#[derive(Serialize, Deserialize)]
struct SubFlowResult {
    outcome: String,
    context: SharedContext,
}

impl Flow {
    /// Creates a flow whose entry step is `entry`.
    pub fn new(entry: impl Into<Node>) -> Flow {
        Flow {
            logic: FlowLogic {
                name: String::from("flow"),
                steps: vec![entry.into()],
                edges: BTreeMap::new(),
                start: StepId(0),
                step_limit: None,
                telemetry: None,
            },
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.logic.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.logic.name
    }

    /// Id of the entry step.
    pub fn entry(&self) -> StepId {
        self.logic.start
    }

    pub fn set_entry(&mut self, id: StepId) {
        self.logic.start = id;
    }

    /// Adds a step to the graph. It only runs once some edge routes to it.
    pub fn add_step(&mut self, step: impl Into<Node>) -> StepId {
        self.logic.steps.push(step.into());
        StepId(self.logic.steps.len() - 1)
    }

    /// Routes `outcome` returned by `from` to `to`, replacing any previous destination.
    pub fn add_edge(&mut self, from: StepId, outcome: impl Into<String>, to: StepId) -> &mut Self {
        let outcome = outcome.into();
        let successors = self.logic.edges.entry(from).or_default();
        if let Some(previous) = successors.insert(outcome.clone(), to) {
            log::warn!(
                "Warning: outcome '{}' of step {} already routed to {}, overwriting with {}.",
                outcome,
                from,
                previous,
                to
            );
        }
        self
    }

    /// Chains `to` after `from` on the `"default"` outcome.
    pub fn add_default_edge(&mut self, from: StepId, to: StepId) -> &mut Self {
        self.add_edge(from, DEFAULT_OUTCOME, to)
    }

    pub fn successor(&self, from: StepId, outcome: &str) -> Option<StepId> {
        self.logic.successor(from, outcome)
    }

    pub fn step(&self, id: StepId) -> Option<&Node> {
        self.logic.steps.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.logic.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logic.steps.is_empty()
    }

    /// Aborts a run with `FlowError::StepLimitExceeded` once `limit` steps have executed.
    ///
    /// Only this flow's own steps count. A nested flow is one step here, however many steps it
    /// runs inside, so a sub-flow that can loop needs a limit of its own.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.logic.step_limit = Some(limit);
        self
    }

    /// Records one trace entry per executed step into `telemetry` on every `run`.
    ///
    /// When this flow runs nested inside another, the enclosing run's sink takes precedence.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.logic.telemetry = Some(telemetry);
        self
    }

    /// Runs the graph from the entry step until an outcome has no matching edge.
    ///
    /// Returns the terminal step's outcome. Only unrecoverable step failures are errors.
    pub fn run(&self, ctx: &mut SharedContext) -> Result<String, FlowError> {
        self.logic.orchestrate(ctx, self.logic.telemetry.as_deref())
    }

    /// Like [`Flow::run`], recording every executed step into `telemetry`, including the steps
    /// of nested flows. A sub-flow's entries come before its own entry in the parent, tagged
    /// with the sub-flow's name.
    pub fn run_with_telemetry(
        &self,
        ctx: &mut SharedContext,
        telemetry: &dyn Telemetry,
    ) -> Result<String, FlowError> {
        let result = self.logic.orchestrate(ctx, Some(telemetry));
        telemetry.flush();
        result
    }

    /// Checks the wiring: errors for edges that touch unknown steps, warnings for steps that can
    /// never be reached from the entry. Cycles are legal and not reported.
    pub fn validate(&self) -> ValidationResult {
        let logic = &self.logic;
        let mut result = ValidationResult::new();
        let known = |id: StepId| id.0 < logic.steps.len();

        if !known(logic.start) {
            result.add_error(format!("entry step {} does not exist", logic.start));
        }

        for (from, successors) in &logic.edges {
            if !known(*from) {
                result.add_error(format!(
                    "edges registered on unknown step {} ({} outcome(s))",
                    from,
                    successors.len()
                ));
                continue;
            }
            for (outcome, to) in successors {
                if !known(*to) {
                    result.add_error(format!(
                        "outcome '{}' of step '{}' ({}) targets unknown step {}",
                        outcome,
                        logic.steps[from.0].name(),
                        from,
                        to
                    ));
                }
            }
        }

        let mut reachable = vec![false; logic.steps.len()];
        let mut queue = VecDeque::new();
        if known(logic.start) {
            reachable[logic.start.0] = true;
            queue.push_back(logic.start);
        }
        while let Some(id) = queue.pop_front() {
            for to in logic.edges.get(&id).into_iter().flat_map(|s| s.values()) {
                if known(*to) && !reachable[to.0] {
                    reachable[to.0] = true;
                    queue.push_back(*to);
                }
            }
        }
        for (index, seen) in reachable.iter().enumerate() {
            if !seen {
                result.add_warning(format!(
                    "step '{}' ({}) is unreachable from the entry step",
                    logic.steps[index].name(),
                    StepId(index)
                ));
            }
        }

        result
    }
}

impl From<Flow> for Node {
    fn from(flow: Flow) -> Self {
        let name = flow.logic.name.clone();
        Node::new(flow.logic).named(name)
    }
}

impl FlowLogic {
    fn successor(&self, from: StepId, outcome: &str) -> Option<StepId> {
        self.edges.get(&from).and_then(|s| s.get(outcome)).copied()
    }

    fn orchestrate(
        &self,
        ctx: &mut SharedContext,
        telemetry: Option<&dyn Telemetry>,
    ) -> Result<String, FlowError> {
        let mut current = self.start;
        let mut executed = 0usize;
        log::info!("[{}] flow '{}' started", ctx.run_id, self.name);

        loop {
            if let Some(limit) = self.step_limit {
                if executed >= limit {
                    log::error!(
                        "[{}] flow '{}' aborted after {} steps",
                        ctx.run_id,
                        self.name,
                        executed
                    );
                    return Err(FlowError::StepLimitExceeded { limit });
                }
            }

            let node = self
                .steps
                .get(current.0)
                .ok_or(FlowError::UnknownStep(current))?;
            let started = Instant::now();
            let result = node.run_step(ctx, telemetry);
            executed += 1;

            if let Some(telemetry) = telemetry {
                telemetry.record(self.trace(ctx, node, current, &result, started));
            }

            let run = match result {
                Ok(run) => run,
                Err(err) => {
                    log::error!("[{}] flow '{}' aborted: {}", ctx.run_id, self.name, err);
                    return Err(err);
                }
            };

            match self.successor(current, &run.outcome) {
                Some(next) => {
                    log::info!(
                        "[{}] {}: '{}' --{}--> {}",
                        ctx.run_id,
                        self.name,
                        node.name(),
                        run.outcome,
                        next
                    );
                    current = next;
                }
                None => {
                    log::info!(
                        "[{}] flow '{}' finished at '{}' with outcome '{}'",
                        ctx.run_id,
                        self.name,
                        node.name(),
                        run.outcome
                    );
                    return Ok(run.outcome);
                }
            }
        }
    }

    fn trace(
        &self,
        ctx: &SharedContext,
        node: &Node,
        id: StepId,
        result: &Result<crate::core::node::StepRun, FlowError>,
        started: Instant,
    ) -> TraceEntry {
        let mut metadata = HashMap::new();
        let (attempts, outcome, used_fallback) = match result {
            Ok(run) => (run.attempts, Some(run.outcome.clone()), run.used_fallback),
            Err(err) => {
                metadata.insert("error".to_string(), err.to_string());
                let attempts = match err {
                    FlowError::StepFailed { attempts, .. } => *attempts,
                    _ => 0,
                };
                (attempts, None, false)
            }
        };
        TraceEntry {
            timestamp: chrono::Utc::now(),
            run_id: ctx.run_id,
            flow: self.name.clone(),
            step: node.name().to_string(),
            step_index: id.0,
            attempts,
            outcome,
            used_fallback,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            metadata,
        }
    }
}

impl NodeLogic for FlowLogic {
    fn prep(&self, ctx: &SharedContext) -> NodeValue {
        serde_json::to_value(ctx).unwrap_or_else(|err| {
            log::error!("[{}] could not snapshot context for '{}': {}", ctx.run_id, self.name, err);
            NodeValue::Null
        })
    }

    fn exec(&self, input: NodeValue) -> Result<NodeValue, NodeError> {
        self.exec_traced(input, None)
    }

    fn exec_traced(
        &self,
        input: NodeValue,
        telemetry: Option<&dyn Telemetry>,
    ) -> Result<NodeValue, NodeError> {
        let mut ctx: SharedContext = serde_json::from_value(input)?;
        let outcome = self
            .orchestrate(&mut ctx, telemetry.or(self.telemetry.as_deref()))
            .map_err(|err| NodeError::SubFlow(Box::new(err)))?;
        Ok(serde_json::to_value(SubFlowResult {
            outcome,
            context: ctx,
        })?)
    }

    fn post(
        &self,
        ctx: &mut SharedContext,
        _prep_res: NodeValue,
        exec_res: NodeValue,
    ) -> Option<String> {
        match serde_json::from_value::<SubFlowResult>(exec_res) {
            Ok(result) => {
                *ctx = result.context;
                Some(result.outcome)
            }
            Err(err) => {
                log::error!(
                    "[{}] sub-flow '{}' returned an unreadable result, keeping parent context: {}",
                    ctx.run_id,
                    self.name,
                    err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::MemoryTelemetry;
    use serde_json::json;

    struct Visit {
        id: &'static str,
        outcome: Option<&'static str>,
    }

    impl NodeLogic for Visit {
        fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, _exec: NodeValue) -> Option<String> {
            let mut visited: Vec<String> = ctx.get_or("visited", Vec::new());
            visited.push(self.id.to_string());
            ctx.set("visited", json!(visited));
            self.outcome.map(str::to_string)
        }
    }

    fn visit(id: &'static str, outcome: Option<&'static str>) -> Node {
        Node::new(Visit { id, outcome }).named(id)
    }

    fn visited(ctx: &SharedContext) -> Vec<String> {
        ctx.get_or("visited", Vec::new())
    }

    #[test]
    fn test_single_step_flow_returns_default() {
        let flow = Flow::new(visit("only", None));
        let mut ctx = SharedContext::new("hi", "user");

        assert_eq!(flow.run(&mut ctx).unwrap(), "default");
        assert_eq!(visited(&ctx), vec!["only"]);
    }

    #[test]
    fn test_chain_follows_default_edges() {
        let mut flow = Flow::new(visit("a", None));
        let b = flow.add_step(visit("b", None));
        let c = flow.add_step(visit("c", Some("done")));
        flow.add_default_edge(flow.entry(), b).add_default_edge(b, c);

        let mut ctx = SharedContext::new("hi", "user");
        assert_eq!(flow.run(&mut ctx).unwrap(), "done");
        assert_eq!(visited(&ctx), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unmatched_outcome_ends_run_without_error() {
        let mut flow = Flow::new(visit("a", Some("unexpected")));
        let b = flow.add_step(visit("b", None));
        flow.add_edge(flow.entry(), "expected", b);

        let mut ctx = SharedContext::new("hi", "user");
        assert_eq!(flow.run(&mut ctx).unwrap(), "unexpected");
        assert_eq!(visited(&ctx), vec!["a"]);
    }

    #[test]
    fn test_add_edge_overwrites_previous_destination() {
        let mut flow = Flow::new(visit("a", Some("go")));
        let b = flow.add_step(visit("b", None));
        let c = flow.add_step(visit("c", None));
        flow.add_edge(flow.entry(), "go", b);
        flow.add_edge(flow.entry(), "go", c);

        assert_eq!(flow.successor(flow.entry(), "go"), Some(c));
        let mut ctx = SharedContext::new("hi", "user");
        flow.run(&mut ctx).unwrap();
        assert_eq!(visited(&ctx), vec!["a", "c"]);
    }

    #[test]
    fn test_sub_flow_writes_back_and_reports_terminal_outcome() {
        let mut inner = Flow::new(visit("inner_a", None)).named("inner");
        let inner_b = inner.add_step(visit("inner_b", Some("inner_done")));
        inner.add_default_edge(inner.entry(), inner_b);

        let mut outer = Flow::new(visit("outer_a", None));
        let sub = outer.add_step(inner);
        let after = outer.add_step(visit("after", None));
        outer
            .add_default_edge(outer.entry(), sub)
            .add_edge(sub, "inner_done", after);

        let mut ctx = SharedContext::new("hi", "user");
        assert_eq!(outer.run(&mut ctx).unwrap(), "default");
        assert_eq!(visited(&ctx), vec!["outer_a", "inner_a", "inner_b", "after"]);
        assert_eq!(outer.step(sub).map(Node::name), Some("inner"));
    }

    #[test]
    fn test_step_limit_stops_endless_cycle() {
        let mut flow = Flow::new(visit("loop", Some("again"))).with_step_limit(5);
        flow.add_edge(flow.entry(), "again", flow.entry());

        let mut ctx = SharedContext::new("hi", "user");
        let err = flow.run(&mut ctx).unwrap_err();
        assert!(matches!(err, FlowError::StepLimitExceeded { limit: 5 }));
        assert_eq!(visited(&ctx).len(), 5);
    }

    #[test]
    fn test_validate_reports_unknown_targets_and_unreachable_steps() {
        let mut big = Flow::new(visit("x", None));
        big.add_step(visit("y", None));
        big.add_step(visit("z", None));
        let far = big.add_step(visit("w", None));

        let mut flow = Flow::new(visit("a", None));
        let b = flow.add_step(visit("b", None));
        flow.add_step(visit("orphan", None));
        flow.add_default_edge(flow.entry(), b);
        flow.add_edge(b, "loop", flow.entry());
        flow.add_edge(b, "broken", far);

        let result = flow.validate();
        assert!(!result.is_safe());
        assert_eq!(result.errors().count(), 1);
        let warnings: Vec<_> = result.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("orphan"));
    }

    #[test]
    fn test_routing_to_unknown_step_is_an_error() {
        let mut big = Flow::new(visit("x", None));
        big.add_step(visit("y", None));
        big.add_step(visit("z", None));
        let far = big.add_step(visit("w", None));

        let mut flow = Flow::new(visit("a", None));
        flow.add_default_edge(flow.entry(), far);

        let mut ctx = SharedContext::new("hi", "user");
        assert!(matches!(flow.run(&mut ctx), Err(FlowError::UnknownStep(id)) if id == far));
    }

    #[test]
    fn test_telemetry_records_each_executed_step() {
        let mut flow = Flow::new(visit("a", None)).named("traced");
        let b = flow.add_step(visit("b", Some("end")));
        flow.add_default_edge(flow.entry(), b);

        let telemetry = MemoryTelemetry::new();
        let mut ctx = SharedContext::new("hi", "user");
        flow.run_with_telemetry(&mut ctx, &telemetry).unwrap();

        let traces = telemetry.get_traces();
        assert_eq!(telemetry.steps(), vec!["a", "b"]);
        assert!(traces.iter().all(|t| t.run_id == ctx.run_id && t.flow == "traced"));
        assert_eq!(traces[1].outcome.as_deref(), Some("end"));
        assert_eq!(traces[1].step_index, 1);
    }

    #[test]
    fn test_telemetry_reaches_into_sub_flows() {
        let mut inner = Flow::new(visit("inner_a", None)).named("inner");
        let inner_b = inner.add_step(visit("inner_b", None));
        inner.add_default_edge(inner.entry(), inner_b);

        let mut outer = Flow::new(visit("outer_a", None)).named("outer");
        let sub = outer.add_step(inner);
        outer.add_default_edge(outer.entry(), sub);

        let telemetry = MemoryTelemetry::new();
        let mut ctx = SharedContext::new("hi", "user");
        outer.run_with_telemetry(&mut ctx, &telemetry).unwrap();

        let flows: Vec<(String, String)> = telemetry
            .get_traces()
            .into_iter()
            .map(|t| (t.flow, t.step))
            .collect();
        let expected = [
            ("outer", "outer_a"),
            ("inner", "inner_a"),
            ("inner", "inner_b"),
            ("outer", "inner"),
        ];
        assert_eq!(
            flows,
            expected.map(|(f, s)| (f.to_string(), s.to_string())).to_vec()
        );
    }

    #[test]
    fn test_step_limit_counts_sub_flow_as_one_step() {
        let mut inner = Flow::new(visit("i1", None)).named("inner");
        let i2 = inner.add_step(visit("i2", None));
        let i3 = inner.add_step(visit("i3", None));
        inner.add_default_edge(inner.entry(), i2).add_default_edge(i2, i3);

        let mut outer = Flow::new(visit("o1", None)).with_step_limit(2);
        let sub = outer.add_step(inner);
        outer.add_default_edge(outer.entry(), sub);

        let mut ctx = SharedContext::new("hi", "user");
        assert!(outer.run(&mut ctx).is_ok());
        assert_eq!(visited(&ctx).len(), 4);
    }
}
