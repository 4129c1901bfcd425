use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// One executed step, as recorded by a flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub flow: String,
    pub step: String,
    pub step_index: usize,
    pub attempts: u32,
    /// `None` when the step failed and ended the run
    pub outcome: Option<String>,
    pub used_fallback: bool,
    pub elapsed_ms: u64,
    pub metadata: HashMap<String, String>,
}

/// Trait for recording execution traces.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);
    fn flush(&self);
}

/// Simple in-memory collector for traces.
#[derive(Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Step names in execution order.
    pub fn steps(&self) -> Vec<String> {
        self.get_traces().into_iter().map(|t| t.step).collect()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    fn flush(&self) {
        // Nothing buffered outside the vector.
    }
}

/// Forwards every entry to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record(&self, entry: TraceEntry) {
        log::debug!(
            "[{}] trace {}::{} attempts={} outcome={:?} fallback={} elapsed={}ms",
            entry.run_id,
            entry.flow,
            entry.step,
            entry.attempts,
            entry.outcome,
            entry.used_fallback,
            entry.elapsed_ms
        );
    }

    fn flush(&self) {}
}
