//! Best-effort telemetry for analyst invocations.
//!
//! Each invocation attaches an [`EventCapture`] to its gateway handle. When
//! the invocation ends, captured gateway events are forwarded to the
//! [`TelemetrySink`] by [`flush_gateway_events`]. Nothing here can fail an
//! invocation.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tonpixo_gateway::{GatewayEvent, GatewayObserver};

/// Event name used for forwarded gateway calls.
pub const GATEWAY_CALL_EVENT: &str = "mcp_http_call";

/// Score recorded when forwarding gateway calls was refused.
pub const GATEWAY_CALLS_SCORE: &str = "mcp_calls";

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// A telemetry record tied to an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub name: String,
    pub metadata: Value,
    pub trace_id: Option<String>,
    /// The job id.
    pub session_id: String,
    pub user_id: Option<String>,
}

/// Destination for traces, events and scores.
pub trait TelemetrySink: Send + Sync {
    /// Open a trace for one invocation.
    fn start_trace(&self, job_id: &str, user_id: Option<&str>) -> Option<String>;

    /// Record an event. Returns false when the sink refused it.
    fn emit_event(&self, event: &TelemetryEvent) -> bool;

    fn record_score(&self, trace_id: &str, name: &str, value: f64, comment: &str);

    fn flush(&self);
}

pub type SharedTelemetry = Arc<dyn TelemetrySink>;

/// Sink that writes to `tracing` and issues UUID v4 trace ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn start_trace(&self, job_id: &str, user_id: Option<&str>) -> Option<String> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(%trace_id, %job_id, user_id, "Trace started");
        Some(trace_id)
    }

    fn emit_event(&self, event: &TelemetryEvent) -> bool {
        tracing::debug!(
            target: "tonpixo::telemetry",
            event_name = %event.name,
            trace_id = event.trace_id.as_deref(),
            session_id = %event.session_id,
            metadata = %event.metadata,
            "Telemetry event"
        );
        true
    }

    fn record_score(&self, trace_id: &str, name: &str, value: f64, comment: &str) {
        tracing::info!(target: "tonpixo::telemetry", %trace_id, score = name, value, comment, "Telemetry score");
    }

    fn flush(&self) {}
}

/// Sink used when telemetry is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn start_trace(&self, _job_id: &str, _user_id: Option<&str>) -> Option<String> {
        None
    }

    fn emit_event(&self, _event: &TelemetryEvent) -> bool {
        true
    }

    fn record_score(&self, _trace_id: &str, _name: &str, _value: f64, _comment: &str) {}

    fn flush(&self) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────────────────────────

/// Gateway observer that keeps every event of one invocation.
#[derive(Debug, Default)]
pub struct EventCapture {
    events: Mutex<Vec<GatewayEvent>>,
}

impl EventCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain captured events.
    pub fn take(&self) -> Vec<GatewayEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl GatewayObserver for EventCapture {
    fn observe(&self, event: &GatewayEvent) {
        self.events.lock().push(event.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flush
// ─────────────────────────────────────────────────────────────────────────────

/// Summary comment attached to the `mcp_calls` score.
pub fn summarize_calls(events: &[GatewayEvent]) -> String {
    let errors = events.iter().filter(|e| e.is_error()).count();
    let paths: BTreeSet<&str> = events.iter().filter_map(GatewayEvent::path).collect();
    let paths = if paths.is_empty() {
        "n/a".to_string()
    } else {
        paths.into_iter().collect::<Vec<_>>().join(",")
    };
    format!("total_calls={}; errors={}; paths={}", events.len(), errors, paths)
}

/// Forward captured gateway events to `sink`, then flush it.
///
/// Emission stops at the first refusal; a summary score is recorded in its
/// place when a trace exists.
pub fn flush_gateway_events(
    sink: &dyn TelemetrySink,
    events: &[GatewayEvent],
    trace_id: Option<&str>,
    job_id: &str,
    user_id: Option<&str>,
) {
    let mut refused = false;
    for event in events {
        let record = TelemetryEvent {
            name: GATEWAY_CALL_EVENT.to_string(),
            metadata: event.to_metadata(),
            trace_id: trace_id.map(String::from),
            session_id: job_id.to_string(),
            user_id: user_id.map(String::from),
        };
        if !sink.emit_event(&record) {
            refused = true;
            break;
        }
    }

    if refused {
        tracing::debug!(%job_id, events = events.len(), "Telemetry sink refused gateway events");
        if let Some(trace_id) = trace_id {
            sink.record_score(trace_id, GATEWAY_CALLS_SCORE, 1.0, &summarize_calls(events));
        }
    }
    sink.flush();
}
