use serde::Serialize;

/// Structured, always-on business-event logging for the memory subsystem.
/// Distinct from the optional, caller-injected audit emitter used elsewhere
/// in the agent-ops core — this is plain observability, gated only by the
/// ambient `tracing` filter.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ChunkIndexed { source: String, chunk_count: usize },
    SourceDeleted { source: String, removed_count: usize },
    SearchPerformed { query: String, result_count: usize, embedder_used: bool },
    DailyLogAppended { date: String },
}

impl TraceEvent {
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(trace_event = %json, "sa_event"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize trace event"),
        }
    }
}
