use serde::Serialize;

/// Structured, always-on business-event logging for the agent-operations
/// core. Distinct from the optional, caller-injected audit emitter the
/// scheduler and process manager also support.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ScheduleFired { schedule_id: String },
    ScheduleSkipped { schedule_id: String, reason: String },
    ScheduleCompleted { schedule_id: String, status: String, duration_ms: u64 },
    AgentStarted { agent_id: String, port: u16 },
    AgentStopped { agent_id: String },
    AgentErrored { agent_id: String, error: String },
}

impl TraceEvent {
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(trace_event = %json, "sa_event"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize trace event"),
        }
    }
}
