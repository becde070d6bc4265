use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a schedule's definition came from. `Yaml` schedules are owned by
/// an external config loader and read-only to LLM-originated mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleSource {
    Yaml,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub cron: String,
    pub description: String,
    pub skill: Option<String>,
    pub channel: Option<String>,
    pub channel_target: Option<String>,
    pub source: ScheduleSource,
    pub enabled: bool,
    pub created: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub run_count: u64,
}

/// Outcome of one dispatch (or skipped attempt) for a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Error,
    Running,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Running => "running",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only record of a schedule's dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub schedule_id: String,
    pub status: RunStatus,
    pub duration: String,
    pub correlation_id: String,
    pub error: Option<String>,
}

/// Lifecycle state of an agent under the process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub version: String,
    pub framework: String,
    pub model: String,
    pub tools: Vec<String>,
    pub channels: Vec<String>,
    pub skill_count: usize,
    pub directory: PathBuf,
    pub status: AgentStatus,
    pub port: u16,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub needs_passphrase: bool,
}
