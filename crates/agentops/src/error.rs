use thiserror::Error;

/// Error taxonomy for the scheduler, schedule store, agent discovery, and
/// process manager.
#[derive(Error, Debug)]
pub enum AgentOpsError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent already running: {0}")]
    AlreadyRunning(String),

    #[error("agent not running: {0}")]
    NotRunning(String),

    #[error("schedule {0} is yaml-sourced and read-only to this path")]
    ReadOnlySchedule(String),

    #[error("agent directory missing: {0}")]
    DirectoryMissing(String),

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentOpsError>;
