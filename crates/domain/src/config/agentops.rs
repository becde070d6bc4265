use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent operations core (cron scheduler, long-term memory, agent lifecycle)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level toggle and tuning knobs for the `sa-agentops`/`sa-ltm`
/// integration. Plain fields rather than re-exporting those crates'
/// own config types, so `sa-domain` stays free of a dependency on them;
/// `runtime::agentops` in `sa-gateway` is what actually constructs the
/// engines from these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOpsConfig {
    /// Master switch. When `false`, the gateway boots without the cron
    /// scheduler, long-term memory, or agent process manager.
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    /// Directory long-term memory reads/writes (evergreen file, daily
    /// logs, vector index). Relative paths resolve under `workspace.state_path`.
    #[serde(default = "d_memory_dir")]
    pub memory_dir: PathBuf,
    #[serde(default)]
    pub schedule: AgentOpsScheduleConfig,
    #[serde(default)]
    pub process: AgentOpsProcessConfig,
    #[serde(default)]
    pub memory: AgentOpsMemoryConfig,
}

impl Default for AgentOpsConfig {
    fn default() -> Self {
        Self {
            enabled: d_enabled(),
            memory_dir: d_memory_dir(),
            schedule: AgentOpsScheduleConfig::default(),
            process: AgentOpsProcessConfig::default(),
            memory: AgentOpsMemoryConfig::default(),
        }
    }
}

fn d_enabled() -> bool {
    true
}
fn d_memory_dir() -> PathBuf {
    PathBuf::from("memory")
}

/// The tick interval is fixed at `sa_agentops::TICK_INTERVAL_SECS` (30s),
/// not configurable here — only retention is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOpsScheduleConfig {
    #[serde(default = "d_max_history_entries")]
    pub max_history_entries: usize,
}

impl Default for AgentOpsScheduleConfig {
    fn default() -> Self {
        Self {
            max_history_entries: d_max_history_entries(),
        }
    }
}

fn d_max_history_entries() -> usize {
    1000
}

/// The starting->running propagation delay is fixed at
/// `sa_agentops::PROPAGATION_DELAY_MS` (500ms), not configurable here —
/// only the port range is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOpsProcessConfig {
    #[serde(default = "d_base_port")]
    pub base_port: u16,
}

impl Default for AgentOpsProcessConfig {
    fn default() -> Self {
        Self {
            base_port: d_base_port(),
        }
    }
}

fn d_base_port() -> u16 {
    4100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOpsMemoryConfig {
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "d_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "d_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "d_decay_half_life_days")]
    pub decay_half_life_days: f64,
    #[serde(default = "d_true")]
    pub decay_enabled: bool,
    #[serde(default = "d_top_k")]
    pub top_k: usize,
}

impl Default for AgentOpsMemoryConfig {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            vector_weight: d_vector_weight(),
            keyword_weight: d_keyword_weight(),
            decay_half_life_days: d_decay_half_life_days(),
            decay_enabled: d_true(),
            top_k: d_top_k(),
        }
    }
}

fn d_chunk_size() -> usize {
    1600
}
fn d_chunk_overlap() -> usize {
    320
}
fn d_vector_weight() -> f64 {
    0.7
}
fn d_keyword_weight() -> f64 {
    0.3
}
fn d_decay_half_life_days() -> f64 {
    7.0
}
fn d_true() -> bool {
    true
}
fn d_top_k() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let c = AgentOpsConfig::default();
        assert!(c.enabled);
        assert_eq!(c.memory_dir, PathBuf::from("memory"));
        assert_eq!(c.schedule.max_history_entries, 1000);
        assert_eq!(c.process.base_port, 4100);
        assert_eq!(c.memory.top_k, 10);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let c: AgentOpsConfig = serde_json::from_str("{}").unwrap();
        assert!(c.enabled);
        assert_eq!(c.process.base_port, 4100);
    }

    #[test]
    fn deserialize_partial_override() {
        let c: AgentOpsConfig =
            serde_json::from_str(r#"{"enabled": false, "schedule": {"max_history_entries": 10}}"#)
                .unwrap();
        assert!(!c.enabled);
        assert_eq!(c.schedule.max_history_entries, 10);
    }
}
