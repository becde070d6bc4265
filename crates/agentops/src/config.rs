use serde::{Deserialize, Serialize};

/// The scheduler's tick interval is fixed, not tunable — see
/// [`crate::scheduler::TICK_INTERVAL_SECS`]. This config only covers how
/// much run history the file-backed store retains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "d_max_history_entries")]
    pub max_history_entries: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_history_entries: d_max_history_entries(),
        }
    }
}

fn d_max_history_entries() -> usize {
    1000
}

/// Tuning knobs for the process manager: the port range it allocates from.
/// The starting->running propagation delay is fixed, not tunable — see
/// [`crate::process::PROPAGATION_DELAY_MS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessManagerConfig {
    #[serde(default = "d_base_port")]
    pub base_port: u16,
}

impl Default for ProcessManagerConfig {
    fn default() -> Self {
        Self {
            base_port: d_base_port(),
        }
    }
}

fn d_base_port() -> u16 {
    4100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_config_defaults() {
        let c = ScheduleConfig::default();
        assert_eq!(c.max_history_entries, 1000);
    }

    #[test]
    fn process_manager_config_defaults() {
        let c = ProcessManagerConfig::default();
        assert_eq!(c.base_port, 4100);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let c: ScheduleConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c.max_history_entries, 1000);
        let c: ProcessManagerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c.base_port, 4100);
    }
}
