use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AgentOpsError, Result};
use crate::model::{HistoryEntry, Schedule, ScheduleSource};

/// Abstract persistence capability the scheduler consumes. Async because
/// the file-backed implementation shipped here does file I/O under the
/// lock; the scheduler depends only on this trait, never on a concrete
/// store.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Schedule>>;
    async fn get(&self, id: &str) -> Result<Option<Schedule>>;
    async fn set(&self, schedule: Schedule) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn record_run(&self, entry: HistoryEntry) -> Result<()>;
    async fn history(&self, schedule_id: Option<&str>, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// Upsert a schedule on behalf of an LLM-originated mutation path. Refuses
/// to touch a schedule whose existing (or incoming) `source` is `yaml` —
/// those are owned by the external config-loader, never by this path. A
/// brand-new id with `source: Llm` is always accepted.
pub async fn set_llm_originated(store: &dyn ScheduleStore, schedule: Schedule) -> Result<()> {
    if schedule.source == ScheduleSource::Yaml {
        return Err(AgentOpsError::ReadOnlySchedule(schedule.id));
    }
    if let Some(existing) = store.get(&schedule.id).await? {
        if existing.source == ScheduleSource::Yaml {
            return Err(AgentOpsError::ReadOnlySchedule(schedule.id));
        }
    }
    store.set(schedule).await
}

/// Refuse to delete a `yaml`-sourced schedule from an LLM-originated path.
pub async fn delete_llm_originated(store: &dyn ScheduleStore, id: &str) -> Result<bool> {
    if let Some(existing) = store.get(id).await? {
        if existing.source == ScheduleSource::Yaml {
            return Err(AgentOpsError::ReadOnlySchedule(id.to_string()));
        }
    }
    store.delete(id).await
}

/// File-backed `ScheduleStore`: schedules and history persist to separate
/// JSON files, kept apart because history is an independent append-only
/// log rather than a field on the schedule record.
pub struct FileScheduleStore {
    schedules: RwLock<HashMap<String, Schedule>>,
    history: RwLock<Vec<HistoryEntry>>,
    schedules_path: PathBuf,
    history_path: PathBuf,
    max_history_entries: usize,
}

impl FileScheduleStore {
    pub fn open(dir: &Path, max_history_entries: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let schedules_path = dir.join("schedules.json");
        let history_path = dir.join("history.json");

        let schedules = load_schedules(&schedules_path);
        let history = load_history(&history_path);

        Ok(Self {
            schedules: RwLock::new(schedules),
            history: RwLock::new(history),
            schedules_path,
            history_path,
            max_history_entries,
        })
    }

    async fn persist_schedules(&self) {
        let values: Vec<Schedule> = self.schedules.read().await.values().cloned().collect();
        let path = self.schedules_path.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(json) = serde_json::to_string_pretty(&values) {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist schedules");
                }
            }
        })
        .await;
    }

    async fn persist_history(&self) {
        let values = self.history.read().await.clone();
        let path = self.history_path.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(json) = serde_json::to_string_pretty(&values) {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist schedule history");
                }
            }
        })
        .await;
    }
}

fn load_schedules(path: &Path) -> HashMap<String, Schedule> {
    if let Ok(data) = std::fs::read_to_string(path) {
        if let Ok(schedules) = serde_json::from_str::<Vec<Schedule>>(&data) {
            return schedules.into_iter().map(|s| (s.id.clone(), s)).collect();
        }
        tracing::warn!(path = %path.display(), "schedule store file corrupt, starting empty");
    }
    HashMap::new()
}

fn load_history(path: &Path) -> Vec<HistoryEntry> {
    if let Ok(data) = std::fs::read_to_string(path) {
        if let Ok(history) = serde_json::from_str::<Vec<HistoryEntry>>(&data) {
            return history;
        }
        tracing::warn!(path = %path.display(), "schedule history file corrupt, starting empty");
    }
    Vec::new()
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn list(&self) -> Result<Vec<Schedule>> {
        Ok(self.schedules.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Schedule>> {
        Ok(self.schedules.read().await.get(id).cloned())
    }

    async fn set(&self, schedule: Schedule) -> Result<()> {
        self.schedules.write().await.insert(schedule.id.clone(), schedule);
        self.persist_schedules().await;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.schedules.write().await.remove(id).is_some();
        if removed {
            self.persist_schedules().await;
        }
        Ok(removed)
    }

    async fn record_run(&self, entry: HistoryEntry) -> Result<()> {
        let mut guard = self.history.write().await;
        guard.push(entry);
        if self.max_history_entries > 0 && guard.len() > self.max_history_entries {
            let excess = guard.len() - self.max_history_entries;
            guard.drain(0..excess);
        }
        drop(guard);
        self.persist_history().await;
        Ok(())
    }

    async fn history(&self, schedule_id: Option<&str>, limit: usize) -> Result<Vec<HistoryEntry>> {
        let guard = self.history.read().await;
        let filtered: Vec<HistoryEntry> = match schedule_id {
            Some(id) => guard.iter().filter(|e| e.schedule_id == id).cloned().collect(),
            None => guard.clone(),
        };
        if limit == 0 || filtered.len() <= limit {
            Ok(filtered)
        } else {
            Ok(filtered[filtered.len() - limit..].to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_schedule(id: &str) -> Schedule {
        Schedule {
            id: id.to_string(),
            cron: "* * * * *".to_string(),
            description: "test".to_string(),
            skill: None,
            channel: None,
            channel_target: None,
            source: crate::model::ScheduleSource::Llm,
            enabled: true,
            created: Utc::now(),
            last_run: None,
            last_status: None,
            run_count: 0,
        }
    }

    fn test_entry(schedule_id: &str, status: crate::model::RunStatus) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            schedule_id: schedule_id.to_string(),
            status,
            duration: "0.1s".to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            error: None,
        }
    }

    #[tokio::test]
    async fn set_get_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::open(dir.path(), 100).unwrap();

        store.set(test_schedule("a")).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn reopen_reloads_persisted_schedules() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileScheduleStore::open(dir.path(), 100).unwrap();
            store.set(test_schedule("a")).await.unwrap();
        }
        let reopened = FileScheduleStore::open(dir.path(), 100).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schedules.json"), "not json").unwrap();
        std::fs::write(dir.path().join("history.json"), "not json").unwrap();
        let store = FileScheduleStore::open(dir.path(), 100).unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.history(None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_filters_by_schedule_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::open(dir.path(), 100).unwrap();
        store.record_run(test_entry("a", crate::model::RunStatus::Completed)).await.unwrap();
        store.record_run(test_entry("b", crate::model::RunStatus::Completed)).await.unwrap();
        store.record_run(test_entry("a", crate::model::RunStatus::Error)).await.unwrap();

        let all_a = store.history(Some("a"), 0).await.unwrap();
        assert_eq!(all_a.len(), 2);
        assert!(all_a.iter().all(|e| e.schedule_id == "a"));
    }

    #[tokio::test]
    async fn history_limit_returns_tail_in_chronological_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::open(dir.path(), 100).unwrap();
        for i in 0..5 {
            let mut entry = test_entry("a", crate::model::RunStatus::Completed);
            entry.correlation_id = i.to_string();
            store.record_run(entry).await.unwrap();
        }
        let last_two = store.history(Some("a"), 2).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].correlation_id, "3");
        assert_eq!(last_two[1].correlation_id, "4");
    }

    #[tokio::test]
    async fn llm_path_rejects_mutating_a_yaml_sourced_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::open(dir.path(), 100).unwrap();
        let mut yaml_sched = test_schedule("a");
        yaml_sched.source = crate::model::ScheduleSource::Yaml;
        store.set(yaml_sched).await.unwrap();

        let mut mutation = test_schedule("a");
        mutation.description = "changed by llm".to_string();
        let result = set_llm_originated(&store, mutation).await;
        assert!(matches!(result, Err(AgentOpsError::ReadOnlySchedule(id)) if id == "a"));

        let delete_result = delete_llm_originated(&store, "a").await;
        assert!(matches!(delete_result, Err(AgentOpsError::ReadOnlySchedule(id)) if id == "a"));

        // untouched
        assert_eq!(store.get("a").await.unwrap().unwrap().description, "test");
    }

    #[tokio::test]
    async fn llm_path_accepts_llm_sourced_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::open(dir.path(), 100).unwrap();
        set_llm_originated(&store, test_schedule("a")).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        assert!(delete_llm_originated(&store, "a").await.unwrap());
    }

    #[tokio::test]
    async fn history_retention_trims_oldest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileScheduleStore::open(dir.path(), 3).unwrap();
        for i in 0..5 {
            let mut entry = test_entry("a", crate::model::RunStatus::Completed);
            entry.correlation_id = i.to_string();
            store.record_run(entry).await.unwrap();
        }
        let all = store.history(None, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].correlation_id, "2");
    }
}
