use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use sa_cron::{parse as parse_cron, ParsedSchedule};

use crate::error::{AgentOpsError, Result};
use crate::model::{HistoryEntry, RunStatus, Schedule};
use crate::store::ScheduleStore;
use crate::trace::TraceEvent;

/// Runs the action associated with a fired schedule. Takes a child of the
/// scheduler's root cancellation token (propagated so a long-running
/// dispatch can observe shutdown) and a copy of the due schedule. Errors
/// are non-fatal to the scheduler: they mark this one run `error` and are
/// logged, never abort the tick loop.
pub type Dispatcher = Arc<
    dyn Fn(CancellationToken, Schedule) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Optional sink for a flattened view of scheduler activity, independent of
/// the structured `TraceEvent` log — e.g. an audit trail a caller wants in
/// its own format.
pub type AuditEmitter = Arc<dyn Fn(&str, &str, HashMap<String, String>) + Send + Sync>;

/// The tick loop's interval. Fixed, not a tuning knob — `Scheduler::new`
/// still takes an interval parameter so tests can drive fast ticks, but
/// production callers pass this constant.
pub const TICK_INTERVAL_SECS: u64 = 30;

/// Parsed-cron cache plus the overlap guard; both live under the single
/// mutex spec §4.7/§5 requires so a dispatched task can drop it before
/// calling the dispatcher and reacquire only to clear `running`.
struct SchedulerState {
    parsed: HashMap<String, ParsedSchedule>,
    running: HashSet<String>,
}

/// Polls a `ScheduleStore` on a fixed interval, evaluating each enabled
/// schedule's cron expression against its own reference time (`lastRun` if
/// set, else `created`) and dispatching any that are due. A schedule
/// already running when its next tick comes due is skipped, never queued
/// or run concurrently with itself.
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    dispatcher: Dispatcher,
    audit: Option<AuditEmitter>,
    state: Arc<Mutex<SchedulerState>>,
    cancel: CancellationToken,
    tick_interval_secs: u64,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, dispatcher: Dispatcher, tick_interval_secs: u64) -> Self {
        Self {
            store,
            dispatcher,
            audit: None,
            state: Arc::new(Mutex::new(SchedulerState {
                parsed: HashMap::new(),
                running: HashSet::new(),
            })),
            cancel: CancellationToken::new(),
            tick_interval_secs,
            task: Mutex::new(None),
        }
    }

    pub fn with_audit_emitter(mut self, audit: AuditEmitter) -> Self {
        self.audit = Some(audit);
        self
    }

    fn emit_audit(&self, event: &str, schedule_id: &str, fields: HashMap<String, String>) {
        if let Some(audit) = &self.audit {
            audit(event, schedule_id, fields);
        }
    }

    /// Reload the parsed-cron cache from the store, rebuilt from enabled
    /// schedules only. Invalid cron expressions are logged and the
    /// schedule is left out of the cache (it simply never fires); a
    /// per-schedule parse failure never fails the whole reload.
    pub async fn reload(&self) -> Result<()> {
        let schedules = self.store.list().await?;
        let mut parsed = HashMap::new();
        for schedule in schedules {
            if !schedule.enabled {
                continue;
            }
            match parse_cron(&schedule.cron) {
                Ok(p) => {
                    parsed.insert(schedule.id.clone(), p);
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, cron = %schedule.cron, error = %e, "invalid cron expression, schedule will never fire");
                }
            }
        }
        self.state.lock().parsed = parsed;
        Ok(())
    }

    /// Start the background tick loop. Idempotent: calling `start` on an
    /// already-running scheduler is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            this.reload().await.ok();
            let interval = std::time::Duration::from_secs(this.tick_interval_secs.max(1));
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        this.tick(Utc::now()).await;
                    }
                }
            }
        }));
    }

    /// Signal the tick loop to stop and wait for any currently-running tick
    /// iteration to return. Does not wait for in-flight dispatches, which
    /// run as independent detached tasks.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Evaluate every schedule against `now` and dispatch the ones that are
    /// due. Exposed directly (not just via `start`'s loop) so tests can
    /// drive deterministic ticks. Reference time per schedule is `lastRun`
    /// if set, else `created` — never a scheduler-global "last tick".
    pub async fn tick(&self, now: DateTime<Utc>) {
        let schedules = match self.store.list().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list schedules for tick");
                return;
            }
        };

        let mut due: Vec<Schedule> = Vec::new();
        {
            let mut state = self.state.lock();
            for schedule in schedules {
                if !schedule.enabled {
                    continue;
                }
                let parsed = match state.parsed.get(&schedule.id).copied() {
                    Some(p) => p,
                    None => match parse_cron(&schedule.cron) {
                        Ok(p) => {
                            state.parsed.insert(schedule.id.clone(), p);
                            p
                        }
                        Err(e) => {
                            tracing::warn!(schedule_id = %schedule.id, error = %e, "invalid cron, skipping");
                            continue;
                        }
                    },
                };
                let reference = schedule.last_run.unwrap_or(schedule.created);
                match parsed.next(reference) {
                    Some(next) if next <= now => due.push(schedule),
                    _ => {}
                }
            }
        }

        for schedule in due {
            let id = schedule.id.clone();
            let already_running = {
                let mut state = self.state.lock();
                if state.running.contains(&id) {
                    true
                } else {
                    state.running.insert(id.clone());
                    false
                }
            };

            if already_running {
                self.record_skip(&id, now).await;
                continue;
            }

            self.dispatch_schedule(schedule, now).await;
        }
    }

    async fn record_skip(&self, id: &str, now: DateTime<Utc>) {
        let entry = HistoryEntry {
            timestamp: now,
            schedule_id: id.to_string(),
            status: RunStatus::Skipped,
            duration: "0.0s".to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            error: None,
        };
        if let Err(e) = self.store.record_run(entry).await {
            tracing::warn!(schedule_id = %id, error = %e, "failed to record skipped run");
        }
        TraceEvent::ScheduleSkipped {
            schedule_id: id.to_string(),
            reason: "overlap".to_string(),
        }
        .emit();
        let mut fields = HashMap::new();
        fields.insert("reason".to_string(), "overlap".to_string());
        self.emit_audit("schedule_skip", id, fields);
    }

    async fn dispatch_schedule(&self, schedule: Schedule, now: DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let state = Arc::clone(&self.state);
        let audit = self.audit.clone();
        let cancel = self.cancel.child_token();
        let id = schedule.id.clone();

        TraceEvent::ScheduleFired { schedule_id: id.clone() }.emit();
        if let Some(audit) = &audit {
            audit("schedule_fire", &id, HashMap::new());
        }

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = dispatcher(cancel, schedule.clone()).await;
            let elapsed = started.elapsed();
            let duration = format!("{:.1}s", elapsed.as_secs_f64());

            let (status, error) = match &result {
                Ok(()) => (RunStatus::Completed, None),
                Err(e) => {
                    tracing::warn!(schedule_id = %id, error = %e, "dispatch failed");
                    (RunStatus::Error, Some(e.to_string()))
                }
            };

            if let Some(audit) = &audit {
                let mut fields = HashMap::new();
                fields.insert("status".to_string(), status.as_str().to_string());
                fields.insert("duration".to_string(), duration.clone());
                audit("schedule_complete", &id, fields);
            }

            let mut updated = schedule;
            updated.last_run = Some(now);
            updated.last_status = Some(status);
            updated.run_count += 1;
            if let Err(e) = store.set(updated).await {
                tracing::warn!(schedule_id = %id, error = %e, "failed to update schedule after run");
            }

            let entry = HistoryEntry {
                timestamp: now,
                schedule_id: id.clone(),
                status,
                duration,
                correlation_id: uuid::Uuid::new_v4().to_string(),
                error,
            };
            if let Err(e) = store.record_run(entry).await {
                tracing::warn!(schedule_id = %id, error = %e, "failed to record schedule run");
            }

            TraceEvent::ScheduleCompleted {
                schedule_id: id.clone(),
                status: status.as_str().to_string(),
                duration_ms: elapsed.as_millis() as u64,
            }
            .emit();

            state.lock().running.remove(&id);
        });
    }

    /// Fire a schedule immediately, bypassing the tick's due check. Still
    /// honors the overlap guard.
    pub async fn fire_now(&self, id: &str) -> Result<()> {
        let schedule = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AgentOpsError::ScheduleNotFound(id.to_string()))?;
        let already_running = {
            let mut state = self.state.lock();
            if state.running.contains(id) {
                true
            } else {
                state.running.insert(id.to_string());
                false
            }
        };
        if already_running {
            return Err(AgentOpsError::AlreadyRunning(id.to_string()));
        }
        self.dispatch_schedule(schedule, Utc::now()).await;
        Ok(())
    }
}
