//! Wiring for the agent-operations core: the `sa-agentops` cron
//! scheduler and agent process manager, and the `sa-ltm` long-term
//! memory store.
//!
//! Construction is two-phase, the same shape as [`super::agent::AgentManager`]:
//! the scheduler's dispatcher and the process manager's start function both
//! need to call back into a live [`AppState`] (to run a turn, to launch a
//! worker), but `AppState` is also where the built engines live. So
//! `bootstrap::build_app_state` builds the state with `agentops: None`,
//! then calls [`AgentOps::build`] with a clone of that state and assigns
//! the result back before returning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use sa_agentops::{
    discovery, AgentInfo, AgentOpsError, AgentStatusEvent, Dispatcher, EventBroker,
    FileScheduleStore, ProcessManager, Schedule, Scheduler, StartFn,
};
use sa_ltm::{MemoryConfig, MemoryManager};

use crate::state::AppState;

use super::{run_turn, TurnEvent, TurnInput};

/// Everything `bootstrap` wires in for the agent-operations core. `None`
/// on `AppState` when `config.agentops.enabled` is `false`.
pub struct AgentOps {
    pub scheduler: Arc<Scheduler>,
    pub processes: Arc<ProcessManager>,
    pub memory: Arc<MemoryManager>,
    /// Agents discovered under the workspace root at boot. Re-scanned on
    /// demand by admin tooling, not kept live-synced with the filesystem.
    pub agents: Arc<RwLock<HashMap<String, AgentInfo>>>,
}

impl AgentOps {
    /// Discover agents, open long-term memory, and construct the
    /// scheduler and process manager with dispatch/start closures that
    /// close over `state`. Returns `Ok(None)` when disabled.
    pub fn build(state: &AppState) -> anyhow::Result<Option<Self>> {
        let cfg = &state.config.agentops;
        if !cfg.enabled {
            tracing::info!("agent-operations core disabled (agentops.enabled = false)");
            return Ok(None);
        }

        let memory_root = state.config.workspace.state_path.join(&cfg.memory_dir);
        std::fs::create_dir_all(&memory_root)?;
        let memory_config = MemoryConfig {
            chunk_size: cfg.memory.chunk_size,
            chunk_overlap: cfg.memory.chunk_overlap,
            vector_weight: cfg.memory.vector_weight,
            keyword_weight: cfg.memory.keyword_weight,
            decay_half_life_days: cfg.memory.decay_half_life_days,
            decay_enabled: cfg.memory.decay_enabled,
            top_k: cfg.memory.top_k,
        };
        // No embedder wired yet: keyword score and recency carry search
        // until an embedding provider lands behind `sa_ltm::Embedder`.
        let memory = Arc::new(MemoryManager::open(&memory_root, memory_config, None)?);
        tracing::info!(root = %memory_root.display(), "long-term memory ready");

        let discovered = discovery::discover(&state.config.workspace.path)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "agent discovery failed, starting with no agents");
                HashMap::new()
            });
        tracing::info!(agent_count = discovered.len(), "agent discovery complete");
        let agents = Arc::new(RwLock::new(discovered));

        let schedule_dir = state.config.workspace.state_path.join("agentops/schedules");
        let store = Arc::new(FileScheduleStore::open(
            &schedule_dir,
            cfg.schedule.max_history_entries,
        )?);

        let dispatch_state = state.clone();
        let dispatcher: Dispatcher = Arc::new(move |_cancel, schedule: Schedule| {
            let state = dispatch_state.clone();
            Box::pin(dispatch_schedule(state, schedule))
        });

        let scheduler = Arc::new(Scheduler::new(
            store,
            dispatcher,
            sa_agentops::TICK_INTERVAL_SECS,
        ));

        let start_fn: StartFn = Arc::new(move |cancel, directory, port| {
            Box::pin(launch_agent_worker(cancel, directory, port))
        });

        let processes = Arc::new(ProcessManager::new(
            cfg.process.base_port,
            sa_agentops::PROPAGATION_DELAY_MS,
            start_fn,
        ));

        Ok(Some(Self {
            scheduler,
            processes,
            memory,
            agents,
        }))
    }

    /// Load the persisted schedule set and start the tick loop. Call once
    /// the surrounding `AppState` (and thus `dispatch_schedule`'s closure
    /// over it) is fully assembled.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.reload().await?;
        self.scheduler.start();
        tracing::info!("agent-operations scheduler started");
        Ok(())
    }

    /// Stop the scheduler tick loop, tear down any running agent workers,
    /// and flush the long-term memory vector index to disk. Best-effort;
    /// called during graceful shutdown.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.processes.stop_all().await;
        if let Err(e) = self.memory.close().await {
            tracing::warn!(error = %e, "failed to flush long-term memory index during shutdown");
        }
    }

    /// Subscribe to agent status transitions (starting/running/stopped/
    /// errored), e.g. for a dashboard live feed.
    pub fn status_events(&self) -> Arc<EventBroker<AgentStatusEvent>> {
        self.processes.broker()
    }
}

/// Drive one scheduled fire through the ordinary turn machinery: a
/// schedule's `description` becomes the user message, and its own id
/// becomes the session key so every fire of the same schedule continues
/// one running transcript.
async fn dispatch_schedule(state: AppState, schedule: Schedule) -> sa_agentops::Result<()> {
    let session_key = format!("agentops:{}", schedule.id);
    let session_id = format!(
        "agentops-{}-{}",
        schedule.id,
        chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
    );

    let input = TurnInput {
        session_key,
        session_id,
        user_message: schedule.description.clone(),
        model: None,
        response_format: None,
        agent: None,
    };

    let (run_id, mut rx) = run_turn(state, input);
    let mut failure: Option<String> = None;
    while let Some(event) = rx.recv().await {
        if let TurnEvent::Error { message } = event {
            failure = Some(message);
        }
    }

    match failure {
        Some(message) => {
            tracing::warn!(schedule_id = %schedule.id, %run_id, %message, "scheduled turn errored");
            Err(AgentOpsError::Store(message))
        }
        None => Ok(()),
    }
}

/// Launch one agent worker under its `forge.yaml` directory, bound to
/// `port`, and block until it exits or `cancel` fires.
async fn launch_agent_worker(
    cancel: CancellationToken,
    directory: PathBuf,
    port: u16,
) -> sa_agentops::Result<()> {
    let mut cmd = tokio::process::Command::new("forge");
    cmd.arg("run")
        .arg("--port")
        .arg(port.to_string())
        .current_dir(&directory)
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        AgentOpsError::DirectoryMissing(format!("{}: {e}", directory.display()))
    })?;

    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            Ok(())
        }
        result = child.wait() => {
            match result {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(AgentOpsError::Store(format!(
                    "agent worker in {} exited with {status}",
                    directory.display()
                ))),
                Err(e) => Err(AgentOpsError::Io(e)),
            }
        }
    }
}
