use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::broker::EventBroker;
use crate::error::{AgentOpsError, Result};
use crate::model::AgentInfo;
use crate::model::AgentStatus;
use crate::trace::TraceEvent;

/// Launches an agent worker and blocks until it exits. Must honor
/// cancellation of the given token — that is the only way the process
/// manager can interrupt an in-flight launch.
pub type StartFn = Arc<
    dyn Fn(CancellationToken, PathBuf, u16) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// The starting->running promotion delay. Fixed, not a tuning knob —
/// `ProcessManager::new` still takes a delay parameter so tests can shrink
/// it, but production callers pass this constant.
pub const PROPAGATION_DELAY_MS: u64 = 500;

/// Broadcast on every agent status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusEvent {
    pub agent_id: String,
    pub status: AgentStatus,
    pub port: u16,
    pub error: Option<String>,
}

struct ManagedAgent {
    cancel: CancellationToken,
    port: u16,
}

struct ProcessManagerInner {
    managed: HashMap<String, ManagedAgent>,
    status: HashMap<String, AgentInfo>,
    next_port: u16,
    released_ports: BTreeSet<u16>,
}

impl ProcessManagerInner {
    fn allocate(&mut self) -> u16 {
        if let Some(port) = self.released_ports.iter().next().copied() {
            self.released_ports.remove(&port);
            return port;
        }
        let port = self.next_port;
        self.next_port += 1;
        port
    }

    fn release(&mut self, port: u16) {
        self.released_ports.insert(port);
    }
}

/// Starts, tracks, and stops agent subprocesses, allocating each a unique
/// port from a base range. A single mutex guards the managed-agent map,
/// the status-info map, and the port allocator together — starting and
/// stopping are infrequent, and splitting the three would only invite a
/// port leaked out of sync with its agent's lifecycle (§4.10/§5).
pub struct ProcessManager {
    inner: Arc<Mutex<ProcessManagerInner>>,
    start_fn: StartFn,
    broker: Arc<EventBroker<AgentStatusEvent>>,
    propagation_delay_ms: u64,
}

impl ProcessManager {
    pub fn new(base_port: u16, propagation_delay_ms: u64, start_fn: StartFn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProcessManagerInner {
                managed: HashMap::new(),
                status: HashMap::new(),
                next_port: base_port,
                released_ports: BTreeSet::new(),
            })),
            start_fn,
            broker: Arc::new(EventBroker::new()),
            propagation_delay_ms,
        }
    }

    pub fn broker(&self) -> Arc<EventBroker<AgentStatusEvent>> {
        Arc::clone(&self.broker)
    }

    /// Start an agent by id. Errors if it already has a managed record
    /// (starting, running, or stopping). Allocates a port, stores a
    /// managed record, marks the agent `starting`, then in a background
    /// task: after a fixed propagation delay promotes it to `running` (if
    /// still starting), then calls the start function, which blocks for
    /// the worker's entire lifetime.
    pub async fn start(&self, info: &AgentInfo) -> Result<u16> {
        let agent_id = info.id.clone();
        let directory = info.directory.clone();

        let port = {
            let mut inner = self.inner.lock();
            if inner.managed.contains_key(&agent_id) {
                return Err(AgentOpsError::AlreadyRunning(agent_id));
            }
            let port = inner.allocate();
            let cancel = CancellationToken::new();
            inner.managed.insert(agent_id.clone(), ManagedAgent { cancel, port });

            let mut status = info.clone();
            status.status = AgentStatus::Starting;
            status.port = port;
            status.error = None;
            status.started_at = Some(Utc::now());
            inner.status.insert(agent_id.clone(), status);
            port
        };

        self.broker.broadcast(AgentStatusEvent {
            agent_id: agent_id.clone(),
            status: AgentStatus::Starting,
            port,
            error: None,
        });

        let inner = Arc::clone(&self.inner);
        let broker = Arc::clone(&self.broker);
        let start_fn = Arc::clone(&self.start_fn);
        let delay_ms = self.propagation_delay_ms;
        let cancel = self.inner.lock().managed.get(&agent_id).unwrap().cancel.clone();

        tokio::spawn(async move {
            run_agent(inner, broker, start_fn, agent_id, directory, port, delay_ms, cancel).await;
        });

        Ok(port)
    }

    /// Stop a running (or starting) agent. Sets `stopping` immediately and
    /// cancels its token; the background task observes cancellation once
    /// the start function returns and finalizes to `stopped`.
    pub async fn stop(&self, agent_id: &str) -> Result<()> {
        let cancel = {
            let mut inner = self.inner.lock();
            let managed = inner
                .managed
                .get(agent_id)
                .ok_or_else(|| AgentOpsError::NotRunning(agent_id.to_string()))?;
            let cancel = managed.cancel.clone();
            let port = managed.port;
            if let Some(status) = inner.status.get_mut(agent_id) {
                status.status = AgentStatus::Stopping;
            }
            drop(inner);
            let _ = port;
            cancel
        };

        self.broker.broadcast(AgentStatusEvent {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Stopping,
            port: self.port(agent_id).unwrap_or(0),
            error: None,
        });

        cancel.cancel();
        Ok(())
    }

    fn port(&self, agent_id: &str) -> Option<u16> {
        self.inner.lock().managed.get(agent_id).map(|m| m.port)
    }

    /// Cancel every currently-managed agent's token. Each background task
    /// finalizes its own agent to `stopped` once its start function
    /// returns.
    pub async fn stop_all(&self) {
        let tokens: Vec<CancellationToken> = {
            let inner = self.inner.lock();
            inner.managed.values().map(|m| m.cancel.clone()).collect()
        };
        for cancel in tokens {
            cancel.cancel();
        }
    }

    pub fn status(&self, agent_id: &str) -> Option<AgentInfo> {
        self.inner.lock().status.get(agent_id).cloned()
    }

    /// Overwrite the discovered entries' status/port/error/startedAt from
    /// the live status map, in place.
    pub fn merge_state(&self, discovered: &mut HashMap<String, AgentInfo>) {
        let inner = self.inner.lock();
        for (id, info) in discovered.iter_mut() {
            if let Some(live) = inner.status.get(id) {
                info.status = live.status;
                info.port = live.port;
                info.error = live.error.clone();
                info.started_at = live.started_at;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_agent(
    inner: Arc<Mutex<ProcessManagerInner>>,
    broker: Arc<EventBroker<AgentStatusEvent>>,
    start_fn: StartFn,
    agent_id: String,
    directory: PathBuf,
    port: u16,
    delay_ms: u64,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
        _ = cancel.cancelled() => {}
    }

    let promoted = {
        let mut guard = inner.lock();
        let still_starting = guard
            .status
            .get(&agent_id)
            .is_some_and(|a| a.status == AgentStatus::Starting);
        if still_starting {
            if let Some(status) = guard.status.get_mut(&agent_id) {
                status.status = AgentStatus::Running;
                status.started_at = Some(Utc::now());
            }
        }
        still_starting
    };

    if promoted {
        TraceEvent::AgentStarted { agent_id: agent_id.clone(), port }.emit();
        broker.broadcast(AgentStatusEvent {
            agent_id: agent_id.clone(),
            status: AgentStatus::Running,
            port,
            error: None,
        });
    }

    // Blocks for the worker's entire lifetime; the start function is
    // responsible for honoring `cancel`.
    let result = start_fn(cancel.clone(), directory, port).await;

    let (final_status, error) = {
        let mut guard = inner.lock();
        guard.managed.remove(&agent_id);
        guard.release(port);
        match &result {
            Err(e) if !cancel.is_cancelled() => {
                if let Some(status) = guard.status.get_mut(&agent_id) {
                    status.status = AgentStatus::Errored;
                    status.error = Some(e.to_string());
                    status.port = 0;
                    status.started_at = None;
                }
                (AgentStatus::Errored, Some(e.to_string()))
            }
            _ => {
                if let Some(status) = guard.status.get_mut(&agent_id) {
                    status.status = AgentStatus::Stopped;
                    status.error = None;
                    status.port = 0;
                    status.started_at = None;
                }
                (AgentStatus::Stopped, None)
            }
        }
    };

    if final_status == AgentStatus::Errored {
        TraceEvent::AgentErrored {
            agent_id: agent_id.clone(),
            error: error.clone().unwrap_or_default(),
        }
        .emit();
    } else {
        TraceEvent::AgentStopped { agent_id: agent_id.clone() }.emit();
    }
    broker.broadcast(AgentStatusEvent {
        agent_id,
        status: final_status,
        port: 0,
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info(id: &str) -> AgentInfo {
        AgentInfo {
            id: id.to_string(),
            version: "1.0".to_string(),
            framework: "solo".to_string(),
            model: "anthropic/claude".to_string(),
            tools: vec![],
            channels: vec![],
            skill_count: 0,
            directory: PathBuf::from("/tmp/agent"),
            status: AgentStatus::Stopped,
            port: 0,
            error: None,
            started_at: None,
            needs_passphrase: false,
        }
    }

    fn blocks_until_cancelled() -> StartFn {
        Arc::new(|cancel, _dir, _port| {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(())
            })
        })
    }

    fn completes_immediately() -> StartFn {
        Arc::new(|_cancel, _dir, _port| Box::pin(async { Ok(()) }))
    }

    fn fails_immediately() -> StartFn {
        Arc::new(|_cancel, _dir, _port| {
            Box::pin(async { Err(AgentOpsError::Store("boom".to_string())) })
        })
    }

    #[tokio::test]
    async fn p8_ports_allocated_are_unique_across_agents() {
        let manager = ProcessManager::new(4100, 1, blocks_until_cancelled());
        let port_a = manager.start(&test_info("a")).await.unwrap();
        let port_b = manager.start(&test_info("b")).await.unwrap();
        assert_ne!(port_a, port_b);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn released_port_is_reused() {
        let manager = ProcessManager::new(4100, 1, blocks_until_cancelled());
        let port_a = manager.start(&test_info("a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        manager.stop("a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let port_b = manager.start(&test_info("b")).await.unwrap();
        assert_eq!(port_a, port_b);
    }

    #[tokio::test]
    async fn s8_status_transitions_stopped_starting_running_then_stopping_stopped() {
        let manager = ProcessManager::new(4100, 10, blocks_until_cancelled());
        manager.start(&test_info("a")).await.unwrap();
        assert_eq!(manager.status("a").unwrap().status, AgentStatus::Starting);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(manager.status("a").unwrap().status, AgentStatus::Running);

        manager.stop("a").await.unwrap();
        assert_eq!(manager.status("a").unwrap().status, AgentStatus::Stopping);

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(manager.status("a").unwrap().status, AgentStatus::Stopped);
        assert_eq!(manager.status("a").unwrap().port, 0);
    }

    #[tokio::test]
    async fn worker_exiting_with_error_before_promotion_skips_running_and_goes_straight_to_errored() {
        let manager = ProcessManager::new(4100, 10_000, fails_immediately());
        manager.start(&test_info("a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let status = manager.status("a").unwrap();
        assert_eq!(status.status, AgentStatus::Errored);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn worker_exiting_cleanly_without_external_stop_finalizes_to_stopped() {
        let manager = ProcessManager::new(4100, 10, completes_immediately());
        manager.start(&test_info("a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(manager.status("a").unwrap().status, AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn starting_an_already_managed_agent_errors() {
        let manager = ProcessManager::new(4100, 10, blocks_until_cancelled());
        manager.start(&test_info("a")).await.unwrap();
        let result = manager.start(&test_info("a")).await;
        assert!(matches!(result, Err(AgentOpsError::AlreadyRunning(_))));
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn stopping_unmanaged_agent_errors() {
        let manager = ProcessManager::new(4100, 10, blocks_until_cancelled());
        let result = manager.stop("ghost").await;
        assert!(matches!(result, Err(AgentOpsError::NotRunning(_))));
    }

    #[tokio::test]
    async fn broker_receives_status_transition_events() {
        let manager = ProcessManager::new(4100, 10, blocks_until_cancelled());
        let (_id, mut rx) = manager.broker().subscribe();
        manager.start(&test_info("a")).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, AgentStatus::Starting);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, AgentStatus::Running);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn stop_all_cancels_every_managed_agent() {
        let manager = ProcessManager::new(4100, 1, blocks_until_cancelled());
        manager.start(&test_info("a")).await.unwrap();
        manager.start(&test_info("b")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        manager.stop_all().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(manager.status("a").unwrap().status, AgentStatus::Stopped);
        assert_eq!(manager.status("b").unwrap().status, AgentStatus::Stopped);
    }

    #[test]
    fn merge_state_overwrites_live_fields_in_place() {
        let manager = ProcessManager::new(4100, 10, blocks_until_cancelled());
        {
            let mut inner = manager.inner.lock();
            let mut live = test_info("a");
            live.status = AgentStatus::Running;
            live.port = 4101;
            inner.status.insert("a".to_string(), live);
        }

        let mut discovered = HashMap::new();
        discovered.insert("a".to_string(), test_info("a"));
        manager.merge_state(&mut discovered);

        assert_eq!(discovered.get("a").unwrap().status, AgentStatus::Running);
        assert_eq!(discovered.get("a").unwrap().port, 4101);
    }
}
