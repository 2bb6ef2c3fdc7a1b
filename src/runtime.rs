//! The runtime manager: owns the agents and the control surface.
//!
//! One `Runtime` drives one project from idea to delivery. It spawns
//! the four agent actors, an observer task that forwards events and
//! feeds the audit log, and a stall monitor. Control operations
//! (pause/resume/inject/status/shutdown) are all safe to call from a
//! presentation layer while the agents run.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actor::{AgentActor, AgentEvent};
use crate::config::Config;
use crate::core::agent::{AgentRole, AgentState, AgentStatus, MemoryKind};
use crate::core::artifact::ArtifactLedger;
use crate::core::envelope::{Address, Envelope, Priority};
use crate::core::project::{Phase, Project};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::persistence::{ProjectSnapshot, Store};
use crate::reasoning::Reasoner;
use crate::router::{Router, RouterEvent};
use crate::status::{StatusService, StatusSnapshot};
use crate::{alog, alog_error, alog_warn};

/// Everything the operator can observe about a running project.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Agent(AgentEvent),
    Router(RouterEvent),
    /// An agent stayed blocked past the configured threshold.
    Stalled { role: AgentRole, reason: String },
    Delivered,
}

pub struct Runtime {
    config: Config,
    project: Arc<RwLock<Project>>,
    ledger: Arc<RwLock<ArtifactLedger>>,
    router: Arc<Router>,
    gateway: Arc<Gateway>,
    store: Arc<dyn Store>,
    status: StatusService,
    agent_states: HashMap<AgentRole, Arc<RwLock<AgentState>>>,
    actors: Option<Vec<AgentActor>>,
    pause_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<RuntimeEvent>>,
    agent_events_rx: Option<mpsc::UnboundedReceiver<AgentEvent>>,
    router_events_rx: Option<mpsc::UnboundedReceiver<RouterEvent>>,
    audit_rx: Option<mpsc::UnboundedReceiver<Envelope>>,
}

impl Runtime {
    pub fn new(
        idea: impl Into<String>,
        config: Config,
        reasoner: Arc<dyn Reasoner>,
        store: Arc<dyn Store>,
    ) -> Self {
        let project = Arc::new(RwLock::new(Project::new(idea)));
        let ledger = Arc::new(RwLock::new(ArtifactLedger::new()));
        let (human_tx, human_rx) = mpsc::unbounded_channel();
        let (router_events_tx, router_events_rx) = mpsc::unbounded_channel();
        let (audit_tx, audit_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Router::new(
            project.clone(),
            ledger.clone(),
            human_tx,
            router_events_tx,
            audit_tx,
            config.activity_tail,
        ));
        let gateway = Arc::new(Gateway::new(router.clone(), project.clone(), human_rx));

        let (pause_tx, paused) = watch::channel(false);
        let (agent_events_tx, agent_events_rx) = mpsc::unbounded_channel();
        let mut actors = Vec::with_capacity(AgentRole::ALL.len());
        let mut agent_states = HashMap::new();
        for role in AgentRole::ALL {
            let actor = AgentActor::new(
                role,
                router.clone(),
                reasoner.clone(),
                project.clone(),
                ledger.clone(),
                paused.clone(),
                agent_events_tx.clone(),
                config.retry_limit,
                config.wip_limit,
                // Long enough that a stalled agent is observably stalled
                // before its next retry.
                config.stall_threshold() * 2,
            );
            agent_states.insert(role, actor.state());
            actors.push(actor);
        }

        let status = StatusService::new(project.clone(), router.clone(), agent_states.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            project,
            ledger,
            router,
            gateway,
            store,
            status,
            agent_states,
            actors: Some(actors),
            pause_tx,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
            events_tx,
            events_rx: Some(events_rx),
            agent_events_rx: Some(agent_events_rx),
            router_events_rx: Some(router_events_rx),
            audit_rx: Some(audit_rx),
        }
    }

    /// Spawn the actors and support tasks, then seed the PM's inbox
    /// with the project idea. Idempotent start is not supported; a
    /// second call fails with `Invalid`.
    pub async fn start(&mut self) -> Result<()> {
        let actors = self
            .actors
            .take()
            .ok_or_else(|| Error::Invalid("runtime already started".to_string()))?;

        for actor in actors {
            let cancel = self.cancel.clone();
            self.handles.push(tokio::spawn(actor.run(cancel)));
        }
        self.spawn_observer()?;
        self.spawn_stall_monitor();

        let idea = self.project.read().await.idea_text.clone();
        let kickoff = Envelope::request(Address::Human, Address::Agent(AgentRole::Pm), idea)
            .with_priority(Priority::High);
        self.router.deliver(kickoff).await?;

        alog!("Runtime started");
        Ok(())
    }

    /// Forwards agent and router events to the operator channel, writes
    /// the audit log, and snapshots state on delivery.
    fn spawn_observer(&mut self) -> Result<()> {
        let mut agent_rx = self
            .agent_events_rx
            .take()
            .ok_or_else(|| Error::Invalid("observer already running".to_string()))?;
        let mut router_rx = self
            .router_events_rx
            .take()
            .ok_or_else(|| Error::Invalid("observer already running".to_string()))?;
        let mut audit_rx = self
            .audit_rx
            .take()
            .ok_or_else(|| Error::Invalid("observer already running".to_string()))?;

        let events_tx = self.events_tx.clone();
        let store = self.store.clone();
        let project = self.project.clone();
        let ledger = self.ledger.clone();
        let agent_states = self.agent_states.clone();
        let cancel = self.cancel.clone();

        self.handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = agent_rx.recv() => {
                        let Some(event) = event else { break };
                        let _ = events_tx.send(RuntimeEvent::Agent(event));
                    }
                    event = router_rx.recv() => {
                        let Some(event) = event else { break };
                        if event == RouterEvent::Delivered {
                            let snapshot =
                                build_snapshot(&project, &ledger, &agent_states).await;
                            if let Err(e) = store.save_state(snapshot).await {
                                alog_error!("Failed to persist delivered project: {}", e);
                            }
                            let _ = events_tx.send(RuntimeEvent::Delivered);
                        }
                        let _ = events_tx.send(RuntimeEvent::Router(event));
                    }
                    envelope = audit_rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        let project_id = project.read().await.id;
                        if let Err(e) = store.append_log(project_id, envelope).await {
                            alog_warn!("Audit log append failed: {}", e);
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    /// Periodically checks for agents blocked past the stall threshold.
    fn spawn_stall_monitor(&mut self) {
        let threshold = self.config.stall_threshold();
        let agent_states = self.agent_states.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();
        // Check a few times per threshold so detection is not late by a
        // whole period.
        let tick = threshold.checked_div(4).unwrap_or(threshold);

        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick.max(std::time::Duration::from_millis(10)));
            let mut reported: Vec<AgentRole> = Vec::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                for (role, state) in &agent_states {
                    let state = state.read().await;
                    let stalled = state.status == AgentStatus::Blocked
                        && chrono::Utc::now()
                            .signed_duration_since(state.last_progress)
                            .to_std()
                            .map(|d| d >= threshold)
                            .unwrap_or(false);
                    if stalled && !reported.contains(role) {
                        let reason = state
                            .current_work
                            .clone()
                            .unwrap_or_else(|| "no progress".to_string());
                        alog_error!(
                            "{}",
                            Error::Stalled {
                                role: *role,
                                reason: reason.clone(),
                            }
                        );
                        reported.push(*role);
                        let _ = events_tx.send(RuntimeEvent::Stalled {
                            role: *role,
                            reason,
                        });
                    } else if !stalled {
                        reported.retain(|r| r != role);
                    }
                }
            }
        }));
    }

    /// Cooperative pause: each agent finishes its current envelope and
    /// then stops dequeuing until `resume`.
    pub fn pause(&self) {
        alog!("Runtime paused");
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        alog!("Runtime resumed");
        let _ = self.pause_tx.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    /// Broadcast operator guidance to every agent at top priority and
    /// record it in their memories.
    pub async fn inject(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        for state in self.agent_states.values() {
            state
                .write()
                .await
                .memory
                .record(MemoryKind::Guidance, text.clone());
        }
        let guidance = Envelope::request(Address::Human, Address::Broadcast, text)
            .with_priority(Priority::Critical);
        self.router.deliver(guidance).await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.status.snapshot().await
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    pub async fn phase(&self) -> Phase {
        self.project.read().await.phase()
    }

    /// The operator event stream. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RuntimeEvent>> {
        self.events_rx.take()
    }

    /// Stop the runtime: cancel the actors, wait out the grace period,
    /// then force-stop whatever is left and mark it blocked for audit.
    /// A final snapshot is persisted either way.
    pub async fn shutdown(&mut self) -> Result<()> {
        alog!("Runtime shutting down");
        self.cancel.cancel();

        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let grace = self.config.shutdown_grace();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(grace, drain).await.is_err() {
            alog_warn!("Shutdown grace expired, force-stopping");
            for abort in aborts {
                abort.abort();
            }
            for state in self.agent_states.values() {
                let mut state = state.write().await;
                if state.status == AgentStatus::Working {
                    state.mark_blocked("cancelled at shutdown");
                }
            }
        }

        let snapshot = build_snapshot(&self.project, &self.ledger, &self.agent_states).await;
        self.store.save_state(snapshot).await?;
        alog!("Runtime stopped");
        Ok(())
    }
}

async fn build_snapshot(
    project: &Arc<RwLock<Project>>,
    ledger: &Arc<RwLock<ArtifactLedger>>,
    agent_states: &HashMap<AgentRole, Arc<RwLock<AgentState>>>,
) -> ProjectSnapshot {
    let project = project.read().await.clone();
    let ledger = ledger.read().await.clone();
    let mut memories = HashMap::new();
    for (role, state) in agent_states {
        memories.insert(*role, state.read().await.memory.clone());
    }
    ProjectSnapshot {
        project,
        memories,
        ledger,
        envelope_log: Vec::new(),
    }
}
