//! The agent actor: one tokio task per role.
//!
//! Each actor owns its role's mutable state exclusively. The run loop
//! honors the shared pause flag cooperatively (the current item always
//! finishes), pulls from the priority inbox, calls the reasoner with
//! bounded retries, and applies the judgment. All effects on the rest of
//! the system go through the router as envelopes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::agent::{AgentRole, AgentState, MemoryKind};
use crate::core::artifact::{Artifact, ArtifactLedger};
use crate::core::envelope::{Address, Envelope, EnvelopeId, EnvelopeKind};
use crate::core::project::Project;
use crate::error::{Error, Result};
use crate::reasoning::{ArtifactDraft, Decision, Judgment, Reasoner, ReasoningContext};
use crate::router::Router;
use crate::{alog, alog_debug, alog_warn};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Lifecycle notifications from an actor to the runtime's observer loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Started { role: AgentRole, envelope: EnvelopeId },
    Completed { role: AgentRole, envelope: EnvelopeId },
    Blocked { role: AgentRole, reason: String },
    Stalled { role: AgentRole },
}

pub struct AgentActor {
    role: AgentRole,
    state: Arc<RwLock<AgentState>>,
    router: Arc<Router>,
    reasoner: Arc<dyn Reasoner>,
    project: Arc<RwLock<Project>>,
    ledger: Arc<RwLock<ArtifactLedger>>,
    paused: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<AgentEvent>,
    retry_limit: u32,
    wip_limit: usize,
    /// How long a blocked agent waits before retrying its envelope.
    blocked_cooldown: Duration,
}

impl AgentActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: AgentRole,
        router: Arc<Router>,
        reasoner: Arc<dyn Reasoner>,
        project: Arc<RwLock<Project>>,
        ledger: Arc<RwLock<ArtifactLedger>>,
        paused: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<AgentEvent>,
        retry_limit: u32,
        wip_limit: usize,
        blocked_cooldown: Duration,
    ) -> Self {
        Self {
            role,
            state: Arc::new(RwLock::new(AgentState::new(role))),
            router,
            reasoner,
            project,
            ledger,
            paused,
            events,
            retry_limit,
            wip_limit,
            blocked_cooldown,
        }
    }

    /// Shared handle to this actor's state, for the status service.
    pub fn state(&self) -> Arc<RwLock<AgentState>> {
        self.state.clone()
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// The actor's main loop. Returns when the token is cancelled; the
    /// envelope being processed at that moment is finished first.
    pub async fn run(mut self, cancel: CancellationToken) {
        alog!("Agent {} started", self.role);
        let inbox = match self.router.inbox(self.role) {
            Ok(inbox) => inbox,
            Err(e) => {
                alog_warn!("Agent {} has no inbox: {}", self.role, e);
                return;
            }
        };

        loop {
            if self.wait_while_paused(&cancel).await.is_err() {
                break;
            }

            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = inbox.recv() => envelope,
            };

            // The pause flag may have flipped while this task was parked
            // on an empty inbox; new work stays queued until resume.
            if *self.paused.borrow() {
                inbox.requeue(envelope);
                continue;
            }

            if self.over_wip_limit().await {
                inbox.requeue(envelope);
                tokio::task::yield_now().await;
                continue;
            }

            let blocked = self.process(envelope).await;
            if blocked {
                // Cool down before retrying, so a dead reasoner does not
                // turn into a hot loop and the stall monitor can see the
                // lack of progress.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.blocked_cooldown) => {}
                }
            }
        }
        alog!("Agent {} stopped", self.role);
    }

    /// Block while the runtime is paused. Errors only on cancellation.
    async fn wait_while_paused(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !*self.paused.borrow() {
            return Ok(());
        }
        alog_debug!("Agent {} paused", self.role);
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Unavailable("cancelled".to_string())),
            result = self.paused.wait_for(|p| !*p) => {
                result.map(|_| ()).map_err(|_| {
                    Error::Unavailable("pause channel closed".to_string())
                })
            }
        }
    }

    async fn over_wip_limit(&self) -> bool {
        self.state.read().await.wip_count >= self.wip_limit
    }

    /// Handle one envelope. Returns true when the agent ended up blocked.
    async fn process(&self, envelope: Envelope) -> bool {
        // Signoff broadcasts are informational; no reasoning needed.
        if envelope.kind == EnvelopeKind::Signoff {
            let mut state = self.state.write().await;
            state
                .memory
                .record(MemoryKind::Learning, format!("peer {}", envelope.summary()));
            return false;
        }

        {
            let mut state = self.state.write().await;
            state.start_work(envelope.summary());
        }
        let _ = self.events.send(AgentEvent::Started {
            role: self.role,
            envelope: envelope.id,
        });

        match self.reason_with_retry(&envelope).await {
            Ok(judgment) => {
                if let Err(e) = self.apply_judgment(&envelope, judgment).await {
                    alog_warn!("Agent {} failed to apply judgment: {}", self.role, e);
                }
                let mut state = self.state.write().await;
                state.finish_work();
                drop(state);
                let _ = self.events.send(AgentEvent::Completed {
                    role: self.role,
                    envelope: envelope.id,
                });
                false
            }
            Err(e) => {
                alog_warn!("Agent {} blocked: {}", self.role, e);
                let reason = e.to_string();
                {
                    let mut state = self.state.write().await;
                    state.mark_blocked(&reason);
                }
                // The envelope goes back for when the agent recovers.
                if let Ok(inbox) = self.router.inbox(self.role) {
                    inbox.requeue(envelope);
                }
                let _ = self.events.send(AgentEvent::Blocked {
                    role: self.role,
                    reason,
                });
                true
            }
        }
    }

    async fn reason_with_retry(&self, envelope: &Envelope) -> Result<Judgment> {
        let mut last_err = Error::Unavailable("no attempt made".to_string());
        for attempt in 0..self.retry_limit {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
            }
            let ctx = {
                let state = self.state.read().await;
                let ledger = self.ledger.read().await;
                ReasoningContext {
                    role: self.role,
                    memory: state.memory.snapshot(),
                    envelope,
                    owned_artifacts: ledger
                        .owned_by(self.role)
                        .into_iter()
                        .cloned()
                        .collect(),
                }
            };
            match self.reasoner.generate(ctx).await {
                Ok(judgment) => return Ok(judgment),
                Err(e) => {
                    alog_debug!(
                        "Agent {} reasoner attempt {} failed: {}",
                        self.role,
                        attempt + 1,
                        e
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn apply_judgment(&self, envelope: &Envelope, judgment: Judgment) -> Result<()> {
        match judgment.decision {
            Decision::Accept => self.apply_accept(envelope, judgment).await,
            Decision::Reject => self.apply_reject(envelope, judgment).await,
            Decision::Escalate => self.apply_escalate(envelope, judgment).await,
        }
    }

    async fn apply_accept(&self, envelope: &Envelope, judgment: Judgment) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state
                .memory
                .record(MemoryKind::Decision, judgment.content.clone());
        }

        let mut artifact_id = None;
        if let Some(draft) = judgment.new_artifact {
            let artifact = self.materialize_draft(draft).await?;
            artifact_id = Some(artifact.id);
            let id = artifact.id;
            self.ledger.write().await.record(artifact)?;
            self.state.write().await.own_artifact(id);
        }

        // Accepting a bug report with a fix resolves the blocker.
        if envelope.kind == EnvelopeKind::BugReport {
            let mut project = self.project.write().await;
            if let Err(e) = project.resolve_blocker(envelope.id) {
                alog_debug!("Blocker {} already resolved: {}", envelope.id.short(), e);
            }
        }

        // The signoff goes out before the artifact notice so it is
        // recorded before any peer reacts to the new artifact.
        if judgment.sign_off {
            let basis = self.state.read().await.owned_artifacts.clone();
            self.router
                .deliver(Envelope::signoff(self.role, basis))
                .await?;
        }

        if let Some(id) = artifact_id {
            self.router
                .deliver(Envelope::artifact_notice(
                    Address::Agent(self.role),
                    Address::Broadcast,
                    id,
                ))
                .await?;
        }

        if envelope.kind == EnvelopeKind::Request || envelope.kind == EnvelopeKind::BugReport {
            let mut response =
                Envelope::response_to(envelope, Address::Agent(self.role), judgment.content);
            if let Some(id) = artifact_id {
                response.artifact_refs.push(id);
            }
            self.router.deliver(response).await?;
        }
        Ok(())
    }

    async fn apply_reject(&self, envelope: &Envelope, judgment: Judgment) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state
                .memory
                .record(MemoryKind::Concern, judgment.content.clone());
        }
        // Rejecting an artifact notice means a defect was found: it
        // becomes a bug report against that artifact. Anything else gets
        // a counter-proposal back to the sender.
        if envelope.kind == EnvelopeKind::Artifact {
            if let Some(artifact_id) = envelope.artifact_refs.first() {
                let bug = Envelope::bug_report(
                    Address::Agent(self.role),
                    envelope.from,
                    *artifact_id,
                    judgment.content,
                )
                .with_parent(envelope.id);
                return self.router.deliver(bug).await;
            }
        }
        self.router
            .deliver(Envelope::response_to(
                envelope,
                Address::Agent(self.role),
                judgment.content,
            ))
            .await
    }

    async fn apply_escalate(&self, envelope: &Envelope, judgment: Judgment) -> Result<()> {
        let question =
            Envelope::clarification(Address::Agent(self.role), judgment.content, envelope);
        self.project.write().await.note_human_request(question.id);
        self.router.deliver(question).await
    }

    /// Turn a draft into a ledger-ready artifact: a revision of an
    /// existing artifact keeps its id, a fresh draft gets a new one.
    async fn materialize_draft(&self, draft: ArtifactDraft) -> Result<Artifact> {
        if let Some(revises) = draft.revises {
            let ledger = self.ledger.read().await;
            let prior = ledger
                .latest(&revises)
                .ok_or(Error::ArtifactNotFound(revises.0))?;
            return Ok(prior.revise(draft.content));
        }
        Ok(
            Artifact::new(draft.kind, self.role, draft.name, draft.content)
                .derived_from(draft.derived_from),
        )
    }
}
