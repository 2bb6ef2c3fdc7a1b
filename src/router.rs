//! Envelope routing between agents, the human gateway, and the project.
//!
//! The router is the only component that interprets envelope kinds.
//! Bug reports are re-targeted to the owner of the reported artifact and
//! trigger causal signoff invalidation; signoffs are recorded on the
//! project and may advance the phase. Everything else is plain delivery.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::core::agent::AgentRole;
use crate::core::artifact::ArtifactLedger;
use crate::core::envelope::{Address, Envelope, EnvelopeId, EnvelopeKind};
use crate::core::project::{Phase, Project};
use crate::error::{Error, Result};
use crate::inbox::Inbox;
use crate::{alog, alog_debug, alog_warn};

/// Notable routing outcomes, reported to the runtime's observer loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    PhaseAdvanced(Phase),
    SignoffRecorded(AgentRole),
    SignoffRevoked { role: AgentRole, cause: EnvelopeId },
    BlockerAdded(EnvelopeId),
    /// The terminal transition is ready and awaits human approval.
    MilestonePending(EnvelopeId),
    Delivered,
}

/// Payload marker distinguishing a milestone approval request from an
/// ordinary clarification on the human channel.
pub const MILESTONE_MARKER: &str = "milestone";

/// One line in the bounded activity log.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub text: String,
}

pub struct Router {
    inboxes: HashMap<AgentRole, Inbox>,
    human_tx: mpsc::UnboundedSender<Envelope>,
    project: Arc<RwLock<Project>>,
    ledger: Arc<RwLock<ArtifactLedger>>,
    activity: Mutex<VecDeque<ActivityEntry>>,
    activity_tail: usize,
    events: mpsc::UnboundedSender<RouterEvent>,
    /// Copies of every delivered envelope, for the append-only audit log.
    audit_tx: mpsc::UnboundedSender<Envelope>,
    /// Set while a terminal-transition proposal awaits the operator, so
    /// late signoffs do not park a second one.
    milestone_pending: AtomicBool,
}

impl Router {
    pub fn new(
        project: Arc<RwLock<Project>>,
        ledger: Arc<RwLock<ArtifactLedger>>,
        human_tx: mpsc::UnboundedSender<Envelope>,
        events: mpsc::UnboundedSender<RouterEvent>,
        audit_tx: mpsc::UnboundedSender<Envelope>,
        activity_tail: usize,
    ) -> Self {
        let inboxes = AgentRole::ALL
            .iter()
            .map(|role| (*role, Inbox::new()))
            .collect();
        Self {
            inboxes,
            human_tx,
            project,
            ledger,
            activity: Mutex::new(VecDeque::new()),
            activity_tail,
            events,
            audit_tx,
            milestone_pending: AtomicBool::new(false),
        }
    }

    /// The inbox for a role. Clones share the underlying queue.
    pub fn inbox(&self, role: AgentRole) -> Result<Inbox> {
        self.inboxes
            .get(&role)
            .cloned()
            .ok_or(Error::AgentNotFound { role })
    }

    pub fn inbox_depth(&self, role: AgentRole) -> usize {
        self.inboxes.get(&role).map(|i| i.depth()).unwrap_or(0)
    }

    /// Route an envelope to its destination, applying the kind-specific
    /// project effects first.
    pub async fn deliver(&self, envelope: Envelope) -> Result<()> {
        alog_debug!("Router::deliver {}", envelope.summary());
        self.record_activity(envelope.summary()).await;
        let _ = self.audit_tx.send(envelope.clone());

        match envelope.kind {
            EnvelopeKind::BugReport => self.deliver_bug_report(envelope).await,
            EnvelopeKind::Signoff => self.deliver_signoff(envelope).await,
            _ => self.deliver_plain(envelope).await,
        }
    }

    async fn deliver_plain(&self, envelope: Envelope) -> Result<()> {
        match envelope.to {
            Address::Agent(role) => {
                let inbox = self.inbox(role)?;
                if !inbox.push(envelope) {
                    alog_debug!("Duplicate envelope dropped for {}", role);
                }
                Ok(())
            }
            Address::Human => {
                self.human_tx
                    .send(envelope)
                    .map_err(|_| Error::Unavailable("human gateway closed".to_string()))
            }
            Address::Broadcast => {
                self.fan_out(envelope);
                Ok(())
            }
        }
    }

    /// Fan out a broadcast to every agent except the sender. Each copy
    /// keeps the original envelope id, so the per-inbox duplicate guard
    /// still applies.
    fn fan_out(&self, envelope: Envelope) {
        for (role, inbox) in &self.inboxes {
            if envelope.from == Address::Agent(*role) {
                continue;
            }
            inbox.push(envelope.clone());
        }
    }

    /// A bug report is re-targeted to the current owner of the reported
    /// artifact, registered as a project blocker, and invalidates the
    /// signoff of that owner plus every role whose signoff basis touches
    /// the artifact's causal lineage.
    async fn deliver_bug_report(&self, envelope: Envelope) -> Result<()> {
        let artifact_id = *envelope
            .artifact_refs
            .first()
            .ok_or_else(|| Error::Invalid("bug report without artifact reference".to_string()))?;

        let ledger = self.ledger.read().await;
        let owner = ledger
            .owner(&artifact_id)
            .ok_or(Error::ArtifactNotFound(artifact_id.0))?;
        let mut tainted = ledger.descendants_of(&artifact_id);
        tainted.insert(artifact_id);
        drop(ledger);

        {
            let mut project = self.project.write().await;
            // Refused after delivery: the terminal phase is immutable.
            project.add_blocker(envelope.clone())?;

            let mut to_revoke = vec![owner];
            for (role, signoff) in project.signoffs() {
                if *role != owner && signoff.basis.iter().any(|b| tainted.contains(b)) {
                    to_revoke.push(*role);
                }
            }
            for role in to_revoke {
                if project.has_signoff(role) {
                    project.revoke_signoff(role)?;
                    alog!(
                        "Signoff of {} revoked by bug report {}",
                        role,
                        envelope.id.short()
                    );
                    let _ = self.events.send(RouterEvent::SignoffRevoked {
                        role,
                        cause: envelope.id,
                    });
                }
            }
        }
        let _ = self.events.send(RouterEvent::BlockerAdded(envelope.id));

        alog!(
            "Bug report {} re-targeted to {} (artifact {})",
            envelope.id.short(),
            owner,
            artifact_id.short()
        );
        let inbox = self.inbox(owner)?;
        inbox.push(envelope);
        Ok(())
    }

    /// Record the sender's signoff and attempt a phase transition. A
    /// refused transition is the normal case until the last signoff
    /// lands, so `NotReady` is swallowed.
    async fn deliver_signoff(&self, envelope: Envelope) -> Result<()> {
        let role = match envelope.from {
            Address::Agent(role) => role,
            _ => return Err(Error::Invalid("signoff from non-agent".to_string())),
        };

        let mut project = self.project.write().await;
        project.record_signoff(role, envelope.artifact_refs.clone())?;
        let _ = self.events.send(RouterEvent::SignoffRecorded(role));
        alog!("Signoff recorded for {}", role);

        // The terminal transition is gated on human approval; anything
        // earlier advances as soon as the signoff set is complete.
        if project.ready_to_advance() && project.phase().next() == Some(Phase::Delivered) {
            if self.milestone_pending.swap(true, Ordering::SeqCst) {
                // A proposal is already waiting on the operator; the
                // signoff is recorded but does not park a second one.
                drop(project);
                self.fan_out(envelope);
                return Ok(());
            }
            let basis: Vec<_> = project
                .signoffs()
                .values()
                .flat_map(|s| s.basis.iter().copied())
                .collect();
            let mut proposal = Envelope::request(
                Address::Agent(role),
                Address::Human,
                "approve delivery",
            )
            .with_payload(serde_json::json!({ MILESTONE_MARKER: true }));
            proposal.artifact_refs = basis;
            project.note_human_request(proposal.id);
            drop(project);

            alog!("Milestone approval pending: {}", proposal.id.short());
            let _ = self.events.send(RouterEvent::MilestonePending(proposal.id));
            self.record_activity("milestone approval requested".to_string())
                .await;
            self.human_tx
                .send(proposal)
                .map_err(|_| Error::Unavailable("human gateway closed".to_string()))?;
        } else {
            match project.try_advance() {
                Ok(phase) => {
                    alog!("Project advanced to {}", phase);
                    self.record_activity(format!("phase -> {}", phase)).await;
                    let _ = self.events.send(RouterEvent::PhaseAdvanced(phase));
                }
                Err(Error::NotReady { reason, .. }) => {
                    alog_debug!("Phase hold: {}", reason);
                }
                Err(e) => {
                    alog_warn!("Signoff transition failed: {}", e);
                    return Err(e);
                }
            }
            drop(project);
        }

        self.fan_out(envelope);
        Ok(())
    }

    /// Perform the approved terminal transition.
    pub async fn approve_milestone(&self) -> Result<Phase> {
        let mut project = self.project.write().await;
        let phase = match project.try_advance() {
            Ok(phase) => phase,
            Err(e) => {
                // The held transition is stale (a bug report may have
                // landed since the proposal parked). Clear the flag so
                // a fresh proposal can park when the set re-forms.
                self.milestone_pending.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        drop(project);
        self.milestone_pending.store(false, Ordering::SeqCst);

        alog!("Project advanced to {}", phase);
        self.record_activity(format!("phase -> {}", phase)).await;
        let _ = self.events.send(RouterEvent::PhaseAdvanced(phase));
        if phase == Phase::Delivered {
            let _ = self.events.send(RouterEvent::Delivered);
        }
        Ok(phase)
    }

    /// Reject a proposed terminal transition. The rejection re-enters
    /// the phase as a bug report against the proposal's first referenced
    /// artifact, clearing the dependent signoffs the usual way.
    pub async fn reject_milestone(&self, proposal: &Envelope, reason: &str) -> Result<()> {
        self.milestone_pending.store(false, Ordering::SeqCst);
        self.record_activity("milestone rejected".to_string()).await;
        if let Some(artifact_id) = proposal.artifact_refs.first() {
            let bug = Envelope::bug_report(Address::Human, proposal.from, *artifact_id, reason)
                .with_parent(proposal.id);
            return self.deliver(bug).await;
        }
        // No artifact basis to target: clear every signoff directly.
        let mut project = self.project.write().await;
        for role in AgentRole::ALL {
            if project.has_signoff(role) {
                project.revoke_signoff(role)?;
                let _ = self.events.send(RouterEvent::SignoffRevoked {
                    role,
                    cause: proposal.id,
                });
            }
        }
        Ok(())
    }

    async fn record_activity(&self, text: String) {
        let mut activity = self.activity.lock().await;
        activity.push_back(ActivityEntry {
            at: Utc::now(),
            text,
        });
        while activity.len() > self.activity_tail {
            activity.pop_front();
        }
    }

    /// The retained tail of the activity log, oldest first.
    pub async fn activity_tail(&self) -> Vec<ActivityEntry> {
        self.activity.lock().await.iter().cloned().collect()
    }
}
