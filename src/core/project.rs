//! Project lifecycle state machine.
//!
//! The nominal phase only moves forward. Feedback loops never rewind the
//! phase label; instead a bug report clears signoffs and registers a
//! blocker, so the effective state is the `(phase, signoffs, blockers)`
//! triple as a whole. `Delivered` is terminal and immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::core::agent::AgentRole;
use crate::core::artifact::ArtifactId;
use crate::core::envelope::{Envelope, EnvelopeId};
use crate::error::{Error, Result};

/// Unique identifier for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phases, in order. Reopened phases are not separate values;
/// re-entry is expressed by cleared signoffs at the same label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Design,
    Implementation,
    Testing,
    Delivered,
}

impl Phase {
    /// The next phase in the forward direction, if any.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Discovery => Some(Phase::Design),
            Phase::Design => Some(Phase::Implementation),
            Phase::Implementation => Some(Phase::Testing),
            Phase::Testing => Some(Phase::Delivered),
            Phase::Delivered => None,
        }
    }

    /// Roles whose signoff is required to leave this phase.
    pub fn required_roles(&self) -> &'static [AgentRole] {
        match self {
            Phase::Discovery => &[AgentRole::Pm],
            Phase::Design => &[AgentRole::Pm, AgentRole::Architect],
            Phase::Implementation => &[AgentRole::Architect, AgentRole::Developer],
            Phase::Testing => AgentRole::ALL.as_slice(),
            Phase::Delivered => &[],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Discovery => write!(f, "discovery"),
            Phase::Design => write!(f, "design"),
            Phase::Implementation => write!(f, "implementation"),
            Phase::Testing => write!(f, "testing"),
            Phase::Delivered => write!(f, "delivered"),
        }
    }
}

/// A recorded signoff: who approved, against which artifacts, and when.
///
/// The basis drives causal invalidation: a bug report on an artifact
/// revokes every signoff whose basis touches that artifact's lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signoff {
    pub role: AgentRole,
    pub basis: Vec<ArtifactId>,
    pub at: DateTime<Utc>,
}

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
}

/// The complete shared project state.
///
/// This is the only entity mutated by more than one agent's outcome; all
/// mutations go through a single write lock held by the owning handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub idea_text: String,
    phase: Phase,
    signoffs: HashMap<AgentRole, Signoff>,
    /// Open bug reports, in arrival order. Phase cannot advance while
    /// any remain.
    blockers: Vec<Envelope>,
    /// Envelope ids of clarification/approval requests awaiting a human.
    pending_human: HashSet<EnvelopeId>,
    phase_history: Vec<PhaseHistoryEntry>,
    /// Bumped on every mutation; status snapshots record the revision
    /// they observed.
    revision: u64,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(idea_text: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            idea_text: idea_text.into(),
            phase: Phase::Discovery,
            signoffs: HashMap::new(),
            blockers: Vec::new(),
            pending_human: HashSet::new(),
            phase_history: vec![PhaseHistoryEntry {
                phase: Phase::Discovery,
                entered_at: Utc::now(),
            }],
            revision: 0,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        &self.phase_history
    }

    pub fn is_delivered(&self) -> bool {
        self.phase == Phase::Delivered
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn guard_mutable(&self) -> Result<()> {
        if self.is_delivered() {
            return Err(Error::Delivered);
        }
        Ok(())
    }

    // Signoffs

    pub fn signoffs(&self) -> &HashMap<AgentRole, Signoff> {
        &self.signoffs
    }

    pub fn has_signoff(&self, role: AgentRole) -> bool {
        self.signoffs.contains_key(&role)
    }

    /// Record a role's approval with the artifacts it was judged against.
    /// A repeated signoff replaces the earlier one.
    pub fn record_signoff(&mut self, role: AgentRole, basis: Vec<ArtifactId>) -> Result<()> {
        self.guard_mutable()?;
        self.signoffs.insert(
            role,
            Signoff {
                role,
                basis,
                at: Utc::now(),
            },
        );
        self.touch();
        Ok(())
    }

    /// Clear a role's approval. No-op when none is recorded.
    pub fn revoke_signoff(&mut self, role: AgentRole) -> Result<()> {
        self.guard_mutable()?;
        if self.signoffs.remove(&role).is_some() {
            self.touch();
        }
        Ok(())
    }

    // Blockers

    pub fn blockers(&self) -> &[Envelope] {
        &self.blockers
    }

    pub fn add_blocker(&mut self, bug_report: Envelope) -> Result<()> {
        self.guard_mutable()?;
        self.blockers.push(bug_report);
        self.touch();
        Ok(())
    }

    /// Remove a resolved blocker by envelope id.
    pub fn resolve_blocker(&mut self, id: EnvelopeId) -> Result<()> {
        self.guard_mutable()?;
        let before = self.blockers.len();
        self.blockers.retain(|b| b.id != id);
        if self.blockers.len() == before {
            return Err(Error::RequestNotFound(id.0));
        }
        self.touch();
        Ok(())
    }

    // Human interaction bookkeeping

    pub fn pending_human(&self) -> &HashSet<EnvelopeId> {
        &self.pending_human
    }

    pub fn note_human_request(&mut self, id: EnvelopeId) {
        self.pending_human.insert(id);
        self.touch();
    }

    pub fn clear_human_request(&mut self, id: &EnvelopeId) {
        if self.pending_human.remove(id) {
            self.touch();
        }
    }

    // Transitions

    /// Whether the current phase's preconditions for advancing hold.
    pub fn ready_to_advance(&self) -> bool {
        if self.is_delivered() {
            return false;
        }
        if !self.blockers.is_empty() {
            return false;
        }
        let required: &[AgentRole] = if self.phase.next() == Some(Phase::Delivered) {
            // Delivery needs the full agent set, not just the phase's roles.
            AgentRole::ALL.as_slice()
        } else {
            self.phase.required_roles()
        };
        required.iter().all(|r| self.signoffs.contains_key(r))
    }

    /// Advance to the next phase if every required role has signed off
    /// and no blockers remain. The transition consumes the signoffs it
    /// required; a signoff from a non-required role arrived early for
    /// the next phase and is kept.
    pub fn try_advance(&mut self) -> Result<Phase> {
        if self.is_delivered() {
            return Err(Error::Delivered);
        }
        let next = match self.phase.next() {
            Some(p) => p,
            None => return Err(Error::Delivered),
        };
        if !self.ready_to_advance() {
            return Err(Error::NotReady {
                phase: self.phase,
                reason: self.not_ready_reason(),
            });
        }
        let required: &[AgentRole] = if next == Phase::Delivered {
            AgentRole::ALL.as_slice()
        } else {
            self.phase.required_roles()
        };
        for role in required {
            self.signoffs.remove(role);
        }
        self.phase = next;
        self.phase_history.push(PhaseHistoryEntry {
            phase: next,
            entered_at: Utc::now(),
        });
        if next == Phase::Delivered {
            self.delivered_at = Some(Utc::now());
        }
        self.touch();
        Ok(next)
    }

    fn not_ready_reason(&self) -> String {
        if !self.blockers.is_empty() {
            return format!("{} open blocker(s)", self.blockers.len());
        }
        let required: &[AgentRole] = if self.phase.next() == Some(Phase::Delivered) {
            AgentRole::ALL.as_slice()
        } else {
            self.phase.required_roles()
        };
        let missing: Vec<String> = required
            .iter()
            .filter(|r| !self.signoffs.contains_key(r))
            .map(|r| r.to_string())
            .collect();
        format!("missing signoff from {}", missing.join(", "))
    }
}
