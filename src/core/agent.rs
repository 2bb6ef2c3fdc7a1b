//! Agent domain model: roles, status, and append-only memory.
//!
//! Agents are modeled as stateful "people": each role carries a memory
//! log it alone may mutate, plus bookkeeping for work-in-progress and
//! progress tracking used by the stall monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::artifact::ArtifactId;

/// The fixed set of collaborating roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Pm,
    Architect,
    Developer,
    Tester,
}

impl AgentRole {
    /// All roles, in pipeline order.
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Pm,
        AgentRole::Architect,
        AgentRole::Developer,
        AgentRole::Tester,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentRole::Pm => "Product Manager",
            AgentRole::Architect => "Architect",
            AgentRole::Developer => "Developer",
            AgentRole::Tester => "Tester",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Pm => write!(f, "pm"),
            AgentRole::Architect => write!(f, "architect"),
            AgentRole::Developer => write!(f, "developer"),
            AgentRole::Tester => write!(f, "tester"),
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pm" => Ok(AgentRole::Pm),
            "architect" => Ok(AgentRole::Architect),
            "developer" => Ok(AgentRole::Developer),
            "tester" => Ok(AgentRole::Tester),
            other => Err(format!("unknown agent role: {}", other)),
        }
    }
}

/// Current working status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// No work in the inbox.
    #[default]
    Idle,
    /// Actively processing an envelope.
    Working,
    /// Unable to make progress (reasoner failure, awaiting clarification).
    Blocked,
    /// Finished for this project; signed off with nothing pending.
    Done,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Blocked => write!(f, "blocked"),
            AgentStatus::Done => write!(f, "done"),
        }
    }
}

/// Category of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A decision the agent committed to, with rationale.
    Decision,
    /// Something the agent is tracking as a risk.
    Concern,
    /// Something the agent learned during the project.
    Learning,
    /// Operator guidance injected from outside.
    Guidance,
}

/// One entry in an agent's append-only memory log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub kind: MemoryKind,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only memory log, owned exclusively by one agent.
///
/// Other components read via `snapshot()` and never mutate. Entries are
/// never removed or rewritten; corrections are new entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMemory {
    entries: Vec<MemoryEntry>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: MemoryKind, text: impl Into<String>) {
        self.entries.push(MemoryEntry {
            kind,
            text: text.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the log for readers outside the owning agent.
    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.entries.clone()
    }

    /// Render the recent tail of the log for reasoning prompts.
    ///
    /// Keeps the last few entries of each kind so the collaborator sees
    /// current decisions and concerns without the full history.
    pub fn context_summary(&self) -> String {
        if self.entries.is_empty() {
            return "No context accumulated yet.".to_string();
        }
        let tail = self.entries.iter().rev().take(8).collect::<Vec<_>>();
        tail.iter()
            .rev()
            .map(|e| {
                let label = match e.kind {
                    MemoryKind::Decision => "decision",
                    MemoryKind::Concern => "concern",
                    MemoryKind::Learning => "learning",
                    MemoryKind::Guidance => "guidance",
                };
                format!("[{}] {}", label, e.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Complete state of an agent at a point in time.
///
/// This is what gets snapshotted for the status service and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub role: AgentRole,
    pub status: AgentStatus,
    pub memory: AgentMemory,
    /// Artifacts this agent currently owns.
    pub owned_artifacts: Vec<ArtifactId>,
    /// In-flight envelopes (picked, not yet completed). Never exceeds
    /// the configured WIP limit.
    pub wip_count: usize,
    /// Short description of current work, for status display.
    pub current_work: Option<String>,
    pub completed_count: usize,
    pub last_progress: DateTime<Utc>,
}

impl AgentState {
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            status: AgentStatus::Idle,
            memory: AgentMemory::new(),
            owned_artifacts: Vec::new(),
            wip_count: 0,
            current_work: None,
            completed_count: 0,
            last_progress: Utc::now(),
        }
    }

    /// Mark the agent as starting work on an envelope.
    pub fn start_work(&mut self, summary: impl Into<String>) {
        self.status = AgentStatus::Working;
        self.wip_count += 1;
        self.current_work = Some(summary.into());
        self.last_progress = Utc::now();
    }

    /// Mark the current envelope as completed.
    pub fn finish_work(&mut self) {
        self.wip_count = self.wip_count.saturating_sub(1);
        self.completed_count += 1;
        self.current_work = None;
        self.status = if self.wip_count == 0 {
            AgentStatus::Idle
        } else {
            AgentStatus::Working
        };
        self.last_progress = Utc::now();
    }

    /// Mark the agent blocked; the in-flight envelope stays un-acknowledged.
    pub fn mark_blocked(&mut self, reason: impl Into<String>) {
        self.status = AgentStatus::Blocked;
        self.wip_count = self.wip_count.saturating_sub(1);
        self.current_work = Some(reason.into());
    }

    pub fn own_artifact(&mut self, id: ArtifactId) {
        if !self.owned_artifacts.contains(&id) {
            self.owned_artifacts.push(id);
        }
    }

    pub fn release_artifact(&mut self, id: &ArtifactId) {
        self.owned_artifacts.retain(|a| a != id);
    }
}
