//! The reasoning port: how agents decide what to do with an envelope.
//!
//! The runtime never knows what produces a judgment. Production wires a
//! model-backed implementation; tests and the demo use the scripted one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::core::agent::{AgentRole, MemoryEntry};
use crate::core::artifact::{Artifact, ArtifactId, ArtifactKind};
use crate::core::envelope::Envelope;
use crate::error::{Error, Result};

/// The three ways an agent can respond to a piece of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Do the work; optionally produce an artifact and sign off.
    Accept,
    /// Push back with a counter-proposal to the sender.
    Reject,
    /// Ask the human operator for a decision.
    Escalate,
}

/// An artifact the reasoner wants created or revised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub kind: ArtifactKind,
    pub name: String,
    pub content: String,
    /// Existing artifact to revise instead of creating a new one.
    pub revises: Option<ArtifactId>,
    /// Upstream artifacts the new artifact is built from.
    pub derived_from: Vec<ArtifactId>,
}

impl ArtifactDraft {
    pub fn new(kind: ArtifactKind, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            content: content.into(),
            revises: None,
            derived_from: Vec::new(),
        }
    }

    pub fn revising(mut self, id: ArtifactId) -> Self {
        self.revises = Some(id);
        self
    }

    pub fn derived_from(mut self, parents: Vec<ArtifactId>) -> Self {
        self.derived_from = parents;
        self
    }
}

/// The outcome of one reasoning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub decision: Decision,
    /// Free-text result: response body, counter-proposal, or question.
    pub content: String,
    pub new_artifact: Option<ArtifactDraft>,
    /// Whether the agent considers its phase work complete.
    pub sign_off: bool,
}

impl Judgment {
    pub fn accept(content: impl Into<String>) -> Self {
        Self {
            decision: Decision::Accept,
            content: content.into(),
            new_artifact: None,
            sign_off: false,
        }
    }

    pub fn reject(content: impl Into<String>) -> Self {
        Self {
            decision: Decision::Reject,
            content: content.into(),
            new_artifact: None,
            sign_off: false,
        }
    }

    pub fn escalate(question: impl Into<String>) -> Self {
        Self {
            decision: Decision::Escalate,
            content: question.into(),
            new_artifact: None,
            sign_off: false,
        }
    }

    pub fn with_artifact(mut self, draft: ArtifactDraft) -> Self {
        self.new_artifact = Some(draft);
        self
    }

    pub fn signing_off(mut self) -> Self {
        self.sign_off = true;
        self
    }
}

/// Everything a reasoner gets to see for one call. Snapshots only; a
/// reasoner can never mutate runtime state directly.
pub struct ReasoningContext<'a> {
    pub role: AgentRole,
    pub memory: Vec<MemoryEntry>,
    pub envelope: &'a Envelope,
    pub owned_artifacts: Vec<Artifact>,
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Produce a judgment for the envelope.
    ///
    /// `Err(Unavailable)` and `Err(Invalid)` are retryable from the
    /// caller's point of view; agent state must be unchanged on failure.
    async fn generate(&self, ctx: ReasoningContext<'_>) -> Result<Judgment>;
}

/// Deterministic reasoner driven by a pre-loaded queue of outcomes.
///
/// Each call pops the next outcome for the calling role. An exhausted
/// queue yields `Unavailable`, which surfaces as a blocked agent.
pub struct ScriptedReasoner {
    scripts: Mutex<VecDeque<(AgentRole, Result<Judgment>)>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a judgment for the next call by `role`.
    pub fn push(&self, role: AgentRole, judgment: Judgment) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back((role, Ok(judgment)));
        }
    }

    /// Queue a failure for the next call by `role`.
    pub fn push_failure(&self, role: AgentRole, error: Error) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back((role, Err(error)));
        }
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ScriptedReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn generate(&self, ctx: ReasoningContext<'_>) -> Result<Judgment> {
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| Error::Unavailable("script queue poisoned".to_string()))?;
        let position = scripts.iter().position(|(role, _)| *role == ctx.role);
        match position {
            Some(i) => scripts.remove(i).map(|(_, outcome)| outcome).ok_or_else(|| {
                Error::Unavailable("script queue drained concurrently".to_string())
            })?,
            None => Err(Error::Unavailable(format!(
                "no scripted judgment for {}",
                ctx.role
            ))),
        }
    }
}
