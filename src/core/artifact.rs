//! Versioned artifacts and the ledger that tracks them.
//!
//! An artifact is owned by exactly one agent at a time. Ownership
//! transfer and revision both append a new version entry that references
//! the prior one via `derived_from`; nothing is ever copied or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::core::agent::AgentRole;
use crate::error::{Error, Result};

/// Unique identifier for an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of artifacts the agents produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Requirements,
    Design,
    Code,
    TestReport,
    Doc,
}

impl ArtifactKind {
    /// The role that typically produces this kind of artifact.
    pub fn producing_role(&self) -> AgentRole {
        match self {
            ArtifactKind::Requirements => AgentRole::Pm,
            ArtifactKind::Design => AgentRole::Architect,
            ArtifactKind::Code => AgentRole::Developer,
            ArtifactKind::TestReport => AgentRole::Tester,
            ArtifactKind::Doc => AgentRole::Pm,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Requirements => write!(f, "requirements"),
            ArtifactKind::Design => write!(f, "design"),
            ArtifactKind::Code => write!(f, "code"),
            ArtifactKind::TestReport => write!(f, "test_report"),
            ArtifactKind::Doc => write!(f, "doc"),
        }
    }
}

/// A versioned artifact produced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub owner: AgentRole,
    pub version: u32,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Artifacts this one was built from. A revision lists its prior
    /// version's id; a design lists the requirements it implements.
    pub derived_from: Vec<ArtifactId>,
}

impl Artifact {
    pub fn new(
        kind: ArtifactKind,
        owner: AgentRole,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            kind,
            owner,
            version: 1,
            name: name.into(),
            content: content.into(),
            created_at: Utc::now(),
            derived_from: Vec::new(),
        }
    }

    pub fn derived_from(mut self, parents: Vec<ArtifactId>) -> Self {
        self.derived_from = parents;
        self
    }

    /// Produce the next version of this artifact with new content.
    /// The revision references this version; the old entry stays intact.
    pub fn revise(&self, content: impl Into<String>) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            owner: self.owner,
            version: self.version + 1,
            name: self.name.clone(),
            content: content.into(),
            created_at: Utc::now(),
            derived_from: vec![self.id],
        }
    }

    /// Transfer ownership by appending a new version under the new
    /// owner. Content is unchanged; the entry references the prior.
    pub fn transfer_to(&self, new_owner: AgentRole) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            owner: new_owner,
            version: self.version + 1,
            name: self.name.clone(),
            content: self.content.clone(),
            created_at: Utc::now(),
            derived_from: vec![self.id],
        }
    }
}

/// Append-only registry of all artifact versions for a project.
///
/// Supports idempotent recording, latest-version lookup, and the causal
/// descendant traversal the bug-report invalidation rule needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactLedger {
    /// All versions, keyed by (id, version).
    versions: HashMap<ArtifactId, Vec<Artifact>>,
    /// Reverse edges of `derived_from`: parent id -> derived ids.
    derived: HashMap<ArtifactId, Vec<ArtifactId>>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an artifact version.
    ///
    /// Re-recording the same id+version with identical content is a
    /// no-op; the same id+version with different content is a conflict.
    pub fn record(&mut self, artifact: Artifact) -> Result<()> {
        let entries = self.versions.entry(artifact.id).or_default();
        if let Some(existing) = entries.iter().find(|a| a.version == artifact.version) {
            if existing.content == artifact.content && existing.owner == artifact.owner {
                return Ok(());
            }
            return Err(Error::Conflict(format!(
                "artifact {} v{} already recorded with different content",
                artifact.id.short(),
                artifact.version
            )));
        }
        for parent in &artifact.derived_from {
            if *parent != artifact.id {
                self.derived.entry(*parent).or_default().push(artifact.id);
            }
        }
        entries.push(artifact);
        Ok(())
    }

    /// Latest version of an artifact, if recorded.
    pub fn latest(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.versions
            .get(id)?
            .iter()
            .max_by_key(|a| a.version)
    }

    /// A specific version of an artifact.
    pub fn version(&self, id: &ArtifactId, version: u32) -> Option<&Artifact> {
        self.versions
            .get(id)?
            .iter()
            .find(|a| a.version == version)
    }

    /// Current owner of an artifact (owner of its latest version).
    pub fn owner(&self, id: &ArtifactId) -> Option<AgentRole> {
        self.latest(id).map(|a| a.owner)
    }

    /// All distinct artifact ids causally derived from `id`, transitively.
    /// Does not include `id` itself.
    pub fn descendants_of(&self, id: &ArtifactId) -> HashSet<ArtifactId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(*id);
        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.derived.get(&current) {
                for child in children {
                    if seen.insert(*child) {
                        queue.push_back(*child);
                    }
                }
            }
        }
        seen
    }

    /// Latest versions of every artifact owned by `role`.
    pub fn owned_by(&self, role: AgentRole) -> Vec<&Artifact> {
        self.versions
            .keys()
            .filter_map(|id| self.latest(id))
            .filter(|a| a.owner == role)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
