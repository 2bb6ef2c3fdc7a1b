use thiserror::Error;

use crate::core::agent::AgentRole;
use crate::core::project::Phase;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    /// The inbox has no deliverable work. Normal for polling callers.
    #[error("Inbox is empty")]
    Empty,

    /// A phase transition was attempted before its preconditions held.
    /// Recoverable; the caller retries once signoffs/blockers change.
    #[error("Phase {phase} not ready to advance: {reason}")]
    NotReady { phase: Phase, reason: String },

    /// The reasoning collaborator could not be reached.
    #[error("Reasoner unavailable: {0}")]
    Unavailable(String),

    /// The reasoning collaborator returned an unusable result.
    #[error("Reasoner returned invalid output: {0}")]
    Invalid(String),

    /// An agent has been blocked past the configured threshold.
    #[error("Agent {role} is stalled: {reason}")]
    Stalled { role: AgentRole, reason: String },

    /// Concurrent mutation of shared project state was detected.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Project is delivered; no further mutation is accepted")]
    Delivered,

    #[error("Agent not found: {role}")]
    AgentNotFound { role: AgentRole },

    #[error("Project not found: {0}")]
    ProjectNotFound(uuid::Uuid),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(uuid::Uuid),

    #[error("No pending human request: {0}")]
    RequestNotFound(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, Error>;
