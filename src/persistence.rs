//! Persistence port: how project state reaches durable storage.
//!
//! The runtime only talks to the `Store` trait. `MemoryStore` backs the
//! tests and the demo binary; `FileStore` keeps JSON under a directory
//! tree and survives restarts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::config::Config;

use crate::core::agent::{AgentMemory, AgentRole};
use crate::core::artifact::{Artifact, ArtifactLedger};
use crate::core::envelope::Envelope;
use crate::core::project::{Project, ProjectId};
use crate::error::{Error, Result};
use crate::alog_debug;

/// Everything needed to reconstruct a project after a restart: the
/// project record, each agent's memory log, every artifact version, and
/// the append-only envelope log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    pub memories: HashMap<AgentRole, AgentMemory>,
    pub ledger: ArtifactLedger,
    pub envelope_log: Vec<Envelope>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist the full project snapshot, replacing any prior one.
    async fn save_state(&self, snapshot: ProjectSnapshot) -> Result<()>;

    /// Persist one artifact version. Re-saving the same id+version with
    /// identical content is a no-op (idempotent under retry).
    async fn save_artifact(&self, project_id: ProjectId, artifact: Artifact) -> Result<()>;

    /// Load the stored snapshot, or `ProjectNotFound`.
    async fn load_state(&self, project_id: ProjectId) -> Result<ProjectSnapshot>;

    /// Append an envelope to the audit log.
    async fn append_log(&self, project_id: ProjectId, envelope: Envelope) -> Result<()>;
}

#[derive(Default)]
struct StoredProject {
    snapshot: Option<ProjectSnapshot>,
    artifacts: ArtifactLedger,
    log: Vec<Envelope>,
}

/// In-memory store for tests and the demo binary.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<ProjectId, StoredProject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn log_len(&self, project_id: ProjectId) -> usize {
        self.projects
            .lock()
            .await
            .get(&project_id)
            .map(|p| p.log.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_state(&self, snapshot: ProjectSnapshot) -> Result<()> {
        let id = snapshot.project.id;
        alog_debug!("MemoryStore::save_state {}", id.short());
        let mut projects = self.projects.lock().await;
        projects.entry(id).or_default().snapshot = Some(snapshot);
        Ok(())
    }

    async fn save_artifact(&self, project_id: ProjectId, artifact: Artifact) -> Result<()> {
        let mut projects = self.projects.lock().await;
        projects
            .entry(project_id)
            .or_default()
            .artifacts
            .record(artifact)
    }

    async fn load_state(&self, project_id: ProjectId) -> Result<ProjectSnapshot> {
        let projects = self.projects.lock().await;
        let stored = projects
            .get(&project_id)
            .ok_or(Error::ProjectNotFound(project_id.0))?;
        let mut snapshot = stored
            .snapshot
            .clone()
            .ok_or(Error::ProjectNotFound(project_id.0))?;
        // Artifacts and the log may be newer than the last full save.
        snapshot.ledger = stored.artifacts.clone();
        snapshot.envelope_log = stored.log.clone();
        Ok(snapshot)
    }

    async fn append_log(&self, project_id: ProjectId, envelope: Envelope) -> Result<()> {
        let mut projects = self.projects.lock().await;
        projects.entry(project_id).or_default().log.push(envelope);
        Ok(())
    }
}

/// Durable store: one directory per project under `root`, holding a
/// `state.json` snapshot, one file per artifact version, and an
/// append-only `log.jsonl`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `~/.atelier/projects`.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::atelier_dir()?.join("projects")))
    }

    fn project_dir(&self, project_id: ProjectId) -> PathBuf {
        self.root.join(project_id.0.to_string())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn save_state(&self, snapshot: ProjectSnapshot) -> Result<()> {
        let id = snapshot.project.id;
        let dir = self.project_dir(id);
        fs::create_dir_all(&dir)?;
        // Write-then-rename so a crash cannot leave a torn state file.
        let tmp = dir.join("state.json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)?;
        fs::rename(&tmp, dir.join("state.json"))?;
        alog_debug!("FileStore::save_state {}", id.short());
        Ok(())
    }

    async fn save_artifact(&self, project_id: ProjectId, artifact: Artifact) -> Result<()> {
        let dir = self.project_dir(project_id).join("artifacts");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}-v{}.json", artifact.id, artifact.version));
        if path.exists() {
            let existing: Artifact = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if existing.content == artifact.content && existing.owner == artifact.owner {
                return Ok(());
            }
            return Err(Error::Conflict(format!(
                "artifact {} v{} already stored with different content",
                artifact.id.short(),
                artifact.version
            )));
        }
        fs::write(&path, serde_json::to_string_pretty(&artifact)?)?;
        Ok(())
    }

    async fn load_state(&self, project_id: ProjectId) -> Result<ProjectSnapshot> {
        let dir = self.project_dir(project_id);
        let state_path = dir.join("state.json");
        if !state_path.exists() {
            return Err(Error::ProjectNotFound(project_id.0));
        }
        let mut snapshot: ProjectSnapshot =
            serde_json::from_str(&fs::read_to_string(&state_path)?)?;

        // Artifacts and the log may be newer than the last full save.
        let artifacts_dir = dir.join("artifacts");
        if artifacts_dir.exists() {
            for entry in fs::read_dir(&artifacts_dir)? {
                let artifact: Artifact =
                    serde_json::from_str(&fs::read_to_string(entry?.path())?)?;
                snapshot.ledger.record(artifact)?;
            }
        }
        let log_path = dir.join("log.jsonl");
        if log_path.exists() {
            snapshot.envelope_log = fs::read_to_string(&log_path)?
                .lines()
                .map(serde_json::from_str)
                .collect::<std::result::Result<_, _>>()?;
        }
        Ok(snapshot)
    }

    async fn append_log(&self, project_id: ProjectId, envelope: Envelope) -> Result<()> {
        let dir = self.project_dir(project_id);
        fs::create_dir_all(&dir)?;
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("log.jsonl"))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
