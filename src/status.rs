//! Point-in-time status snapshots for presentation layers.
//!
//! A snapshot is taken under the project read lock so the phase,
//! signoff set, and revision it shows existed together at one moment.
//! Agent rows are collected inside the same barrier.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::agent::{AgentRole, AgentState, AgentStatus};
use crate::core::project::{Phase, Project, ProjectId};
use crate::router::Router;

/// One agent's line in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRow {
    pub role: AgentRole,
    pub status: AgentStatus,
    pub current_work: Option<String>,
    pub inbox_depth: usize,
    pub wip_count: usize,
    pub completed: usize,
    pub signed_off: bool,
    pub last_progress: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    /// Envelopes completed across all agents.
    pub done: usize,
    /// Envelopes still queued across all inboxes.
    pub pending: usize,
    /// Open bug-report blockers.
    pub blockers: usize,
    /// Recorded signoffs over those required for the current phase.
    pub signoff_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub project_id: ProjectId,
    pub idea: String,
    pub phase: Phase,
    /// Project revision this snapshot observed.
    pub revision: u64,
    pub agents: Vec<AgentRow>,
    pub activity: Vec<String>,
    pub pending_human: usize,
    pub metrics: Metrics,
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Plain-text rendering for the demo binary and logs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "project {} [{}] rev {}\n",
            self.project_id.short(),
            self.phase,
            self.revision
        ));
        for row in &self.agents {
            out.push_str(&format!(
                "  {:<10} {:<8} inbox={} wip={} done={}{}{}\n",
                row.role.to_string(),
                row.status.to_string(),
                row.inbox_depth,
                row.wip_count,
                row.completed,
                if row.signed_off { " [signed]" } else { "" },
                row.current_work
                    .as_deref()
                    .map(|w| format!(" :: {}", w))
                    .unwrap_or_default(),
            ));
        }
        out.push_str(&format!(
            "  done={} pending={} blockers={} signoffs={:.0}%\n",
            self.metrics.done,
            self.metrics.pending,
            self.metrics.blockers,
            self.metrics.signoff_ratio * 100.0
        ));
        out
    }
}

pub struct StatusService {
    project: Arc<RwLock<Project>>,
    router: Arc<Router>,
    agents: HashMap<AgentRole, Arc<RwLock<AgentState>>>,
}

impl StatusService {
    pub fn new(
        project: Arc<RwLock<Project>>,
        router: Arc<Router>,
        agents: HashMap<AgentRole, Arc<RwLock<AgentState>>>,
    ) -> Self {
        Self {
            project,
            router,
            agents,
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        // Activity first; it is only a display tail and not part of the
        // consistency barrier.
        let activity = self
            .router
            .activity_tail()
            .await
            .into_iter()
            .map(|e| e.text)
            .collect();

        let project = self.project.read().await;
        let mut rows = Vec::with_capacity(AgentRole::ALL.len());
        let mut done = 0;
        let mut pending = 0;
        for role in AgentRole::ALL {
            let depth = self.router.inbox_depth(role);
            pending += depth;
            let row = match self.agents.get(&role) {
                Some(state) => {
                    let state = state.read().await;
                    done += state.completed_count;
                    AgentRow {
                        role,
                        status: state.status,
                        current_work: state.current_work.clone(),
                        inbox_depth: depth,
                        wip_count: state.wip_count,
                        completed: state.completed_count,
                        signed_off: project.has_signoff(role),
                        last_progress: state.last_progress,
                    }
                }
                None => AgentRow {
                    role,
                    status: AgentStatus::Idle,
                    current_work: None,
                    inbox_depth: depth,
                    wip_count: 0,
                    completed: 0,
                    signed_off: project.has_signoff(role),
                    last_progress: Utc::now(),
                },
            };
            rows.push(row);
        }

        let required = project.phase().required_roles();
        let signoff_ratio = if required.is_empty() {
            1.0
        } else {
            let signed = required
                .iter()
                .filter(|r| project.has_signoff(**r))
                .count();
            signed as f64 / required.len() as f64
        };

        StatusSnapshot {
            project_id: project.id,
            idea: project.idea_text.clone(),
            phase: project.phase(),
            revision: project.revision(),
            agents: rows,
            activity,
            pending_human: project.pending_human().len(),
            metrics: Metrics {
                done,
                pending,
                blockers: project.blockers().len(),
                signoff_ratio,
            },
            taken_at: Utc::now(),
        }
    }
}
