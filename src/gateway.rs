//! Human interaction gateway.
//!
//! Everything addressed to `Address::Human` lands here: clarification
//! questions from agents and milestone approval proposals from the
//! router. Requests stay pending until the operator answers; only the
//! originating flow is suspended, never the whole runtime.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::core::envelope::{Address, Envelope, EnvelopeId, EnvelopeKind};
use crate::core::project::Project;
use crate::error::{Error, Result};
use crate::router::{Router, MILESTONE_MARKER};
use crate::{alog, alog_debug};

/// A request waiting on the operator.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub envelope: Envelope,
    pub is_milestone: bool,
}

pub struct Gateway {
    router: Arc<Router>,
    project: Arc<RwLock<Project>>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    pending: Mutex<HashMap<EnvelopeId, PendingRequest>>,
}

fn is_milestone(envelope: &Envelope) -> bool {
    envelope
        .payload
        .get(MILESTONE_MARKER)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

impl Gateway {
    pub fn new(
        router: Arc<Router>,
        project: Arc<RwLock<Project>>,
        rx: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            router,
            project,
            rx: Mutex::new(rx),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Drain newly arrived envelopes into the pending set.
    async fn absorb(&self) {
        let mut rx = self.rx.lock().await;
        let mut pending = self.pending.lock().await;
        while let Ok(envelope) = rx.try_recv() {
            alog_debug!("Gateway received {}", envelope.summary());
            let milestone = is_milestone(&envelope);
            pending.insert(
                envelope.id,
                PendingRequest {
                    envelope,
                    is_milestone: milestone,
                },
            );
        }
    }

    /// All open requests, oldest first.
    pub async fn pending(&self) -> Vec<PendingRequest> {
        self.absorb().await;
        let pending = self.pending.lock().await;
        let mut requests: Vec<_> = pending.values().cloned().collect();
        requests.sort_by_key(|r| r.envelope.created_at);
        requests
    }

    pub async fn pending_count(&self) -> usize {
        self.absorb().await;
        self.pending.lock().await.len()
    }

    async fn take(&self, request_id: EnvelopeId) -> Result<PendingRequest> {
        self.absorb().await;
        self.pending
            .lock()
            .await
            .remove(&request_id)
            .ok_or(Error::RequestNotFound(request_id.0))
    }

    /// Answer a clarification. The reply is routed back to the agent
    /// that asked, threaded onto its question.
    pub async fn answer(&self, request_id: EnvelopeId, text: impl Into<String>) -> Result<()> {
        let request = self.take(request_id).await?;
        if request.is_milestone {
            // Put it back; milestones go through approve().
            self.pending.lock().await.insert(request_id, request);
            return Err(Error::Invalid(
                "milestone approvals require approve()".to_string(),
            ));
        }
        if request.envelope.kind != EnvelopeKind::Clarification {
            return Err(Error::Invalid(format!(
                "cannot answer a {} envelope",
                request.envelope.kind
            )));
        }

        let reply = Envelope::response_to(&request.envelope, Address::Human, text.into());
        alog!("Clarification {} answered", request_id.short());
        self.project.write().await.clear_human_request(&request_id);
        self.router.deliver(reply).await
    }

    /// Resolve a milestone approval. `true` releases the held terminal
    /// transition; `false` routes a rejection back into the phase.
    pub async fn approve(&self, request_id: EnvelopeId, approved: bool) -> Result<()> {
        let request = self.take(request_id).await?;
        if !request.is_milestone {
            self.pending.lock().await.insert(request_id, request);
            return Err(Error::Invalid(
                "not a milestone approval request".to_string(),
            ));
        }

        self.project.write().await.clear_human_request(&request_id);
        if approved {
            alog!("Milestone {} approved", request_id.short());
            self.router.approve_milestone().await?;
        } else {
            alog!("Milestone {} rejected", request_id.short());
            self.router
                .reject_milestone(&request.envelope, "delivery rejected by operator")
                .await?;
        }
        Ok(())
    }
}
