//! Envelope: the immutable unit of work passed between agents.
//!
//! Envelopes are created once and never mutated. `causal_parent` links a
//! response or bug report back to the envelope that produced it, forming
//! a directed acyclic causal graph used for feedback-loop tracing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::agent::AgentRole;
use crate::core::artifact::ArtifactId;

/// Unique identifier for an envelope. Globally unique via UUID v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(pub Uuid);

impl EnvelopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery priority. Higher priorities are dequeued first; within a
/// priority tier delivery is FIFO.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    /// Operator intervention and system alerts.
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// What kind of message an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Asking another agent to do something.
    Request,
    /// Answering a previous request (includes counter-proposals).
    Response,
    /// Notice that an artifact was produced or revised.
    Artifact,
    /// A defect found in another agent's artifact. Reopens phases.
    BugReport,
    /// A question for the human operator.
    Clarification,
    /// An agent's approval that its work for the phase is complete.
    Signoff,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeKind::Request => write!(f, "request"),
            EnvelopeKind::Response => write!(f, "response"),
            EnvelopeKind::Artifact => write!(f, "artifact"),
            EnvelopeKind::BugReport => write!(f, "bug_report"),
            EnvelopeKind::Clarification => write!(f, "clarification"),
            EnvelopeKind::Signoff => write!(f, "signoff"),
        }
    }
}

/// Where an envelope can be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Address {
    Agent(AgentRole),
    /// The human operator, via the interaction gateway.
    Human,
    /// Every agent except the sender.
    Broadcast,
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Agent(role) => write!(f, "{}", role),
            Address::Human => write!(f, "human"),
            Address::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// An immutable unit of inter-agent communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub from: Address,
    pub to: Address,
    pub kind: EnvelopeKind,
    pub priority: Priority,
    pub subject: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Links back to the envelope that caused this one, if any.
    pub causal_parent: Option<EnvelopeId>,
    /// Artifacts this envelope refers to (bug target, signoff basis).
    pub artifact_refs: Vec<ArtifactId>,
}

impl Envelope {
    fn base(from: Address, to: Address, kind: EnvelopeKind, subject: impl Into<String>) -> Self {
        Self {
            id: EnvelopeId::new(),
            from,
            to,
            kind,
            priority: Priority::Medium,
            subject: subject.into(),
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
            causal_parent: None,
            artifact_refs: Vec::new(),
        }
    }

    /// A work request from one party to another.
    pub fn request(from: Address, to: Address, subject: impl Into<String>) -> Self {
        Self::base(from, to, EnvelopeKind::Request, subject)
    }

    /// A response threaded onto an earlier envelope. Inherits the
    /// parent's priority and answers back to its sender.
    pub fn response_to(parent: &Envelope, from: Address, subject: impl Into<String>) -> Self {
        let mut env = Self::base(from, parent.from, EnvelopeKind::Response, subject);
        env.priority = parent.priority;
        env.causal_parent = Some(parent.id);
        env
    }

    /// Notice that an artifact was produced or revised.
    pub fn artifact_notice(from: Address, to: Address, artifact: ArtifactId) -> Self {
        let mut env = Self::base(from, to, EnvelopeKind::Artifact, "artifact produced");
        env.artifact_refs.push(artifact);
        env
    }

    /// A bug report against an artifact. Delivered at high priority; the
    /// router re-targets it to the artifact's owner.
    pub fn bug_report(
        from: Address,
        to: Address,
        artifact: ArtifactId,
        subject: impl Into<String>,
    ) -> Self {
        let mut env = Self::base(from, to, EnvelopeKind::BugReport, subject);
        env.priority = Priority::High;
        env.artifact_refs.push(artifact);
        env
    }

    /// A question for the human operator, threaded onto the envelope the
    /// agent was working on.
    pub fn clarification(from: Address, question: impl Into<String>, parent: &Envelope) -> Self {
        let mut env = Self::base(from, Address::Human, EnvelopeKind::Clarification, question);
        env.priority = Priority::High;
        env.causal_parent = Some(parent.id);
        env
    }

    /// An agent's approval for the current phase, recording the artifacts
    /// the approval was judged against.
    pub fn signoff(from: AgentRole, basis: Vec<ArtifactId>) -> Self {
        let mut env = Self::base(
            Address::Agent(from),
            Address::Broadcast,
            EnvelopeKind::Signoff,
            "signoff",
        );
        env.artifact_refs = basis;
        env
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_parent(mut self, parent: EnvelopeId) -> Self {
        self.causal_parent = Some(parent);
        self
    }

    /// One-line summary for the activity log.
    pub fn summary(&self) -> String {
        format!(
            "{} -> {} [{}] {}",
            self.from, self.to, self.kind, self.subject
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm() -> Address {
        Address::Agent(AgentRole::Pm)
    }

    fn architect() -> Address {
        Address::Agent(AgentRole::Architect)
    }

    // EnvelopeId tests

    #[test]
    fn test_envelope_id_unique() {
        assert_ne!(EnvelopeId::new(), EnvelopeId::new());
    }

    #[test]
    fn test_envelope_id_short() {
        assert_eq!(EnvelopeId::new().short().len(), 8);
    }

    #[test]
    fn test_envelope_id_serialization() {
        let id = EnvelopeId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: EnvelopeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    // Priority tests

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_serialization_format() {
        assert_eq!(
            serde_json::to_string(&Priority::Critical).unwrap(),
            r#""critical""#
        );
    }

    // EnvelopeKind tests

    #[test]
    fn test_kind_display() {
        assert_eq!(format!("{}", EnvelopeKind::BugReport), "bug_report");
        assert_eq!(format!("{}", EnvelopeKind::Signoff), "signoff");
    }

    #[test]
    fn test_kind_serialization_format() {
        assert_eq!(
            serde_json::to_string(&EnvelopeKind::BugReport).unwrap(),
            r#""bug_report""#
        );
    }

    // Address tests

    #[test]
    fn test_address_display() {
        assert_eq!(format!("{}", pm()), "pm");
        assert_eq!(format!("{}", Address::Human), "human");
        assert_eq!(format!("{}", Address::Broadcast), "broadcast");
    }

    // Constructor tests

    #[test]
    fn test_request_defaults() {
        let env = Envelope::request(pm(), architect(), "design the schema");
        assert_eq!(env.kind, EnvelopeKind::Request);
        assert_eq!(env.priority, Priority::Medium);
        assert!(env.causal_parent.is_none());
        assert!(env.artifact_refs.is_empty());
    }

    #[test]
    fn test_response_threads_to_parent() {
        let req = Envelope::request(pm(), architect(), "design").with_priority(Priority::High);
        let resp = Envelope::response_to(&req, architect(), "done");

        assert_eq!(resp.kind, EnvelopeKind::Response);
        assert_eq!(resp.to, pm());
        assert_eq!(resp.priority, Priority::High);
        assert_eq!(resp.causal_parent, Some(req.id));
    }

    #[test]
    fn test_bug_report_is_high_priority() {
        let artifact = ArtifactId::new();
        let env = Envelope::bug_report(
            Address::Agent(AgentRole::Tester),
            Address::Agent(AgentRole::Developer),
            artifact,
            "login crashes",
        );
        assert_eq!(env.kind, EnvelopeKind::BugReport);
        assert_eq!(env.priority, Priority::High);
        assert_eq!(env.artifact_refs, vec![artifact]);
    }

    #[test]
    fn test_clarification_addresses_human() {
        let parent = Envelope::request(pm(), architect(), "design");
        let env = Envelope::clarification(architect(), "which database?", &parent);
        assert_eq!(env.to, Address::Human);
        assert_eq!(env.kind, EnvelopeKind::Clarification);
        assert_eq!(env.causal_parent, Some(parent.id));
    }

    #[test]
    fn test_signoff_records_basis() {
        let a = ArtifactId::new();
        let b = ArtifactId::new();
        let env = Envelope::signoff(AgentRole::Architect, vec![a, b]);
        assert_eq!(env.kind, EnvelopeKind::Signoff);
        assert_eq!(env.artifact_refs, vec![a, b]);
    }

    #[test]
    fn test_causal_chain() {
        let req = Envelope::request(pm(), architect(), "design");
        let resp = Envelope::response_to(&req, architect(), "proposal");
        let follow = Envelope::response_to(&resp, pm(), "approved");

        // Chain terminates at the root request
        assert_eq!(follow.causal_parent, Some(resp.id));
        assert_eq!(resp.causal_parent, Some(req.id));
        assert_eq!(req.causal_parent, None);
    }

    #[test]
    fn test_summary_format() {
        let env = Envelope::request(pm(), architect(), "design the schema");
        assert_eq!(env.summary(), "pm -> architect [request] design the schema");
    }

    #[test]
    fn test_envelope_serialization_roundtrip() {
        let env = Envelope::request(pm(), Address::Broadcast, "kickoff")
            .with_payload(serde_json::json!({"idea": "todo app"}));
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, env.id);
        assert_eq!(parsed.subject, "kickoff");
        assert_eq!(parsed.payload["idea"], "todo app");
    }
}
