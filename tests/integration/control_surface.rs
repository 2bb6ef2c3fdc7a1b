//! Operator controls: pause/resume, clarifications, guidance
//! injection, stall reporting, and mid-flight shutdown.

use std::time::Duration;

use atelier::core::agent::{AgentRole, AgentStatus};
use atelier::core::artifact::ArtifactKind;
use atelier::persistence::Store;
use atelier::reasoning::{ArtifactDraft, Judgment};
use atelier::router::RouterEvent;
use atelier::runtime::RuntimeEvent;

use crate::fixtures::{script_happy_path, wait_until, TestHarness};

#[tokio::test]
async fn test_pause_holds_work_until_resume() {
    let mut h = TestHarness::new("a todo list web app");
    script_happy_path(&h.reasoner);
    h.runtime.pause();
    h.runtime.start().await.unwrap();

    // Paused before start: the kickoff stays queued
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.runtime.status().await.metrics.done, 0);
    assert!(h.runtime.is_paused());

    h.runtime.resume();
    let gateway = h.runtime.gateway();
    let delivered = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = h.events.recv().await {
            match event {
                RuntimeEvent::Router(RouterEvent::MilestonePending(id)) => {
                    gateway.approve(id, true).await.unwrap();
                }
                RuntimeEvent::Delivered => return true,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(delivered, "resumed pipeline did not deliver");

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_clarification_answer_resumes_the_asking_flow() {
    let mut h = TestHarness::new("a todo list web app");
    // The pm cannot start without knowing the platform; once answered,
    // it drafts requirements and signs off, advancing discovery.
    h.reasoner
        .push(AgentRole::Pm, Judgment::escalate("web or mobile?"));
    h.reasoner.push(
        AgentRole::Pm,
        Judgment::accept("requirements drafted")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Requirements,
                "requirements",
                "web app user stories",
            ))
            .signing_off(),
    );
    for role in [AgentRole::Architect, AgentRole::Developer, AgentRole::Tester] {
        h.reasoner.push(role, Judgment::accept("noted"));
    }
    h.runtime.start().await.unwrap();

    let gateway = h.runtime.gateway();
    let asked = wait_until(Duration::from_secs(5), || async {
        gateway.pending_count().await == 1
    })
    .await;
    assert!(asked, "clarification never reached the gateway");

    let pending = gateway.pending().await;
    assert!(!pending[0].is_milestone);
    assert_eq!(pending[0].envelope.subject, "web or mobile?");
    // The question is visible on the project while open
    assert_eq!(h.runtime.status().await.pending_human, 1);

    gateway.answer(pending[0].envelope.id, "web").await.unwrap();

    let advanced = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = h.events.recv().await {
            if let RuntimeEvent::Router(RouterEvent::PhaseAdvanced(_)) = event {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(advanced, "answer did not unblock the pm");
    assert_eq!(h.runtime.status().await.pending_human, 0);

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stall_is_reported_while_others_serve_guidance() {
    let mut h = TestHarness::new("a todo list web app");
    // Nothing scripted for the pm: the kickoff blocks it. The other
    // roles only see the injected guidance.
    for role in [AgentRole::Architect, AgentRole::Developer, AgentRole::Tester] {
        h.reasoner.push(role, Judgment::accept("noted"));
    }
    h.runtime.start().await.unwrap();
    h.runtime.inject("keep the scope minimal").await.unwrap();

    let stalled = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = h.events.recv().await {
            if let RuntimeEvent::Stalled { role, .. } = event {
                return Some(role);
            }
        }
        None
    })
    .await
    .unwrap_or(None);
    assert_eq!(stalled, Some(AgentRole::Pm));

    let snap = h.runtime.status().await;
    for row in &snap.agents {
        if row.role == AgentRole::Pm {
            assert_eq!(row.status, AgentStatus::Blocked);
        } else {
            assert_eq!(row.completed, 1, "role {} did not keep working", row.role);
        }
    }

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_persists_midflight_progress() {
    let mut h = TestHarness::new("a todo list web app");
    h.reasoner.push(
        AgentRole::Pm,
        Judgment::accept("requirements drafted").with_artifact(ArtifactDraft::new(
            ArtifactKind::Requirements,
            "requirements",
            "user stories",
        )),
    );
    for role in [AgentRole::Architect, AgentRole::Developer, AgentRole::Tester] {
        h.reasoner.push(role, Judgment::accept("noted"));
    }
    h.runtime.start().await.unwrap();

    let drafted = wait_until(Duration::from_secs(5), || async {
        h.runtime.status().await.metrics.done >= 1
    })
    .await;
    assert!(drafted);

    let project_id = h.runtime.status().await.project_id;
    h.runtime.shutdown().await.unwrap();

    // The half-finished project survived the stop
    let loaded = h.store.load_state(project_id).await.unwrap();
    assert!(!loaded.project.is_delivered());
    assert_eq!(loaded.ledger.len(), 1);
    assert!(h.store.log_len(project_id).await >= 1);
}
