//! End-to-end delivery: idea in, delivered project out.

use std::time::Duration;

use atelier::core::agent::AgentRole;
use atelier::core::project::Phase;
use atelier::persistence::Store;
use atelier::router::RouterEvent;
use atelier::runtime::RuntimeEvent;

use crate::fixtures::{script_happy_path, wait_until, TestHarness};

#[tokio::test]
async fn test_full_pipeline_reaches_delivered() {
    let mut h = TestHarness::new("a todo list web app");
    script_happy_path(&h.reasoner);
    h.runtime.start().await.unwrap();

    let gateway = h.runtime.gateway();
    let mut advanced = Vec::new();
    let delivered = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = h.events.recv().await {
            match event {
                RuntimeEvent::Router(RouterEvent::MilestonePending(id)) => {
                    gateway.approve(id, true).await.unwrap();
                }
                RuntimeEvent::Router(RouterEvent::PhaseAdvanced(phase)) => {
                    advanced.push(phase);
                }
                RuntimeEvent::Delivered => return true,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(delivered, "pipeline did not deliver");
    assert_eq!(h.runtime.phase().await, Phase::Delivered);
    // Phases advanced strictly forward
    assert_eq!(
        advanced,
        vec![
            Phase::Design,
            Phase::Implementation,
            Phase::Testing,
            Phase::Delivered
        ]
    );
    // Every scripted judgment was consumed
    assert_eq!(h.reasoner.remaining(), 0);

    // The observer persisted the delivered project
    let project_id = h.runtime.status().await.project_id;
    let loaded = h.store.load_state(project_id).await.unwrap();
    assert!(loaded.project.is_delivered());
    assert_eq!(loaded.ledger.len(), 4);
    assert!(h.store.log_len(project_id).await > 0);

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_discovery_advance_gated_on_pm_signoff() {
    let mut h = TestHarness::new("a todo list web app");
    // Pm produces requirements without signing off; the architect signs
    // first. The phase must hold until the pm countersigns.
    h.reasoner.push(
        AgentRole::Pm,
        atelier::reasoning::Judgment::accept("requirements drafted").with_artifact(
            atelier::reasoning::ArtifactDraft::new(
                atelier::core::artifact::ArtifactKind::Requirements,
                "requirements",
                "user stories",
            ),
        ),
    );
    h.reasoner.push(
        AgentRole::Architect,
        atelier::reasoning::Judgment::accept("design drafted")
            .with_artifact(atelier::reasoning::ArtifactDraft::new(
                atelier::core::artifact::ArtifactKind::Design,
                "design",
                "components",
            ))
            .signing_off(),
    );
    // Pm approves the design, which is its discovery signoff
    h.reasoner
        .push(AgentRole::Pm, atelier::reasoning::Judgment::accept("reviewed").signing_off());
    for role in [AgentRole::Developer, AgentRole::Tester] {
        h.reasoner
            .push(role, atelier::reasoning::Judgment::accept("noted"));
        h.reasoner
            .push(role, atelier::reasoning::Judgment::accept("noted"));
    }
    h.runtime.start().await.unwrap();

    let mut seen = Vec::new();
    let advanced = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = h.events.recv().await {
            if let RuntimeEvent::Router(event) = event {
                seen.push(event.clone());
                if matches!(event, RouterEvent::PhaseAdvanced(_)) {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(advanced, "phase never advanced");

    // The architect signed before the advance, but the advance waited
    // for the pm's signoff.
    let architect_at = seen
        .iter()
        .position(|e| *e == RouterEvent::SignoffRecorded(AgentRole::Architect))
        .unwrap();
    let pm_at = seen
        .iter()
        .position(|e| *e == RouterEvent::SignoffRecorded(AgentRole::Pm))
        .unwrap();
    let advance_at = seen
        .iter()
        .position(|e| matches!(e, RouterEvent::PhaseAdvanced(_)))
        .unwrap();
    assert!(architect_at < advance_at);
    assert!(pm_at < advance_at);
    assert!(
        pm_at > architect_at,
        "test setup should have the architect sign first"
    );

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_tracks_pipeline_progress() {
    let mut h = TestHarness::new("a todo list web app");
    script_happy_path(&h.reasoner);
    h.runtime.start().await.unwrap();

    let made_progress = wait_until(Duration::from_secs(5), || async {
        let snap = h.runtime.status().await;
        snap.metrics.done >= 4 && snap.phase >= Phase::Design
    })
    .await;
    assert!(made_progress);

    let snap = h.runtime.status().await;
    assert!(!snap.activity.is_empty());
    assert!(snap.revision > 0);

    h.runtime.shutdown().await.unwrap();
}
