//! Test fixtures for integration tests.
//!
//! Provides a pre-wired runtime harness around the scripted reasoner
//! and the in-memory store, plus the judgment scripts that drive a
//! complete delivery pipeline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use atelier::config::Config;
use atelier::core::agent::AgentRole;
use atelier::core::artifact::ArtifactKind;
use atelier::persistence::MemoryStore;
use atelier::reasoning::{ArtifactDraft, Judgment, ScriptedReasoner};
use atelier::runtime::{Runtime, RuntimeEvent};
use tokio::sync::mpsc;

/// Config with short timing so tests run fast.
pub fn quick_config() -> Config {
    Config {
        wip_limit: 1,
        retry_limit: 3,
        stall_threshold_secs: 1,
        shutdown_grace_secs: 2,
        activity_tail: 100,
    }
}

pub struct TestHarness {
    pub runtime: Runtime,
    pub reasoner: Arc<ScriptedReasoner>,
    pub store: Arc<MemoryStore>,
    pub events: mpsc::UnboundedReceiver<RuntimeEvent>,
}

impl TestHarness {
    pub fn new(idea: &str) -> Self {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let store = Arc::new(MemoryStore::new());
        let mut runtime = Runtime::new(idea, quick_config(), reasoner.clone(), store.clone());
        let events = runtime
            .take_events()
            .unwrap_or_else(|| panic!("event stream already taken"));
        Self {
            runtime,
            reasoner,
            store,
            events,
        }
    }
}

/// Poll `cond` until it holds or the timeout elapses. Returns whether
/// the condition was observed.
pub async fn wait_until<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn reviewed() -> Judgment {
    Judgment::accept("reviewed").signing_off()
}

fn noted() -> Judgment {
    Judgment::accept("noted")
}

/// Queue the judgments that carry a project from kickoff to the
/// delivery milestone with no detours.
///
/// Flow: the pm turns the kickoff into a requirements artifact and
/// signs off; each downstream role reacts to the upstream artifact
/// notice by producing its own artifact; reviewers countersign the
/// stage they gate.
pub fn script_happy_path(reasoner: &ScriptedReasoner) {
    // Pm: kickoff, design notice, code notice, report notice
    reasoner.push(
        AgentRole::Pm,
        Judgment::accept("requirements drafted")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Requirements,
                "requirements",
                "user stories and acceptance criteria",
            ))
            .signing_off(),
    );
    reasoner.push(AgentRole::Pm, reviewed());
    reasoner.push(AgentRole::Pm, noted());
    reasoner.push(AgentRole::Pm, reviewed());

    // Architect: requirements notice, code notice, report notice
    reasoner.push(
        AgentRole::Architect,
        Judgment::accept("design drafted")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Design,
                "design",
                "components and interfaces",
            ))
            .signing_off(),
    );
    reasoner.push(AgentRole::Architect, reviewed());
    reasoner.push(AgentRole::Architect, reviewed());

    // Developer: requirements notice, design notice, report notice
    reasoner.push(AgentRole::Developer, noted());
    reasoner.push(
        AgentRole::Developer,
        Judgment::accept("implementation complete")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Code,
                "code",
                "implementation per design",
            ))
            .signing_off(),
    );
    reasoner.push(AgentRole::Developer, reviewed());

    // Tester: requirements notice, design notice, code notice
    reasoner.push(AgentRole::Tester, noted());
    reasoner.push(AgentRole::Tester, noted());
    reasoner.push(
        AgentRole::Tester,
        Judgment::accept("all checks pass")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::TestReport,
                "test-report",
                "all scenarios pass",
            ))
            .signing_off(),
    );
}

/// Like `script_happy_path`, but the tester rejects the first code
/// artifact (filing a bug report) before accepting the fix.
pub fn script_with_bug_loop(reasoner: &ScriptedReasoner) {
    // Pm: kickoff, design, code v1, fixed code, report
    reasoner.push(
        AgentRole::Pm,
        Judgment::accept("requirements drafted")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Requirements,
                "requirements",
                "user stories",
            ))
            .signing_off(),
    );
    reasoner.push(AgentRole::Pm, reviewed());
    reasoner.push(AgentRole::Pm, noted());
    reasoner.push(AgentRole::Pm, noted());
    reasoner.push(AgentRole::Pm, reviewed());

    // Architect: requirements, code v1, fixed code, report
    reasoner.push(
        AgentRole::Architect,
        Judgment::accept("design drafted")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Design,
                "design",
                "components",
            ))
            .signing_off(),
    );
    reasoner.push(AgentRole::Architect, reviewed());
    reasoner.push(AgentRole::Architect, reviewed());
    reasoner.push(AgentRole::Architect, reviewed());

    // Developer: requirements, design, bug report, report
    reasoner.push(AgentRole::Developer, noted());
    reasoner.push(
        AgentRole::Developer,
        Judgment::accept("implementation complete")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Code,
                "code",
                "implementation, first attempt",
            ))
            .signing_off(),
    );
    reasoner.push(
        AgentRole::Developer,
        Judgment::accept("defect fixed")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::Code,
                "code-fix",
                "implementation with the crash fixed",
            ))
            .signing_off(),
    );
    reasoner.push(AgentRole::Developer, reviewed());

    // Tester: requirements, design, code v1 (reject), then the fix
    // notice and the developer's reply in whichever order they land
    reasoner.push(AgentRole::Tester, noted());
    reasoner.push(AgentRole::Tester, noted());
    reasoner.push(AgentRole::Tester, Judgment::reject("crashes on empty input"));
    reasoner.push(AgentRole::Tester, noted());
    reasoner.push(
        AgentRole::Tester,
        Judgment::accept("verified the fix")
            .with_artifact(ArtifactDraft::new(
                ArtifactKind::TestReport,
                "test-report",
                "all scenarios pass after fix",
            ))
            .signing_off(),
    );
}
