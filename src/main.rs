//! Demo binary: drives one scripted delivery pipeline end to end.
//!
//! A deterministic reasoner stands in for the model-backed one: the pm
//! drafts requirements, the architect designs, the developer codes, the
//! tester verifies, and each role signs off as its phase work lands.
//! The milestone approval is answered automatically so the run finishes
//! without an operator.

use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use atelier::core::agent::AgentRole;
use atelier::core::artifact::ArtifactKind;
use atelier::core::envelope::{Address, EnvelopeKind};
use atelier::persistence::FileStore;
use atelier::reasoning::{ArtifactDraft, Judgment, Reasoner, ReasoningContext};
use atelier::router::RouterEvent;
use atelier::{log, Config, Result, Runtime, RuntimeEvent};

#[derive(Parser)]
#[command(name = "atelier", about = "Multi-agent delivery runtime demo")]
struct Cli {
    /// The project idea to deliver.
    #[arg(default_value = "a todo list web app")]
    idea: String,

    /// Enable debug logging to ~/.atelier/atelier.log.
    #[arg(long)]
    debug: bool,

    /// Give up if the pipeline has not delivered after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

/// Deterministic stand-in for a model-backed reasoner. Decisions depend
/// only on who sent what kind of envelope.
struct PipelineReasoner;

#[async_trait]
impl Reasoner for PipelineReasoner {
    async fn generate(&self, ctx: ReasoningContext<'_>) -> Result<Judgment> {
        let env = ctx.envelope;
        match env.kind {
            EnvelopeKind::Request => {
                if ctx.role == AgentRole::Pm && env.from == Address::Human {
                    return Ok(Judgment::accept("requirements drafted")
                        .with_artifact(ArtifactDraft::new(
                            ArtifactKind::Requirements,
                            "requirements",
                            format!("Requirements for: {}", env.subject),
                        ))
                        .signing_off());
                }
                Ok(Judgment::accept("guidance noted"))
            }
            EnvelopeKind::Artifact => {
                let from = match env.from {
                    Address::Agent(role) => role,
                    _ => return Ok(Judgment::accept("noted")),
                };
                let upstream = env.artifact_refs.clone();
                Ok(match (from, ctx.role) {
                    (AgentRole::Pm, AgentRole::Architect) => Judgment::accept("design drafted")
                        .with_artifact(
                            ArtifactDraft::new(
                                ArtifactKind::Design,
                                "design",
                                "Component breakdown and interfaces",
                            )
                            .derived_from(upstream),
                        )
                        .signing_off(),
                    (AgentRole::Architect, AgentRole::Developer) => {
                        Judgment::accept("implementation complete")
                            .with_artifact(
                                ArtifactDraft::new(
                                    ArtifactKind::Code,
                                    "code",
                                    "// implementation per design",
                                )
                                .derived_from(upstream),
                            )
                            .signing_off()
                    }
                    (AgentRole::Developer, AgentRole::Tester) => {
                        Judgment::accept("all checks pass")
                            .with_artifact(
                                ArtifactDraft::new(
                                    ArtifactKind::TestReport,
                                    "test-report",
                                    "all scenarios pass",
                                )
                                .derived_from(upstream),
                            )
                            .signing_off()
                    }
                    // Reviewers approving a downstream stage's output.
                    (AgentRole::Architect, AgentRole::Pm)
                    | (AgentRole::Developer, AgentRole::Architect)
                    | (AgentRole::Tester, _) => Judgment::accept("reviewed").signing_off(),
                    _ => Judgment::accept("noted"),
                })
            }
            _ => Ok(Judgment::accept("noted")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_with_debug(cli.debug);

    let config = Config::load().unwrap_or_default();
    let store = Arc::new(FileStore::default_location()?);
    let mut runtime = Runtime::new(cli.idea.clone(), config, Arc::new(PipelineReasoner), store);
    let mut events = match runtime.take_events() {
        Some(events) => events,
        None => return Ok(()),
    };
    runtime.start().await?;
    println!("delivering: {}", cli.idea);

    let gateway = runtime.gateway();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let deadline = tokio::time::sleep(Duration::from_secs(cli.timeout));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                eprintln!("timed out before delivery");
                break;
            }
            _ = ticker.tick() => {
                print!("{}", runtime.status().await.render());
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    RuntimeEvent::Router(RouterEvent::MilestonePending(id)) => {
                        println!("milestone approval requested; approving");
                        gateway.approve(id, true).await?;
                    }
                    RuntimeEvent::Stalled { role, reason } => {
                        eprintln!("agent {} stalled: {}", role, reason);
                    }
                    RuntimeEvent::Delivered => {
                        println!("delivered");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    print!("{}", runtime.status().await.render());
    runtime.shutdown().await?;
    Ok(())
}
