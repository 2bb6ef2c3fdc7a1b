//! atelier, a multi-agent delivery runtime.
//!
//! Four collaborating role agents (pm, architect, developer, tester)
//! carry a project idea through discovery, design, implementation, and
//! testing to delivery. Agents exchange immutable envelopes through
//! per-role priority inboxes; a router applies the envelope kind's
//! project effects (bug reports reopen phases by revoking signoffs,
//! signoffs advance them); a runtime manager exposes the operator
//! control surface (pause/resume/inject/status/shutdown).
//!
//! Reasoning and durable storage are ports: see [`reasoning::Reasoner`]
//! and [`persistence::Store`].

pub mod actor;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod inbox;
pub mod log;
pub mod persistence;
pub mod reasoning;
pub mod router;
pub mod runtime;
pub mod status;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::{Runtime, RuntimeEvent};
