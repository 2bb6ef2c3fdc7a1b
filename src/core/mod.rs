//! Domain model: agents, envelopes, artifacts, and project lifecycle.

pub mod agent;
pub mod artifact;
pub mod envelope;
pub mod project;
