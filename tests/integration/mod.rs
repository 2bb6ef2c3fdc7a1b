//! Integration test suite for the atelier runtime.
//!
//! These tests run the full runtime (actors, router, gateway, status
//! service, and store) against the deterministic scripted reasoner, so
//! no model calls are made and the suite is CI-safe.
//!
//! # Test Categories
//!
//! - `delivery_pipeline`: idea-to-delivered happy path and phase gating
//! - `feedback_loops`: bug reports reopening phases, milestone rejection
//! - `control_surface`: pause/resume, operator injection, stall
//!   reporting, shutdown persistence

mod fixtures;

mod delivery_pipeline;
mod feedback_loops;
mod control_surface;
