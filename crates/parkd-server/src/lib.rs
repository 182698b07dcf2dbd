//! # parkd-server
//!
//! The runtime half of parkd: it owns the persisted state, talks to the
//! machine through a [`SystemAdapter`](adapter::SystemAdapter), and turns the
//! state into a live nginx configuration.
//!
//! ## Entry Points
//!
//! *   **Workflows**: [`engine::Engine`]
//! *   **Configuration**: [`config_loader::ConfigLoader`]
//! *   **Proxy document**: [`synth::Synthesizer`]

// =========================================================================
//  Strict Lints: Safety, Hygiene, and Documentation
// =========================================================================

// 1. Logic & Safety
#![warn(clippy::await_holding_lock)] // Prevent Async Deadlocks (Critical)
#![warn(clippy::unwrap_used)] // Force error propagation (no panics)
#![warn(clippy::expect_used)] // Force error propagation
#![warn(clippy::wildcard_enum_match_arm)] // Force explicit enum matching
#![warn(clippy::redundant_pattern_matching)] // Catch redundant matches
#![warn(clippy::match_wildcard_for_single_variants)] // Catch `_ =>` when only one variant remains
#![warn(clippy::must_use_candidate)] // Suggest `#[must_use]` for pure functions
#![warn(clippy::unused_async)] // Catch async functions that don't await

// 2. Observability
#![warn(clippy::print_stdout)] // Ban println! (Use tracing::info!)
#![warn(clippy::print_stderr)] // Ban eprintln! (Use tracing::error!)

// 3. Import Hygiene
#![warn(clippy::wildcard_imports)] // Ban `use crate::*` (Explicit imports only)

// 4. Documentation
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::let_underscore_must_use)]
#![allow(clippy::uninlined_format_args)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod adapter;
pub mod certs;
pub mod config_loader;
pub mod engine;
pub mod logging;
pub mod store;
pub mod synth;

pub use engine::{Engine, Report, WorkflowError};
