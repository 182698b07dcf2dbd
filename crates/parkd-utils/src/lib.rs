//! Side-effecting helpers for parkd.

/// Certificate authority and bundle issuing.
pub mod cert;
/// Project requirement detection.
pub mod detect;
/// Parked directory scanning and site resolution.
pub mod discovery;
/// Bounded external command execution.
pub mod process;
