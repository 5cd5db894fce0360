//! Workflow orchestration.
//!
//! - `runner` walks the manifest: execute, exists, revoke
//! - `renewal` refreshes and first-time authorizes OAuth credentials
//! - `retry` names and replays delayed reruns
//! - `state` tracks the run phase and per-step telemetry

pub mod renewal;
pub mod retry;
pub mod runner;
pub mod state;
