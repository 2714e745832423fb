//! Seedbox — ephemeral sandbox fan-out orchestrator.
//!
//! Runs many independent generation jobs in parallel, each inside its own
//! short-lived isolated execution unit, tracks each job through a lifecycle,
//! streams progress to callers, exports artifacts before the unit is
//! destroyed, and falls back to local sequential execution when no remote
//! provisioning is available.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod application;
pub mod domain;
pub mod infra;
