//! Simulation Rerun Server library.
//!
//! Core functionality for the rerun orchestration server: the job registry
//! and state machine, the stage-sequencing job driver, verdict resolution,
//! and the HTTP API surface.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod services;
