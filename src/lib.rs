//! Command-line client for bridging funds between the Derive app-chain and
//! the chains it connects to.
//!
//! The bridge itself lives in `derive-bridge`; this crate loads
//! configuration, sets up logging and telemetry, and runs commands.

pub mod cli;
pub mod config;
mod telemetry;

pub use config::{Ctx, LogLevel, setup_tracing};
pub use telemetry::{TelemetryCtx, TelemetryError, TelemetryGuard};
