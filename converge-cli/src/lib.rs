//! Converge CLI library.
//!
//! Exposes the command handlers for integration testing.
//! In production, `converge` is used as a binary (main.rs).

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod metrics_server;
pub mod output;
