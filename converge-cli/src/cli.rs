//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Converge -- verify that an eventually-consistent control plane converges.
///
/// Use `converge <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "converge", version, about, long_about = None)]
pub struct Cli {
    /// Path to the converge.toml configuration file.
    #[arg(short, long, default_value = "converge.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full scenario: provision, trigger, verify, clean up.
    Run(RunArgs),

    /// Remove the scenario principal and scope left by a previous run.
    Cleanup(CleanupArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- run ----

/// Run the configured scenario once.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the scenario scope (namespace) name.
    #[arg(long)]
    pub scope: Option<String>,

    /// Override the manifest applied at the trigger step.
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

// ---- cleanup ----

/// Deprovision the configured principal and delete its scope.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Override the scenario scope (namespace) name.
    #[arg(long)]
    pub scope: Option<String>,
}

// ---- config ----

/// Manage converge configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, control_plane, scenario, polling, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}
