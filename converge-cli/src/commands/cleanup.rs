//! `converge cleanup` command handler

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use converge_core::config::ConvergeConfig;
use converge_harness::{ConvergencePoller, PrincipalLifecycle, ScenarioConfig};

use crate::cli::CleanupArgs;
use crate::commands::control_plane_client;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `cleanup` command.
///
/// Removes grants, the credential secret and the scope of the configured
/// principal, then waits until the scope is gone. Safe to run repeatedly.
pub async fn execute(
    args: CleanupArgs,
    mut config: ConvergeConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    if let Some(scope) = args.scope {
        config.scenario.scope = scope;
    }
    let scenario = ScenarioConfig::from_core(&config)?;
    let principal = scenario.principal();

    let lifecycle = PrincipalLifecycle::new(
        Arc::new(control_plane_client(&config.control_plane)),
        ConvergencePoller::new(CancellationToken::new()),
        scenario.cleanup,
    );

    info!(scope = %scenario.scope, "cleaning up scenario resources");
    let start = Instant::now();
    lifecycle.deprovision(&principal).await?;

    let report = CleanupReport {
        scope: scenario.scope.clone(),
        username: principal.username().to_owned(),
        grants: principal.grants().len(),
        elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    writer.render(&report)?;
    Ok(())
}

/// Cleanup result.
#[derive(Serialize)]
pub struct CleanupReport {
    /// Deleted scope
    pub scope: String,
    /// Deprovisioned principal
    pub username: String,
    /// Number of grants revoked
    pub grants: usize,
    /// Time until the scope was confirmed absent
    pub elapsed_ms: u64,
}

impl Render for CleanupReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Cleanup {}: scope {} removed, user {} ({} grant(s)) revoked in {}ms",
            "OK".green().bold(),
            self.scope.bold(),
            self.username,
            self.grants,
            self.elapsed_ms
        )
    }
}
