//! `converge run` command handler

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use converge_core::config::ConvergeConfig;
use converge_harness::{ScenarioConfig, ScenarioOrchestratorBuilder, ScenarioReport};

use crate::cli::RunArgs;
use crate::commands::{control_plane_client, session_exchange};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `run` command.
///
/// Ctrl-C cancels the running stage; cleanup still runs before the command returns.
pub async fn execute(
    args: RunArgs,
    mut config: ConvergeConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    apply_overrides(&mut config, &args);
    let scenario = ScenarioConfig::from_core(&config)?;

    let client = Arc::new(control_plane_client(&config.control_plane));
    let exchange = Arc::new(session_exchange(&config.control_plane));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scenario");
            interrupt.cancel();
        }
    });

    info!(
        scope = %scenario.scope,
        stages = scenario.verify.len(),
        binary = %config.control_plane.cli_binary,
        "starting scenario"
    );

    let report = ScenarioOrchestratorBuilder::new()
        .config(scenario)
        .client(client)
        .session_exchange(exchange)
        .cancel_token(cancel)
        .build()?
        .run()
        .await?;

    writer.render(&report)?;
    Ok(())
}

fn apply_overrides(config: &mut ConvergeConfig, args: &RunArgs) {
    if let Some(scope) = &args.scope {
        config.scenario.scope = scope.clone();
    }
    if let Some(manifest) = &args.manifest {
        config.scenario.manifest_path = manifest.display().to_string();
    }
}

impl Render for ScenarioReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Scenario {} (scope: {}, run: {})",
            "PASSED".green().bold(),
            self.scope.bold(),
            self.run_id
        )?;
        writeln!(w)?;
        writeln!(w, "{:<28} {:>8} {:>12}", "Stage", "Attempts", "Elapsed")?;
        writeln!(w, "{}", "-".repeat(50))?;
        for stage in &self.stages {
            writeln!(
                w,
                "{:<28} {:>8} {:>10}ms",
                stage.name, stage.attempts, stage.elapsed_ms
            )?;
        }
        writeln!(w)?;
        writeln!(w, "Total: {}ms", self.elapsed_ms)?;
        Ok(())
    }
}
