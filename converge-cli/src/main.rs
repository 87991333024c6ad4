use clap::Parser;
use colored::Colorize;

use converge_cli::cli::{Cli, Commands};
use converge_cli::commands;
use converge_cli::error::CliError;
use converge_cli::output::OutputWriter;
use converge_cli::{logging, metrics_server};
use converge_core::config::{ConvergeConfig, GeneralConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);

    match cli.command {
        Commands::Config(args) => {
            // config 명령은 설정 파일이 깨져 있어도 결과를 보고해야 함
            let general = GeneralConfig {
                log_level: cli.log_level.unwrap_or_else(|| "warn".to_owned()),
                ..GeneralConfig::default()
            };
            bootstrap_logging(&general)?;
            commands::config::execute(args, &cli.config, &writer).await
        }
        Commands::Run(args) => {
            let config = commands::load_config(&cli.config, cli.log_level.as_deref()).await?;
            bootstrap(&config)?;
            commands::run::execute(args, config, &writer).await
        }
        Commands::Cleanup(args) => {
            let config = commands::load_config(&cli.config, cli.log_level.as_deref()).await?;
            bootstrap(&config)?;
            commands::cleanup::execute(args, config, &writer).await
        }
    }
}

fn bootstrap(config: &ConvergeConfig) -> Result<(), CliError> {
    bootstrap_logging(&config.general)?;
    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)
            .map_err(|e| CliError::Command(format!("{e:#}")))?;
    }
    tracing::debug!(
        scope = %config.scenario.scope,
        binary = %config.control_plane.cli_binary,
        "configuration loaded"
    );
    Ok(())
}

fn bootstrap_logging(general: &GeneralConfig) -> Result<(), CliError> {
    logging::init_tracing(general).map_err(|e| CliError::Command(format!("{e:#}")))
}
