//! Command handlers -- one module per subcommand

pub mod cleanup;
pub mod config;
pub mod run;

use std::path::Path;
use std::time::Duration;

use converge_core::config::{ControlPlaneConfig, ConvergeConfig};
use converge_harness::{KubectlClient, KubectlSessionExchange};

use crate::error::CliError;

/// Load the effective configuration for commands that talk to the control plane.
///
/// `--log-level` on the command line wins over file and environment values.
pub async fn load_config(path: &Path, log_level: Option<&str>) -> Result<ConvergeConfig, CliError> {
    let mut config = ConvergeConfig::load(path).await?;
    if let Some(level) = log_level {
        config.general.log_level = level.to_owned();
        config.validate()?;
    }
    Ok(config)
}

/// Build the CLI-backed control plane client from `[control_plane]`.
pub fn control_plane_client(config: &ControlPlaneConfig) -> KubectlClient {
    let mut client = KubectlClient::new(&config.cli_binary, command_timeout(config));
    if !config.kubeconfig.is_empty() {
        client = client.with_kubeconfig(&config.kubeconfig);
    }
    if !config.server_url.is_empty() {
        client = client.with_server_url(&config.server_url);
    }
    client
}

/// Build the login-based session exchange from `[control_plane]`.
pub fn session_exchange(config: &ControlPlaneConfig) -> KubectlSessionExchange {
    KubectlSessionExchange::new(
        &config.cli_binary,
        config.insecure_skip_tls_verify,
        command_timeout(config),
    )
}

fn command_timeout(config: &ControlPlaneConfig) -> Duration {
    Duration::from_secs(config.command_timeout_secs)
}
