//! Prometheus metrics HTTP listener.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! so that long scenario runs can be scraped while they poll.
//!
//! # Usage
//!
//! ```ignore
//! if config.metrics.enabled {
//!     install_metrics_recorder(&config.metrics)?;
//! }
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use converge_core::config::MetricsConfig;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the global metrics recorder and start the HTTP listener.
///
/// This function should be called once per process.
///
/// # Errors
///
/// - Invalid listen address
/// - Socket binding fails
/// - Global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    converge_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr_parses() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
        };
        assert_eq!(listen_addr(&config).unwrap().port(), 9464);
    }

    #[test]
    fn test_listen_addr_rejects_hostname() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "not an address".to_owned(),
            port: 9464,
        };
        assert!(listen_addr(&config).is_err());
    }
}
