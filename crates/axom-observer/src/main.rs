//! Axom Observer — sidecar AI-traffic observability proxy.
//!
//! Transparently intercepts HTTP and HTTPS traffic from a co-located AI
//! agent, reconstructs each AI API call into a signal (provider, model,
//! prompt preview, token usage, latency, outcome), classifies it into a
//! business task, and ships signal batches to the ingest backend.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use axom_observer::config::{mask_secret, ObserverConfig};
use axom_observer::Observer;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Sidecar proxy that observes AI API traffic and exports billing signals.
#[derive(Parser)]
#[command(name = "axom-observer", version, about, long_about = None)]
struct Cli {
    /// Customer identifier.
    #[arg(long, env = "CUSTOMER_ID", default_value = "")]
    customer_id: String,

    /// AI agent identifier.
    #[arg(long, env = "AGENT_ID", default_value = "")]
    agent_id: String,

    /// Client ID for authentication (accepted, not used by the proxy core).
    #[arg(long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret for authentication (accepted, not used by the proxy core).
    #[arg(long, env = "CLIENT_SECRET")]
    client_secret: Option<String>,

    /// Agent secret, sent as the bearer token to the ingest backend.
    #[arg(long, env = "AGENT_SECRET", default_value = "")]
    agent_secret: String,

    /// Ingest URL for signal batches.
    #[arg(
        long,
        env = "BACKEND_URL",
        default_value = "http://localhost:8080/api/v1/signals"
    )]
    backend_url: String,

    /// HTTP proxy port.
    #[arg(long, default_value_t = 8888)]
    http_port: u16,

    /// HTTPS proxy port.
    #[arg(long, default_value_t = 8443)]
    https_port: u16,

    /// Exporter batch size.
    #[arg(long, env = "AXOM_BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    /// Exporter flush interval in seconds.
    #[arg(long, env = "AXOM_FLUSH_INTERVAL", default_value_t = 10)]
    flush_interval: u64,

    /// Set to "1" to disable upstream TLS certificate verification.
    #[arg(long, env = "AXOM_SKIP_TLS_VERIFY", default_value = "")]
    skip_tls_verify: String,

    /// Directory for the root CA certificate and key.
    #[arg(long, default_value = "certs")]
    ca_dir: PathBuf,

    /// Attach raw request/response bodies to signals (debugging only).
    #[arg(long, default_value_t = false)]
    capture_raw_bodies: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "AXOM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Resolve CLI/env values into an [`ObserverConfig`].
fn build_config(cli: &Cli) -> ObserverConfig {
    ObserverConfig {
        customer_id: cli.customer_id.clone(),
        agent_id: cli.agent_id.clone(),
        client_id: cli.client_id.clone(),
        client_secret: cli.client_secret.clone(),
        agent_secret: cli.agent_secret.clone(),
        backend_url: cli.backend_url.clone(),
        http_port: cli.http_port,
        https_port: cli.https_port,
        batch_size: cli.batch_size,
        flush_interval: Duration::from_secs(cli.flush_interval),
        skip_tls_verify: cli.skip_tls_verify == "1",
        ca_dir: cli.ca_dir.clone(),
        capture_raw_bodies: cli.capture_raw_bodies,
        ..ObserverConfig::default()
    }
}

/// Initialize structured logging. `RUST_LOG` wins over `--log-level`.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = build_config(&cli);
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {e}");
        eprintln!();
        eprintln!("Required configuration (flags or environment):");
        eprintln!("  CUSTOMER_ID    - customer identifier");
        eprintln!("  AGENT_ID       - AI agent identifier");
        eprintln!("  AGENT_SECRET   - API key for the ingest backend");
        std::process::exit(1);
    }

    info!(
        customer_id = %config.customer_id,
        agent_id = %config.agent_id,
        agent_secret = %mask_secret(&config.agent_secret),
        backend_url = %config.backend_url,
        "Starting Axom observer"
    );

    Observer::new(config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["axom-observer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_build_config_defaults() {
        let cli = parse(&[
            "--customer-id",
            "acme",
            "--agent-id",
            "agent-1",
            "--agent-secret",
            "token",
        ]);
        let config = build_config(&cli);

        assert_eq!(config.customer_id, "acme");
        assert_eq!(config.http_port, 8888);
        assert_eq!(config.https_port, 8443);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert!(!config.skip_tls_verify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_config_overrides() {
        let cli = parse(&[
            "--customer-id",
            "acme",
            "--agent-id",
            "agent-1",
            "--agent-secret",
            "token",
            "--batch-size",
            "5",
            "--flush-interval",
            "2",
            "--skip-tls-verify",
            "1",
            "--backend-url",
            "https://ingest.example.com/v1/signals",
        ]);
        let config = build_config(&cli);

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert!(config.skip_tls_verify);
        assert_eq!(config.backend_url, "https://ingest.example.com/v1/signals");
    }

    #[test]
    fn test_missing_identity_fails_validation() {
        let cli = parse(&["--agent-id", "agent-1", "--agent-secret", "token"]);
        let config = build_config(&cli);
        assert!(config.validate().is_err());
    }
}
