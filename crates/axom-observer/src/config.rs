//! Observer configuration.
//!
//! Values come from CLI flags with environment fallbacks (see `main.rs`);
//! this module holds the resolved configuration and its validation.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required identity: {0}")]
    MissingIdentity(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Resolved observer configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Customer identifier (required).
    pub customer_id: String,
    /// AI agent identifier (required).
    pub agent_id: String,
    /// OAuth-style client ID — accepted for forward compatibility, unused.
    pub client_id: Option<String>,
    /// OAuth-style client secret — accepted for forward compatibility, unused.
    pub client_secret: Option<String>,
    /// Bearer token for the ingest endpoint (required).
    pub agent_secret: String,

    /// Ingest URL for signal batches.
    pub backend_url: String,
    /// HTTP proxy listen port.
    pub http_port: u16,
    /// HTTPS (CONNECT) proxy listen port.
    pub https_port: u16,

    /// Exporter batch size (minimum 1).
    pub batch_size: usize,
    /// Exporter flush interval.
    pub flush_interval: Duration,
    /// Disable upstream TLS certificate verification.
    pub skip_tls_verify: bool,

    /// Directory holding `ca.crt` / `ca.key`.
    pub ca_dir: PathBuf,
    /// Maximum request/response body size captured per exchange.
    pub max_body_bytes: usize,
    /// Hard deadline for upstream HTTP calls.
    pub upstream_timeout: Duration,
    /// Bounded signal channel capacity.
    pub channel_capacity: usize,
    /// Attach raw request/response bodies to signals (debugging only;
    /// redaction strips them before export).
    pub capture_raw_bodies: bool,
    /// How long in-flight connections may drain during shutdown.
    pub drain_timeout: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            customer_id: String::new(),
            agent_id: String::new(),
            client_id: None,
            client_secret: None,
            agent_secret: String::new(),
            backend_url: "http://localhost:8080/api/v1/signals".to_string(),
            http_port: 8888,
            https_port: 8443,
            batch_size: 50,
            flush_interval: Duration::from_secs(10),
            skip_tls_verify: false,
            ca_dir: PathBuf::from("certs"),
            max_body_bytes: 50 * 1024 * 1024,
            upstream_timeout: Duration::from_secs(30),
            channel_capacity: 100,
            capture_raw_bodies: false,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ObserverConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingIdentity`] when a required identity
    /// value is empty, and [`ConfigError::Invalid`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.customer_id.is_empty() {
            return Err(ConfigError::MissingIdentity("CUSTOMER_ID"));
        }
        if self.agent_id.is_empty() {
            return Err(ConfigError::MissingIdentity("AGENT_ID"));
        }
        if self.agent_secret.is_empty() {
            return Err(ConfigError::MissingIdentity("AGENT_SECRET"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "flush_interval",
                reason: "must be positive".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "channel_capacity",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Mask a secret for logging, keeping a short prefix and suffix.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***{}", &secret[..4], &secret[secret.len() - 4..])
    }
}
