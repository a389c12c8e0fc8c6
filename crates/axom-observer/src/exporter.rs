//! Batched signal export to the ingest backend.
//!
//! A single long-running task owns the in-memory batch: incoming signals are
//! redacted and buffered, a full buffer or an elapsed flush interval triggers
//! a POST, and transient failures are retried with exponential backoff. The
//! exporter offers no at-least-once guarantee — batches that exhaust their
//! retries are dropped and counted.

use std::sync::Arc;
use std::time::Duration;

use axom_core::{Signal, SENSITIVE_FIELDS};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;

/// Maximum delivery attempts per batch.
const MAX_ATTEMPTS: u32 = 5;

/// Exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Bearer token for the ingest endpoint.
    pub api_key: String,
    /// Ingest URL.
    pub url: String,
    /// Signals per batch (minimum 1).
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Base backoff delay; attempt `n` waits `base * 2^n`.
    pub base_delay: Duration,
    /// Disable TLS certificate verification towards the backend.
    pub skip_tls_verify: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: "http://localhost:8080/api/v1/signals".to_string(),
            batch_size: 50,
            flush_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            base_delay: Duration::from_secs(2),
            skip_tls_verify: false,
        }
    }
}

/// One failed delivery attempt.
#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),
}

impl SendError {
    /// Network errors, 429 and 5xx are transient; other statuses are not.
    fn retryable(&self) -> bool {
        match self {
            SendError::Network(_) => true,
            SendError::Status(status) => *status == 429 || (500..600).contains(status),
        }
    }
}

/// Ships signal batches to the ingest backend.
pub struct SignalExporter {
    config: ExporterConfig,
    client: Client,
    metrics: Arc<Metrics>,
}

impl SignalExporter {
    pub fn new(config: ExporterConfig, metrics: Arc<Metrics>) -> Result<Self, reqwest::Error> {
        crate::ca::install_crypto_provider();
        let mut builder = Client::builder().timeout(config.request_timeout);
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            config,
            client: builder.build()?,
            metrics,
        })
    }

    /// Main exporter loop.
    ///
    /// Exits after a final flush when the channel closes or the cancellation
    /// token fires; on cancellation, anything already queued in the channel
    /// is drained into the last batch first.
    pub async fn run(self, mut rx: mpsc::Receiver<Signal>, token: CancellationToken) {
        let mut batch: Vec<Signal> = Vec::with_capacity(self.config.batch_size);
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // consume the immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_signal = rx.recv() => match maybe_signal {
                    Some(signal) => self.buffer(signal, &mut batch).await,
                    None => {
                        self.flush(&mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush(&mut batch).await,
                _ = token.cancelled() => {
                    while let Ok(signal) = rx.try_recv() {
                        self.buffer(signal, &mut batch).await;
                    }
                    self.flush(&mut batch).await;
                    break;
                }
            }
        }

        info!(
            sent = self.metrics.signals_sent.get(),
            dropped = self.metrics.signals_dropped.get(),
            "Signal exporter stopped"
        );
    }

    /// Redact and buffer one signal, flushing when the batch is full.
    async fn buffer(&self, mut signal: Signal, batch: &mut Vec<Signal>) {
        signal.redact(SENSITIVE_FIELDS);
        signal.strip_raw();
        batch.push(signal);
        if batch.len() >= self.config.batch_size {
            self.flush(batch).await;
        }
    }

    /// Send the buffered signals, if any, as one batch.
    async fn flush(&self, batch: &mut Vec<Signal>) {
        if batch.is_empty() {
            return;
        }
        let signals: Vec<Signal> = batch.drain(..).collect();
        self.send_batch_with_retry(&signals).await;
    }

    /// Deliver a batch with retry and exponential backoff.
    pub async fn send_batch_with_retry(&self, signals: &[Signal]) {
        debug!(
            count = signals.len(),
            url = %self.config.url,
            "Sending signal batch"
        );

        for attempt in 0..MAX_ATTEMPTS {
            match self.send_batch_once(signals).await {
                Ok(()) => {
                    self.metrics.signals_sent.inc_by(signals.len() as u64);
                    debug!(count = signals.len(), "Batch delivered");
                    return;
                }
                Err(e) if e.retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = self.config.base_delay * 2u32.pow(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = MAX_ATTEMPTS,
                        delay_ms = delay.as_millis() as u64,
                        "Batch send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempts = attempt + 1,
                        count = signals.len(),
                        "Dropping batch"
                    );
                    self.metrics.signals_dropped.inc_by(signals.len() as u64);
                    return;
                }
            }
        }
    }

    async fn send_batch_once(&self, signals: &[Signal]) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.config.url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(signals)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SendError::Status(status.as_u16()))
        }
    }
}
