//! Pipeline coordinator.
//!
//! Owns every piece of process-wide state — certificate authority, signal
//! channel, task detector, counters — wires the proxy listeners to the
//! exporter, and drives the shutdown order: stop accepting, drain in-flight
//! connections, close the channel, let the exporter flush, exit.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ca::CertificateAuthority;
use crate::config::ObserverConfig;
use crate::exporter::{ExporterConfig, SignalExporter};
use crate::metrics::Metrics;
use crate::proxy::{self, ProxyContext};
use crate::shutdown::{self, ShutdownCoordinator};
use crate::tasks::TaskDetector;

/// The assembled observer.
pub struct Observer {
    config: ObserverConfig,
}

impl Observer {
    pub fn new(config: ObserverConfig) -> Self {
        Self { config }
    }

    /// Start all subsystems and run until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Fails on unrecoverable startup problems: CA load/generation failure,
    /// client construction failure, or a port that cannot be bound.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        let metrics = Arc::new(Metrics::new());

        let ca = Arc::new(
            CertificateAuthority::ensure_root(&config.ca_dir)
                .context("failed to initialize certificate authority")?,
        );
        let detector = Arc::new(TaskDetector::new());
        let (signal_tx, signal_rx) = mpsc::channel(config.channel_capacity);

        let ctx = Arc::new(
            ProxyContext::new(
                &config,
                Arc::clone(&ca),
                Arc::clone(&detector),
                signal_tx,
                Arc::clone(&metrics),
            )
            .context("failed to build upstream HTTP client")?,
        );

        let http_listener = TcpListener::bind(("0.0.0.0", config.http_port))
            .await
            .with_context(|| format!("failed to bind HTTP proxy port {}", config.http_port))?;
        let https_listener = TcpListener::bind(("0.0.0.0", config.https_port))
            .await
            .with_context(|| format!("failed to bind HTTPS proxy port {}", config.https_port))?;

        let exporter = SignalExporter::new(
            ExporterConfig {
                api_key: config.agent_secret.clone(),
                url: config.backend_url.clone(),
                batch_size: config.batch_size,
                flush_interval: config.flush_interval,
                skip_tls_verify: config.skip_tls_verify,
                ..ExporterConfig::default()
            },
            Arc::clone(&metrics),
        )
        .context("failed to build exporter HTTP client")?;

        let shutdown = ShutdownCoordinator::new(config.drain_timeout);
        let token = shutdown.token();

        // The exporter outlives the drain window, so it gets its own token:
        // it must keep flushing while connections finish.
        let exporter_token = CancellationToken::new();
        let exporter_task = tokio::spawn(exporter.run(signal_rx, exporter_token.clone()));

        let http_task = tokio::spawn(proxy::serve_http(
            http_listener,
            Arc::clone(&ctx),
            shutdown.clone(),
        ));
        let https_task = tokio::spawn(proxy::serve_https(
            https_listener,
            Arc::clone(&ctx),
            shutdown.clone(),
        ));
        tokio::spawn(shutdown::shutdown_signal(shutdown.clone()));

        info!(
            http_port = config.http_port,
            https_port = config.https_port,
            backend_url = %config.backend_url,
            "Observer started"
        );

        token.cancelled().await;
        info!("Shutdown initiated");

        // Accept loops exit on the token; then in-flight connections drain.
        let _ = tokio::join!(http_task, https_task);
        shutdown.wait_for_drain().await;

        // Close the signal channel and let the exporter do its final flush.
        drop(ctx);
        exporter_token.cancel();
        let _ = exporter_task.await;

        debug!(counters = %metrics.render(), "Final counters");
        info!(
            sent = metrics.signals_sent.get(),
            dropped = metrics.signals_dropped.get(),
            "Observer stopped"
        );
        Ok(())
    }
}
