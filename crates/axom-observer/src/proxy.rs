//! MITM proxy engine.
//!
//! Two listeners: a plain HTTP proxy that accepts absolute-form requests,
//! and an HTTPS proxy that accepts `CONNECT`, replies `200 OK`, and upgrades
//! the client side to TLS using a leaf certificate minted for the requested
//! host. Both paths share one exchange handler: detect the AI provider,
//! capture the request body, relay upstream, capture the response, hand a
//! signal to the export channel, and return the upstream status and body to
//! the client. Non-AI traffic is refused with `404`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use axom_core::Signal;

use crate::ca::CertificateAuthority;
use crate::capture::{self, CapturedExchange};
use crate::config::ObserverConfig;
use crate::metrics::Metrics;
use crate::providers;
use crate::shutdown::ShutdownCoordinator;
use crate::tasks::TaskDetector;

/// Process-wide state shared by every proxied connection.
pub struct ProxyContext {
    pub customer_id: String,
    pub agent_id: String,
    /// Upstream HTTP client (30 s deadline).
    pub client: reqwest::Client,
    pub ca: Arc<CertificateAuthority>,
    pub detector: Arc<TaskDetector>,
    pub signal_tx: mpsc::Sender<Signal>,
    pub metrics: Arc<Metrics>,
    pub max_body_bytes: usize,
    pub capture_raw_bodies: bool,
}

impl ProxyContext {
    pub fn new(
        config: &ObserverConfig,
        ca: Arc<CertificateAuthority>,
        detector: Arc<TaskDetector>,
        signal_tx: mpsc::Sender<Signal>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, reqwest::Error> {
        crate::ca::install_crypto_provider();
        let mut builder = reqwest::Client::builder().timeout(config.upstream_timeout);
        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            customer_id: config.customer_id.clone(),
            agent_id: config.agent_id.clone(),
            client: builder.build()?,
            ca,
            detector,
            signal_tx,
            metrics,
            max_body_bytes: config.max_body_bytes,
            capture_raw_bodies: config.capture_raw_bodies,
        })
    }
}

// ---------------------------------------------------------------------------
// Accept loops
// ---------------------------------------------------------------------------

/// Serve the plain HTTP proxy until shutdown.
pub async fn serve_http(
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    shutdown: ShutdownCoordinator,
) {
    let token = shutdown.token();
    info!(addr = ?listener.local_addr().ok(), "HTTP proxy listening");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "HTTP accept failed");
                        continue;
                    }
                };
                let ctx = Arc::clone(&ctx);
                let guard = shutdown.track_connection();
                tokio::spawn(async move {
                    let _guard = guard;
                    let service = service_fn(move |req| {
                        let ctx = Arc::clone(&ctx);
                        async move { Ok::<_, Infallible>(handle_plain(ctx, req).await) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "HTTP connection closed with error");
                    }
                });
            }
        }
    }
    info!("HTTP proxy stopped accepting");
}

/// Serve the HTTPS (CONNECT) proxy until shutdown.
pub async fn serve_https(
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    shutdown: ShutdownCoordinator,
) {
    let token = shutdown.token();
    info!(addr = ?listener.local_addr().ok(), "HTTPS proxy listening");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "HTTPS accept failed");
                        continue;
                    }
                };
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                let guard = shutdown.track_connection();
                tokio::spawn(async move {
                    let _guard = guard;
                    let service = service_fn(move |req| {
                        let ctx = Arc::clone(&ctx);
                        let shutdown = shutdown.clone();
                        async move { Ok::<_, Infallible>(handle_connect(ctx, shutdown, req).await) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .with_upgrades()
                        .await
                    {
                        debug!(%peer, error = %e, "HTTPS connection closed with error");
                    }
                });
            }
        }
    }
    info!("HTTPS proxy stopped accepting");
}

// ---------------------------------------------------------------------------
// Request handlers
// ---------------------------------------------------------------------------

/// Handle a request on the plain HTTP listener.
async fn handle_plain(ctx: Arc<ProxyContext>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(host) = request_host(&req) else {
        return text_response(StatusCode::BAD_REQUEST, "Missing host");
    };
    handle_exchange(ctx, req, host, false).await
}

/// Handle a request on the HTTPS listener: `CONNECT` starts a TLS intercept,
/// anything else is treated like plain proxy traffic.
async fn handle_connect(
    ctx: Arc<ProxyContext>,
    shutdown: ShutdownCoordinator,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if req.method() != Method::CONNECT {
        return handle_plain(ctx, req).await;
    }

    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return text_response(StatusCode::BAD_REQUEST, "CONNECT requires an authority");
    };

    let guard = shutdown.track_connection();
    tokio::spawn(async move {
        let _guard = guard;
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => serve_tls_tunnel(ctx, upgraded, authority).await,
            Err(e) => debug!(error = %e, "CONNECT upgrade failed"),
        }
    });

    // The 200 tells the client the tunnel is ready; TLS starts next.
    Response::new(Full::new(Bytes::new()))
}

/// Terminate TLS on an upgraded CONNECT tunnel and serve the requests inside.
async fn serve_tls_tunnel(ctx: Arc<ProxyContext>, upgraded: Upgraded, authority: String) {
    let host = authority
        .split(':')
        .next()
        .unwrap_or(authority.as_str())
        .to_string();

    let server_config = match ctx.ca.leaf_for(&host).await {
        Ok(config) => config,
        Err(e) => {
            warn!(%host, error = %e, "Leaf certificate minting failed, aborting connection");
            return;
        }
    };

    let acceptor = TlsAcceptor::from(server_config);
    let tls_stream = match acceptor.accept(TokioIo::new(upgraded)).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%host, error = %e, "TLS handshake failed");
            return;
        }
    };

    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        let authority = authority.clone();
        async move { Ok::<_, Infallible>(handle_exchange(ctx, req, authority, true).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!(%host, error = %e, "Intercepted TLS connection closed with error");
    }
}

/// The shared exchange flow for both listeners.
async fn handle_exchange(
    ctx: Arc<ProxyContext>,
    req: Request<Incoming>,
    host: String,
    tls: bool,
) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let Some(provider) = providers::detect(&host, &path) else {
        debug!(%host, %path, "Refusing non-AI traffic");
        return text_response(StatusCode::NOT_FOUND, "Not an AI API endpoint");
    };

    let mut headers = req.headers().clone();

    let request_body = match Limited::new(req.into_body(), ctx.max_body_bytes)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(%host, %path, error = %e, "Failed to read request body");
            return text_response(StatusCode::BAD_REQUEST, "Bad request");
        }
    };

    let scheme = if tls { "https" } else { "http" };
    let url = format!("{scheme}://{host}{path_and_query}");

    // The client sets Host from the URL and computes Content-Length itself.
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream_response = match ctx
        .client
        .request(method.clone(), &url)
        .headers(headers)
        .body(request_body.clone())
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "Upstream request failed");
            return text_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable");
        }
    };

    let status = upstream_response.status().as_u16();
    let response_body = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%url, error = %e, "Failed to read upstream response body");
            return text_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable");
        }
    };
    let latency = start.elapsed();

    let exchange = CapturedExchange {
        provider,
        method: method.as_str(),
        host: &host,
        path: &path,
        request_body: &request_body,
        response_body: &response_body,
        status,
        latency,
        tls,
    };
    let signal = capture::build_signal(
        &exchange,
        &ctx.customer_id,
        &ctx.agent_id,
        &ctx.detector,
        ctx.capture_raw_bodies,
    );

    ctx.metrics
        .requests_total
        .with_label_values(&[provider.name, &signal.operation, &status.to_string()])
        .inc();

    match ctx.signal_tx.try_send(signal) {
        Ok(()) => debug!(
            provider = provider.name,
            %host,
            latency_ms = latency.as_millis() as u64,
            "AI signal captured"
        ),
        Err(mpsc::error::TrySendError::Full(_)) => {
            ctx.metrics.signals_dropped.inc();
            warn!("Signal channel full, dropping signal");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Signal channel closed, discarding signal");
        }
    }

    let mut response = Response::new(Full::new(response_body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    response
}

/// Resolve the target host of a proxied request: the absolute-form URI
/// authority, falling back to the `Host` header.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            req.headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
