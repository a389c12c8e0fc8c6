//! Signal assembly from captured proxy exchanges.
//!
//! Takes the raw material the proxy collected for one request/response pair
//! and produces the canonical [`Signal`]: normalized operation, merged
//! request/response metadata with integer token counts, task enrichment, and
//! metadata redaction.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axom_core::{Endpoint, Signal, SENSITIVE_FIELDS};
use chrono::Utc;
use serde_json::Value;

use crate::parser;
use crate::providers::{self, AiProvider};
use crate::tasks::TaskDetector;

/// Everything the proxy captured for one AI API exchange.
pub struct CapturedExchange<'a> {
    pub provider: &'static AiProvider,
    pub method: &'a str,
    /// Upstream authority as seen on the wire (may include a port).
    pub host: &'a str,
    pub path: &'a str,
    pub request_body: &'a [u8],
    pub response_body: &'a [u8],
    pub status: u16,
    pub latency: Duration,
    /// Whether the inbound leg was TLS-terminated.
    pub tls: bool,
}

/// Last issued signal id value, bumped monotonically so ids stay unique even
/// when two signals land in the same nanosecond.
static LAST_SIGNAL_NANOS: AtomicI64 = AtomicI64::new(0);

/// `signal_<unix_nanos>`, unique within the process.
pub fn next_signal_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let prev = LAST_SIGNAL_NANOS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(if now > last { now } else { last + 1 })
        })
        .unwrap_or(now);
    let issued = if now > prev { now } else { prev + 1 };
    format!("signal_{issued}")
}

/// Build the canonical signal for a captured exchange.
pub fn build_signal(
    exchange: &CapturedExchange<'_>,
    customer_id: &str,
    agent_id: &str,
    detector: &TaskDetector,
    capture_raw: bool,
) -> Signal {
    let mut metadata =
        parser::parse_request(
            exchange.provider.name,
            exchange.method,
            exchange.path,
            exchange.request_body,
        );
    for (key, value) in parser::parse_response(exchange.provider.name, exchange.response_body) {
        metadata.insert(key, value);
    }

    metadata.insert(
        "provider".to_string(),
        Value::String(exchange.provider.name.to_string()),
    );
    metadata.insert(
        "endpoint".to_string(),
        Value::String(exchange.path.to_string()),
    );

    // Promote token counts out of the nested usage object as integers.
    if let Some(usage) = metadata.get("usage").and_then(Value::as_object).cloned() {
        for key in ["prompt_tokens", "completion_tokens", "total_tokens"] {
            if let Some(count) = usage.get(key).and_then(Value::as_f64) {
                metadata.insert(key.to_string(), Value::from(count as i64));
            }
        }
    }

    let (protocol, port) = if exchange.tls { ("https", 443) } else { ("http", 80) };

    let mut signal = Signal {
        id: next_signal_id(),
        customer_id: customer_id.to_string(),
        agent_id: agent_id.to_string(),
        task_id: None,
        timestamp: Utc::now(),
        latency_ms: exchange.latency.as_millis() as f64,
        protocol: protocol.to_string(),
        source: Endpoint {
            ip: "127.0.0.1".to_string(),
            port: 0,
            hostname: None,
        },
        destination: Endpoint {
            ip: exchange.host.to_string(),
            port,
            hostname: Some(providers::normalize_host(exchange.host)),
        },
        operation: parser::classify_operation(exchange.path).to_string(),
        status: exchange.status,
        metadata,
        task_type: None,
        outcome: None,
        outcome_data: None,
        db_operation: None,
        db_table: None,
        db_latency_ms: None,
        raw_request: capture_raw.then(|| exchange.request_body.to_vec()),
        raw_response: capture_raw.then(|| exchange.response_body.to_vec()),
    };

    if let Some(task) = detector.detect(&signal) {
        signal.task_id = Some(task.id.clone());
        signal.task_type = Some(task.task_type.clone());
        if let Some(confidence) = task.metadata.get("confidence") {
            signal
                .metadata
                .insert("task_confidence".to_string(), confidence.clone());
        }
    }

    signal.redact(SENSITIVE_FIELDS);
    signal
}
