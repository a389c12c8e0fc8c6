//! Core types for the Axom AI observer.
//!
//! This crate contains the data model shared across the observer components:
//! the [`Signal`] record exported for billing and observability, the [`Task`]
//! grouping produced by task detection, and the rule types that drive it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub mod sql;

/// Metadata keys replaced with [`REDACTED`] before a signal leaves the process.
pub const SENSITIVE_FIELDS: &[&str] = &["authorization", "api_key"];

/// Replacement value written over sensitive fields.
pub const REDACTED: &str = "[REDACTED]";

/// A network endpoint.
///
/// For intercepted traffic `ip` carries the upstream authority string as it
/// appeared on the wire (it may be a hostname); `hostname` carries the bare
/// host when one is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// One captured AI API interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal identifier (`signal_<unix_nanos>`).
    pub id: String,
    /// Customer identifier.
    pub customer_id: String,
    /// AI agent identifier.
    pub agent_id: String,
    /// Business task identifier for outcome-based billing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// When the signal was captured (UTC).
    pub timestamp: DateTime<Utc>,
    /// Request latency in whole milliseconds.
    pub latency_ms: f64,

    /// `http` or `https`.
    pub protocol: String,
    /// Client endpoint.
    pub source: Endpoint,
    /// AI service endpoint.
    pub destination: Endpoint,

    /// Normalized operation label (`chat_completion`, `embedding`, ...).
    pub operation: String,
    /// Upstream HTTP status code.
    pub status: u16,
    /// AI-specific data: provider, endpoint, model, token usage, previews.
    pub metadata: Map<String, Value>,

    /// Business task type, when a task was detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// `success`, `failure` or `partial`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Outcome-specific metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_data: Option<Map<String, Value>>,

    /// Database operation (`SELECT`, `INSERT`, ...) for database traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_operation: Option<String>,
    /// Database table name for database traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_table: Option<String>,
    /// Database operation latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_latency_ms: Option<f64>,

    /// Original request body, only attached when raw capture is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<Vec<u8>>,
    /// Original response body, only attached when raw capture is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Vec<u8>>,
}

impl Signal {
    /// Redact sensitive fields.
    ///
    /// Each named field present in `metadata` or `outcome_data` is replaced
    /// with [`REDACTED`]. Fields that are absent stay absent, and no other
    /// field is touched.
    pub fn redact(&mut self, fields: &[&str]) {
        for field in fields {
            if let Some(v) = self.metadata.get_mut(*field) {
                *v = Value::String(REDACTED.to_string());
            }
            if let Some(data) = self.outcome_data.as_mut() {
                if let Some(v) = data.get_mut(*field) {
                    *v = Value::String(REDACTED.to_string());
                }
            }
        }
    }

    /// Drop raw request/response bytes. Called at the exporter boundary so
    /// debug captures never leave the process.
    pub fn strip_raw(&mut self) {
        self.raw_request = None;
        self.raw_response = None;
    }

    /// Update the signal with task outcome information.
    pub fn set_outcome(&mut self, outcome: impl Into<String>, outcome_data: Map<String, Value>) {
        self.outcome = Some(outcome.into());
        self.outcome_data = Some(outcome_data);
    }

    /// Whether this signal represents a completed task.
    pub fn is_task_complete(&self) -> bool {
        self.outcome.is_some() && self.task_id.is_some()
    }
}

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A business task that groups related AI operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (`<customer>_<agent>_<task_type>_<unix_secs>`).
    pub id: String,
    pub customer_id: String,
    pub agent_id: String,
    /// Task type, e.g. `cold_calling` or `summarization`.
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// `success`, `failure` or `partial`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Task-specific data (description, provider, model, confidence).
    pub metadata: Map<String, Value>,
    /// IDs of the signals associated with this task.
    pub signals: Vec<String>,
}

/// Which signal field a [`TaskPattern`] is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSource {
    /// `metadata.prompt_preview`
    Prompt,
    /// `metadata.response_preview`
    Response,
    /// `metadata.model`
    Model,
    /// `metadata.endpoint`
    Endpoint,
}

/// A detection pattern within a [`TaskRule`].
#[derive(Debug, Clone)]
pub struct TaskPattern {
    pub source: PatternSource,
    /// Regexes that must all be found in the source field.
    pub conditions: Vec<String>,
    /// Contribution to the detection confidence, in `[0, 1]`.
    pub confidence: f64,
    /// When true, the rule only matches if this pattern matches.
    pub required: bool,
}

/// How to determine the outcome of a detected task.
#[derive(Debug, Clone)]
pub struct OutcomeRule {
    pub name: String,
    /// Regexes matched against each signal's `response_preview`.
    pub conditions: Vec<String>,
    /// `success`, `failure` or `partial`.
    pub outcome: String,
    /// Weight of this rule, in `[0, 1]`.
    pub score: f64,
}

/// A rule for detecting a business task from signals.
#[derive(Debug, Clone)]
pub struct TaskRule {
    pub name: String,
    pub description: String,
    /// `"any"` or an exact provider name.
    pub provider: String,
    pub patterns: Vec<TaskPattern>,
    pub outcomes: Vec<OutcomeRule>,
    /// Inactivity window after which the task is considered finished.
    pub timeout: Duration,
}
