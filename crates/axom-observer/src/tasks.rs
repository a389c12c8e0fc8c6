//! Business-task detection from signals.
//!
//! A built-in library of regex rules maps signal metadata (prompt/response
//! previews, model, endpoint) to business task types such as cold calling or
//! summarization, and later scores the task outcome from the responses seen.

use axom_core::{OutcomeRule, PatternSource, Signal, Task, TaskPattern, TaskRule, TaskStatus};
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Detects tasks and determines their outcomes.
pub struct TaskDetector {
    rules: Vec<TaskRule>,
}

impl Default for TaskDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDetector {
    /// Build a detector with the built-in rule library.
    pub fn new() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    /// Build a detector with a custom rule set.
    pub fn with_rules(rules: Vec<TaskRule>) -> Self {
        Self { rules }
    }

    /// Detect whether `signal` starts a business task.
    ///
    /// Rules are evaluated in declaration order; the first rule whose
    /// required patterns all match produces the task.
    pub fn detect(&self, signal: &Signal) -> Option<Task> {
        for rule in &self.rules {
            if !self.rule_matches(signal, rule) {
                continue;
            }

            let confidence = self.confidence(signal, rule);
            let mut metadata = Map::new();
            metadata.insert("description".to_string(), json!(rule.description));
            metadata.insert(
                "provider".to_string(),
                signal.metadata.get("provider").cloned().unwrap_or(Value::Null),
            );
            metadata.insert(
                "model".to_string(),
                signal.metadata.get("model").cloned().unwrap_or(Value::Null),
            );
            metadata.insert("confidence".to_string(), json!(confidence));

            let task = Task {
                id: task_id(&signal.customer_id, &signal.agent_id, &rule.name),
                customer_id: signal.customer_id.clone(),
                agent_id: signal.agent_id.clone(),
                task_type: rule.name.clone(),
                status: TaskStatus::InProgress,
                created_at: signal.timestamp,
                completed_at: None,
                outcome: None,
                metadata,
                signals: vec![signal.id.clone()],
            };

            debug!(
                task_type = %rule.name,
                confidence,
                "Task detected"
            );
            return Some(task);
        }
        None
    }

    /// Determine the outcome of a finished task from its signals.
    ///
    /// Each outcome rule scores as the fraction of responses matching its
    /// conditions weighted by the rule's score; the highest positive score
    /// wins, ties broken by declaration order.
    pub fn determine_outcome(
        &self,
        task: &Task,
        signals: &[Signal],
    ) -> (String, Map<String, Value>) {
        let Some(rule) = self.rules.iter().find(|r| r.name == task.task_type) else {
            let mut data = Map::new();
            data.insert("reason".to_string(), json!("no_rule_found"));
            return ("unknown".to_string(), data);
        };

        let mut best_outcome = "unknown".to_string();
        let mut best_score = 0.0_f64;
        let mut data = Map::new();

        for outcome_rule in &rule.outcomes {
            let score = evaluate_outcome_rule(signals, outcome_rule);
            if score > best_score {
                best_score = score;
                best_outcome = outcome_rule.outcome.clone();
                data.insert("outcome_rule".to_string(), json!(outcome_rule.name));
                data.insert("confidence".to_string(), json!(score));
            }
        }

        data.insert("task_type".to_string(), json!(task.task_type));
        data.insert("total_signals".to_string(), json!(signals.len()));
        data.insert(
            "duration_minutes".to_string(),
            json!((Utc::now() - task.created_at).num_seconds() as f64 / 60.0),
        );

        (best_outcome, data)
    }

    fn rule_matches(&self, signal: &Signal, rule: &TaskRule) -> bool {
        if rule.provider != "any" {
            if let Some(provider) = signal.metadata.get("provider").and_then(Value::as_str) {
                if provider != rule.provider {
                    return false;
                }
            }
        }

        rule.patterns
            .iter()
            .filter(|p| p.required)
            .all(|p| pattern_matches(signal, p))
    }

    /// Average confidence across the patterns that matched.
    fn confidence(&self, signal: &Signal, rule: &TaskRule) -> f64 {
        let mut total = 0.0;
        let mut matched = 0u32;
        for pattern in &rule.patterns {
            if pattern_matches(signal, pattern) {
                total += pattern.confidence;
                matched += 1;
            }
        }
        if matched == 0 {
            0.0
        } else {
            total / f64::from(matched)
        }
    }
}

/// Evaluate a pattern against the signal field named by its source.
fn pattern_matches(signal: &Signal, pattern: &TaskPattern) -> bool {
    let key = match pattern.source {
        PatternSource::Prompt => "prompt_preview",
        PatternSource::Response => "response_preview",
        PatternSource::Model => "model",
        PatternSource::Endpoint => "endpoint",
    };
    match signal.metadata.get(key).and_then(Value::as_str) {
        Some(text) => matches_conditions(text, &pattern.conditions),
        None => false,
    }
}

/// A text matches when every condition regex is found in it. Invalid regexes
/// are logged and count as non-matching.
fn matches_conditions(text: &str, conditions: &[String]) -> bool {
    for condition in conditions {
        match Regex::new(condition) {
            Ok(re) => {
                if !re.is_match(text) {
                    return false;
                }
            }
            Err(e) => {
                warn!(pattern = %condition, error = %e, "Invalid task rule regex");
                return false;
            }
        }
    }
    true
}

/// Fraction of signals whose `response_preview` satisfies the rule's
/// conditions, weighted by the rule's score.
fn evaluate_outcome_rule(signals: &[Signal], rule: &OutcomeRule) -> f64 {
    let mut matches = 0u32;
    let mut total = 0u32;

    for signal in signals {
        if let Some(response) = signal.metadata.get("response_preview").and_then(Value::as_str) {
            total += 1;
            if matches_conditions(response, &rule.conditions) {
                matches += 1;
            }
        }
    }

    if total == 0 {
        0.0
    } else {
        f64::from(matches) / f64::from(total) * rule.score
    }
}

/// `<customer>_<agent>_<task_type>_<unix_seconds>`
fn task_id(customer_id: &str, agent_id: &str, task_type: &str) -> String {
    format!(
        "{}_{}_{}_{}",
        customer_id,
        agent_id,
        task_type,
        Utc::now().timestamp()
    )
}

// ---------------------------------------------------------------------------
// Built-in rule library
// ---------------------------------------------------------------------------

fn prompt_pattern(regex: &str, confidence: f64, required: bool) -> TaskPattern {
    TaskPattern {
        source: PatternSource::Prompt,
        conditions: vec![regex.to_string()],
        confidence,
        required,
    }
}

fn endpoint_pattern(regex: &str, confidence: f64, required: bool) -> TaskPattern {
    TaskPattern {
        source: PatternSource::Endpoint,
        conditions: vec![regex.to_string()],
        confidence,
        required,
    }
}

fn outcome(name: &str, regex: &str, label: &str, score: f64) -> OutcomeRule {
    OutcomeRule {
        name: name.to_string(),
        conditions: vec![regex.to_string()],
        outcome: label.to_string(),
        score,
    }
}

fn rule(
    name: &str,
    description: &str,
    patterns: Vec<TaskPattern>,
    outcomes: Vec<OutcomeRule>,
    timeout_mins: u64,
) -> TaskRule {
    TaskRule {
        name: name.to_string(),
        description: description.to_string(),
        provider: "any".to_string(),
        patterns,
        outcomes,
        timeout: Duration::from_secs(timeout_mins * 60),
    }
}

/// The built-in task rule library, in match-priority order.
fn builtin_rules() -> Vec<TaskRule> {
    vec![
        // Sales and marketing
        rule(
            "cold_calling",
            "Cold calling and lead generation",
            vec![
                prompt_pattern(
                    r"(?i)(cold call|lead generation|prospecting|sales call|outreach)",
                    0.8,
                    true,
                ),
                prompt_pattern(r"(?i)(script|dialogue|conversation|pitch)", 0.6, false),
            ],
            vec![
                outcome(
                    "meeting_scheduled",
                    r"(?i)(schedule|meeting|appointment|calendar)",
                    "success",
                    1.0,
                ),
                outcome(
                    "lead_qualified",
                    r"(?i)(qualified|interested|budget|decision maker)",
                    "success",
                    0.8,
                ),
            ],
            10,
        ),
        rule(
            "lead_qualification",
            "Lead qualification and scoring",
            vec![prompt_pattern(
                r"(?i)(qualify|qualification|lead scoring|icp fit)",
                0.8,
                true,
            )],
            vec![outcome(
                "lead_scored",
                r"(?i)(qualified|disqualified|score|fit)",
                "success",
                1.0,
            )],
            10,
        ),
        rule(
            "email_marketing",
            "Email marketing and campaigns",
            vec![prompt_pattern(
                r"(?i)(email|newsletter|campaign|blast|sequence)",
                0.9,
                true,
            )],
            vec![outcome(
                "email_generated",
                r"(?i)(subject|body|signature|call to action)",
                "success",
                1.0,
            )],
            5,
        ),
        // Customer support
        rule(
            "customer_support",
            "Customer support and help desk",
            vec![prompt_pattern(
                r"(?i)(support|help|issue|problem|ticket|complaint)",
                0.8,
                true,
            )],
            vec![
                outcome(
                    "issue_resolved",
                    r"(?i)(resolved|fixed|solved|working)",
                    "success",
                    1.0,
                ),
                outcome(
                    "escalated",
                    r"(?i)(escalate|manager|supervisor|higher level)",
                    "partial",
                    0.5,
                ),
            ],
            15,
        ),
        // Content creation
        rule(
            "content_creation",
            "Content creation and writing",
            vec![
                prompt_pattern(r"(?i)(write|create|generate|compose|draft)", 0.7, true),
                prompt_pattern(r"(?i)(blog|article|post|content|copy)", 0.6, false),
            ],
            vec![outcome("content_created", r"(?i)(\w{50,})", "success", 1.0)],
            10,
        ),
        // Data analysis
        rule(
            "data_analysis",
            "Data analysis and insights",
            vec![prompt_pattern(
                r"(?i)(analyze|analysis|insights|data|metrics|statistics)",
                0.8,
                true,
            )],
            vec![outcome(
                "insights_generated",
                r"(?i)(trend|pattern|insight|finding|conclusion)",
                "success",
                1.0,
            )],
            15,
        ),
        // Code generation
        rule(
            "code_generation",
            "Code generation and programming",
            vec![prompt_pattern(
                r"(?i)(code|program|function|script|algorithm)",
                0.9,
                true,
            )],
            vec![outcome(
                "code_generated",
                r"(?i)(def |function |class |import |const |let |var )",
                "success",
                1.0,
            )],
            10,
        ),
        // Translation
        rule(
            "translation",
            "Language translation",
            vec![prompt_pattern(
                r"(?i)(translate|translation|language|convert)",
                0.9,
                true,
            )],
            vec![outcome(
                "translation_complete",
                r"(?i)(\w{10,})",
                "success",
                1.0,
            )],
            5,
        ),
        // Image generation
        rule(
            "image_generation",
            "Image generation and creation",
            vec![endpoint_pattern(
                r"(?i)(image|generation|dall|midjourney)",
                0.9,
                true,
            )],
            vec![outcome(
                "image_created",
                r"(?i)(url|image|png|jpg|jpeg)",
                "success",
                1.0,
            )],
            2,
        ),
        // Meeting scheduling
        rule(
            "meeting_scheduling",
            "Meeting scheduling and calendar management",
            vec![prompt_pattern(
                r"(?i)(schedule|meeting|appointment|calendar|book)",
                0.8,
                true,
            )],
            vec![outcome(
                "meeting_scheduled",
                r"(?i)(scheduled|booked|confirmed|calendar)",
                "success",
                1.0,
            )],
            5,
        ),
        // Research
        rule(
            "research",
            "Research and information gathering",
            vec![prompt_pattern(
                r"(?i)(research|find|search|investigate|look up)",
                0.8,
                true,
            )],
            vec![outcome(
                "research_complete",
                r"(?i)(\w{50,})",
                "success",
                1.0,
            )],
            10,
        ),
        // Summarization
        rule(
            "summarization",
            "Text summarization and extraction",
            vec![prompt_pattern(
                r"(?i)(summarize|summary|extract|key points|main points)",
                0.9,
                true,
            )],
            vec![outcome(
                "summary_created",
                r"(?i)(\w{30,})",
                "success",
                1.0,
            )],
            5,
        ),
        // Sentiment analysis
        rule(
            "sentiment_analysis",
            "Sentiment analysis and emotion detection",
            vec![prompt_pattern(
                r"(?i)(sentiment|emotion|feeling|tone|mood)",
                0.8,
                true,
            )],
            vec![outcome(
                "sentiment_detected",
                r"(?i)(positive|negative|neutral|happy|sad|angry)",
                "success",
                1.0,
            )],
            3,
        ),
        // Question answering
        rule(
            "question_answering",
            "Question answering and knowledge retrieval",
            vec![prompt_pattern(
                r"(?i)(what|how|why|when|where|who|which)",
                0.7,
                true,
            )],
            vec![outcome(
                "answer_provided",
                r"(?i)(\w{20,})",
                "success",
                1.0,
            )],
            5,
        ),
    ]
}
