//! Boundary to the external chemistry parser.
//!
//! Whatever shape the parser answers with (raw Turtle text, a JSON object with
//! a nested payload, a JSON error) is normalized here into [`ParseOutcome`] so
//! the coordinator never inspects parser output.

mod command;

pub use command::CommandParserGateway;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Metadata handed to the parser alongside the file path.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParseMetadata {
    pub filename: String,
    /// RFC 3339 timestamp of the ingestion attempt.
    pub timestamp: String,
    pub source: String,
}

/// Why a parse produced nothing to commit.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseFailure {
    /// The parser ran and reported an error, or produced an empty payload.
    Rejected(String),
    /// The parser could not be started at all.
    Unavailable(String),
    /// The parser did not answer within the configured timeout.
    TimedOut(Duration),
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::Rejected(reason) => write!(f, "parse failed: {}", reason),
            ParseFailure::Unavailable(reason) => write!(f, "parser unavailable: {}", reason),
            ParseFailure::TimedOut(after) => write!(f, "parser timed out after {}ms", after.as_millis()),
        }
    }
}

/// Normalized parser result
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Success(String),
    Failure(ParseFailure),
}

impl ParseOutcome {
    /// Wrap a payload, treating empty or error-only text as a rejection.
    pub fn from_payload(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        if payload.trim().is_empty() {
            return ParseOutcome::Failure(ParseFailure::Rejected("empty payload".to_string()));
        }
        if let Some(reason) = error_only_payload(&payload) {
            return ParseOutcome::Failure(ParseFailure::Rejected(reason));
        }
        ParseOutcome::Success(payload)
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        ParseOutcome::Failure(ParseFailure::Rejected(reason.into()))
    }
}

/// The cclib parser prints `# Error: ...` instead of Turtle when it cannot read a file.
fn error_only_payload(payload: &str) -> Option<String> {
    let mut reason = None;
    for line in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.strip_prefix("# Error:") {
            Some(msg) if reason.is_none() => reason = Some(msg.trim().to_string()),
            Some(_) => {}
            None => return None,
        }
    }
    reason
}

/// Normalize parser stdout into a [`ParseOutcome`].
///
/// Accepts raw text, `{"error": ..}`, `{"payload"|"rdf"|"turtle"|"content": ..}`
/// and the same keys nested under `result`.
pub fn normalize_parser_output(stdout: &str) -> ParseOutcome {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return normalize_json(&value);
        }
    }
    ParseOutcome::from_payload(stdout)
}

fn normalize_json(value: &Value) -> ParseOutcome {
    const PAYLOAD_KEYS: [&str; 4] = ["payload", "rdf", "turtle", "content"];

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        let reason = match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return ParseOutcome::rejected(reason);
    }

    for key in PAYLOAD_KEYS {
        if let Some(Value::String(text)) = value.get(key) {
            return ParseOutcome::from_payload(text.clone());
        }
    }

    match value.get("result") {
        Some(Value::String(text)) => ParseOutcome::from_payload(text.clone()),
        Some(nested @ Value::Object(_)) => normalize_json(nested),
        _ => ParseOutcome::rejected("parser returned JSON without a payload"),
    }
}

/// Turns one output file into a semantic-fact payload.
#[async_trait]
pub trait ParserGateway: Send + Sync {
    async fn parse(&self, file_path: &Path, metadata: &ParseMetadata) -> ParseOutcome;
}
