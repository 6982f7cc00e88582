use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use strum::Display;

use crate::models::image::EncodedImage;

/// Provider-specific request form describing one unit of work.
pub type JobRequest = Map<String, Value>;

/// A remote job that has been accepted and must be polled.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub task_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// What a submission resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The provider returned the artifact inline; no polling needed.
    ImmediateResult(EncodedImage),
    Pending(JobHandle),
    Failed(ErrorDetail),
}

/// What a single status query resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Done(EncodedImage),
    Running(TaskStatus),
    Failed(ErrorDetail),
}

impl PollResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollResult::Running(_))
    }
}

/// Which layer of the remote service rejected the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorSource {
    /// Outer envelope error (gateway, signature, throttling).
    Transport,
    /// Response matched no recognized shape.
    Protocol,
    /// The service's own rejection code or failed status.
    Business,
}

/// Error code as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Int(i64),
    Text(String),
}

impl ErrorCode {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(ErrorCode::Int),
            Value::String(s) => Some(ErrorCode::Text(s.clone())),
            _ => None,
        }
    }

    /// Zero or an empty string; the service uses these to mean "no code".
    pub fn is_blank(&self) -> bool {
        match self {
            ErrorCode::Int(code) => *code == 0,
            ErrorCode::Text(code) => code.trim().is_empty(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Int(code) => write!(f, "{code}"),
            ErrorCode::Text(code) => f.write_str(code),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Int(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::Text(code.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        ErrorCode::Text(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub source: ErrorSource,
}

impl ErrorDetail {
    pub fn transport(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: ErrorSource::Transport,
        }
    }

    pub fn business(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: ErrorSource::Business,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from("unrecognized_response"),
            message: message.into(),
            source: ErrorSource::Protocol,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error {}: {}", self.source, self.code, self.message)
    }
}

/// Status field of a running job; providers mix integer and string codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Int(i64),
    Text(String),
    Missing,
}

/// Status values meaning the job finished successfully.
const SUCCESS_CODES: [i64; 2] = [1, 10000];
const SUCCESS_TEXT: [&str; 2] = ["done", "success"];

/// Status values meaning the job failed for good.
const FAILURE_CODES: [i64; 2] = [2, -1];
const FAILURE_TEXT: [&str; 1] = ["failed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Succeeded,
    Failed,
    Running,
}

impl TaskStatus {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| integral(n.as_f64()?))
                .map_or(TaskStatus::Missing, TaskStatus::Int),
            Some(Value::String(s)) => TaskStatus::Text(s.clone()),
            _ => TaskStatus::Missing,
        }
    }

    pub fn class(&self) -> StatusClass {
        match self {
            TaskStatus::Int(code) if SUCCESS_CODES.contains(code) => StatusClass::Succeeded,
            TaskStatus::Text(text) if SUCCESS_TEXT.contains(&text.as_str()) => StatusClass::Succeeded,
            TaskStatus::Int(code) if FAILURE_CODES.contains(code) => StatusClass::Failed,
            TaskStatus::Text(text) if FAILURE_TEXT.contains(&text.as_str()) => StatusClass::Failed,
            _ => StatusClass::Running,
        }
    }

    pub fn as_code(&self) -> ErrorCode {
        match self {
            TaskStatus::Int(code) => ErrorCode::Int(*code),
            TaskStatus::Text(text) => ErrorCode::Text(text.clone()),
            TaskStatus::Missing => ErrorCode::from("none"),
        }
    }
}

/// `1.0` and `1` are the same status.
fn integral(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Int(code) => write!(f, "{code}"),
            TaskStatus::Text(text) => f.write_str(text),
            TaskStatus::Missing => f.write_str("none"),
        }
    }
}
