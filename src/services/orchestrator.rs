//! Asynchronous generation job orchestration.
//!
//! A job is submitted once, then either resolves immediately (the provider
//! returned the artifact inline) or yields a task id that is polled at a
//! fixed interval until an artifact appears, the provider reports failure,
//! the poll budget runs out, or the caller cancels.
//!
//! ```text
//! Submitted -> Resolved | Polling
//! Polling   -> Polling | Resolved | Failed
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::image::EncodedImage;
use crate::models::job::{
    ErrorCode, ErrorDetail, JobHandle, JobOutcome, JobRequest, PollResult, StatusClass,
    TaskStatus,
};
use crate::services::decoder::{encoded_image_from, nested_image_url};

/// Business code the remote service uses for "accepted".
pub const SUCCESS_CODE: i64 = 10000;

/// Remote asynchronous task API: one call to submit, one to query.
///
/// Implementations return the raw response envelope; classifying it is the
/// orchestrator's job. Only failures to obtain an envelope at all (network,
/// undecodable body, missing credentials) are returned as errors.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn submit(&self, form: &JobRequest) -> Result<Value, JobError>;

    async fn query(&self, form: &JobRequest) -> Result<Value, JobError>;
}

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }

    /// Total time the loop may spend sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_polls
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Remote(ErrorDetail),

    #[error("Generation timed out after {budget:?} ({polls} polls)")]
    Timeout { polls: u32, budget: Duration },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Provider not configured: {0}")]
    Configuration(String),
}

impl JobError {
    pub fn transport(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        JobError::Remote(ErrorDetail::transport(code, message))
    }

    pub fn business(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        JobError::Remote(ErrorDetail::business(code, message))
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        JobError::Remote(ErrorDetail::protocol(message))
    }

    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            JobError::Remote(detail) => Some(detail),
            _ => None,
        }
    }

    /// Taxonomy label: transport, business, protocol, timeout, cancelled or
    /// configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Remote(detail) => match detail.source {
                crate::models::job::ErrorSource::Transport => "transport",
                crate::models::job::ErrorSource::Protocol => "protocol",
                crate::models::job::ErrorSource::Business => "business",
            },
            JobError::Timeout { .. } => "timeout",
            JobError::Cancelled => "cancelled",
            JobError::Configuration(_) => "configuration",
        }
    }
}

/// Check the outer envelope and return the result payload.
///
/// Precedence: a non-empty `ResponseMetadata.Error` (transport), then a
/// `code` other than [`SUCCESS_CODE`] (business). Empty errors and a zero
/// or empty `code` count as absent. The payload is `data`, or `Result` when
/// `data` is missing or empty; `Value::Null` when neither exists.
pub fn unwrap_envelope(response: &Value) -> Result<&Value, ErrorDetail> {
    if let Some(error) = response
        .get("ResponseMetadata")
        .and_then(|m| m.get("Error"))
        .filter(|e| is_present(e))
    {
        let code = error
            .get("Code")
            .and_then(ErrorCode::from_value)
            .unwrap_or_else(|| ErrorCode::from("unknown"));
        let message = error
            .get("Message")
            .and_then(Value::as_str)
            .unwrap_or("unknown transport error");
        return Err(ErrorDetail::transport(code, message));
    }

    if let Some(code) = response
        .get("code")
        .and_then(ErrorCode::from_value)
        .filter(|code| !code.is_blank())
    {
        if code != ErrorCode::Int(SUCCESS_CODE) {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ErrorDetail::business(code, message));
        }
    }

    static NULL: Value = Value::Null;
    let data = response.get("data").filter(|d| is_present(d));
    Ok(data
        .or_else(|| response.get("Result").filter(|r| is_present(r)))
        .unwrap_or(&NULL))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Classify a submission response.
pub fn interpret_submission(response: &Value) -> JobOutcome {
    let payload = match unwrap_envelope(response) {
        Ok(payload) => payload,
        Err(detail) => return JobOutcome::Failed(detail),
    };

    if let Some(image) = encoded_image_from(payload) {
        return JobOutcome::ImmediateResult(image);
    }

    match payload.get("task_id") {
        Some(Value::String(id)) if !id.is_empty() => JobOutcome::Pending(JobHandle::new(id.as_str())),
        Some(Value::Number(id)) => JobOutcome::Pending(JobHandle::new(id.to_string())),
        _ => JobOutcome::Failed(ErrorDetail::protocol(
            "no task identifier and no immediate result",
        )),
    }
}

/// Classify a status query response.
///
/// An inline artifact wins regardless of the status field, since some
/// providers update the status after the artifact is already available. A
/// success status without an extractable artifact stays `Running`.
pub fn interpret_poll(response: &Value) -> PollResult {
    let payload = match unwrap_envelope(response) {
        Ok(payload) => payload,
        Err(detail) => return PollResult::Failed(detail),
    };

    if let Some(image) = encoded_image_from(payload) {
        return PollResult::Done(image);
    }

    let status = TaskStatus::from_value(payload.get("status"));
    match status.class() {
        StatusClass::Succeeded => match nested_image_url(payload) {
            Some(url) => PollResult::Done(EncodedImage::url(url)),
            None => {
                debug!(status = %status, "Status reports success but no artifact yet");
                PollResult::Running(status)
            }
        },
        StatusClass::Failed => {
            let message = payload
                .get("reason")
                .and_then(Value::as_str)
                .map(|reason| format!("task failed with status {status}: {reason}"))
                .unwrap_or_else(|| format!("task failed with status {status}"));
            PollResult::Failed(ErrorDetail::business(status.as_code(), message))
        }
        StatusClass::Running => PollResult::Running(status),
    }
}

/// Drive one job to completion.
///
/// The sleep comes before every query, including the first, so the remote
/// job gets one interval to start. Transport and business errors are never
/// retried.
pub async fn run_job<C, F>(
    client: &C,
    submit_form: &JobRequest,
    query_form: F,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<EncodedImage, JobError>
where
    C: TaskApi + ?Sized,
    F: Fn(&str) -> JobRequest,
{
    let response = cancellable(cancel, client.submit(submit_form)).await?;

    let handle = match interpret_submission(&response) {
        JobOutcome::ImmediateResult(image) => {
            info!(inline = image.is_inline(), "Job resolved at submission");
            return Ok(image);
        }
        JobOutcome::Failed(detail) => {
            warn!(error = %detail, "Job submission rejected");
            return Err(JobError::Remote(detail));
        }
        JobOutcome::Pending(handle) => handle,
    };

    info!(
        task_id = %handle.task_id,
        interval_ms = policy.interval.as_millis() as u64,
        max_polls = policy.max_polls,
        "Job accepted, polling for result"
    );

    for attempt in 1..=policy.max_polls {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(task_id = %handle.task_id, attempt, "Job polling cancelled");
                return Err(JobError::Cancelled);
            }
            _ = sleep(policy.interval) => {}
        }

        let form = query_form(&handle.task_id);
        let response = cancellable(cancel, client.query(&form)).await?;
        metrics::counter!("generation_poll_attempts_total").increment(1);

        match interpret_poll(&response) {
            PollResult::Done(image) => {
                info!(
                    task_id = %handle.task_id,
                    attempt,
                    waited_ms = (chrono::Utc::now() - handle.submitted_at).num_milliseconds(),
                    inline = image.is_inline(),
                    "Job finished"
                );
                return Ok(image);
            }
            PollResult::Failed(detail) => {
                warn!(task_id = %handle.task_id, attempt, error = %detail, "Job failed");
                return Err(JobError::Remote(detail));
            }
            PollResult::Running(status) => {
                debug!(
                    task_id = %handle.task_id,
                    attempt,
                    max_polls = policy.max_polls,
                    status = %status,
                    "Job still running"
                );
            }
        }
    }

    warn!(
        task_id = %handle.task_id,
        budget_secs = policy.budget().as_secs_f64(),
        "Job timed out"
    );
    Err(JobError::Timeout {
        polls: policy.max_polls,
        budget: policy.budget(),
    })
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, JobError>>,
) -> Result<T, JobError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        result = call => result,
    }
}

/// Shared entry point for image flows: a task API, a poll policy and a
/// bound on how many jobs may be in flight at once.
#[derive(Clone)]
pub struct JobOrchestrator {
    api: Arc<dyn TaskApi>,
    policy: PollPolicy,
    permits: Arc<Semaphore>,
}

impl JobOrchestrator {
    pub fn new(api: Arc<dyn TaskApi>, policy: PollPolicy, max_concurrent_jobs: usize) -> Self {
        Self {
            api,
            policy,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Number of additional jobs that could start right now.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<F>(
        &self,
        submit_form: &JobRequest,
        query_form: F,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage, JobError>
    where
        F: Fn(&str) -> JobRequest,
    {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| JobError::Cancelled)?,
        };

        metrics::counter!("generation_jobs_total").increment(1);
        let start = Instant::now();
        let result = run_job(self.api.as_ref(), submit_form, query_form, self.policy, cancel).await;
        metrics::histogram!("generation_job_seconds").record(start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => metrics::counter!("generation_jobs_completed").increment(1),
            Err(e) => metrics::counter!("generation_jobs_failed", "kind" => e.kind()).increment(1),
        }
        result
    }
}
