//! Shared test doubles and HTTP helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use scriptframe_gen::models::job::JobRequest;
use scriptframe_gen::services::orchestrator::{JobError, TaskApi};

use crate::fixtures;

/// What the scripted API answers to a submission.
pub enum SubmitReply {
    Envelope(Value),
    /// The call itself fails, as a network error would.
    TransportFailure(String),
}

/// A `TaskApi` that replays scripted responses and records every call.
///
/// Queries beyond the scripted ones answer "still running".
pub struct ScriptedApi {
    submit: SubmitReply,
    queries: Mutex<VecDeque<Value>>,
    submits: AtomicUsize,
    query_count: AtomicUsize,
    task_ids: Mutex<Vec<String>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedApi {
    pub fn new(submit: Value, queries: impl IntoIterator<Item = Value>) -> Self {
        Self::with_reply(SubmitReply::Envelope(submit), queries)
    }

    pub fn with_reply(submit: SubmitReply, queries: impl IntoIterator<Item = Value>) -> Self {
        Self {
            submit,
            queries: Mutex::new(queries.into_iter().collect()),
            submits: AtomicUsize::new(0),
            query_count: AtomicUsize::new(0),
            task_ids: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Re-arm the query script (e.g. for a second job on the same API).
    pub fn push_queries(&self, queries: impl IntoIterator<Item = Value>) {
        self.queries.lock().unwrap().extend(queries);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn queried_task_ids(&self) -> Vec<String> {
        self.task_ids.lock().unwrap().clone()
    }

    pub fn call_log(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskApi for ScriptedApi {
    async fn submit(&self, _form: &JobRequest) -> Result<Value, JobError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("submit");
        match &self.submit {
            SubmitReply::Envelope(value) => Ok(value.clone()),
            SubmitReply::TransportFailure(message) => {
                Err(JobError::transport("connect_failed", message.clone()))
            }
        }
    }

    async fn query(&self, form: &JobRequest) -> Result<Value, JobError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("query");
        if let Some(task_id) = form.get("task_id").and_then(Value::as_str) {
            self.task_ids.lock().unwrap().push(task_id.to_string());
        }
        Ok(self
            .queries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(fixtures::running))
    }
}

/// Query form builder used by the orchestrator tests.
pub fn query_form(task_id: &str) -> JobRequest {
    let mut form = JobRequest::new();
    form.insert("req_key".into(), "jimeng_t2i_v40".into());
    form.insert("task_id".into(), task_id.into());
    form
}

pub fn submit_form(prompt: &str) -> JobRequest {
    let mut form = JobRequest::new();
    form.insert("req_key".into(), "jimeng_t2i_v40".into());
    form.insert("prompt".into(), prompt.into());
    form
}

/// POST a JSON body to a running server and decode the JSON answer.
pub async fn post_json(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    body: &Value,
) -> Result<(u16, Value), Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{base_url}{path}"))
        .json(body)
        .send()
        .await?;
    let status = response.status().as_u16();
    let json = response.json().await?;
    Ok((status, json))
}
