use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: generation job counters in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service records.
pub fn describe_metrics() {
    metrics::describe_counter!("generation_jobs_total", "Remote generation jobs started");
    metrics::describe_counter!(
        "generation_jobs_completed",
        "Remote generation jobs that produced an image"
    );
    metrics::describe_counter!(
        "generation_jobs_failed",
        "Remote generation jobs that failed, labelled by error kind"
    );
    metrics::describe_histogram!(
        "generation_job_seconds",
        "Wall time from submission to a terminal job state"
    );
    metrics::describe_counter!(
        "generation_poll_attempts_total",
        "Status queries sent while polling remote jobs"
    );
    metrics::describe_counter!(
        "http_generation_requests_total",
        "Generation requests received, labelled by endpoint and outcome"
    );
}
