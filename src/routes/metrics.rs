use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition of the verification metrics.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}

/// Register descriptions for every metric the service emits.
pub fn describe() {
    metrics::describe_counter!(
        "entity_verification_jobs_enqueued_total",
        "Verification jobs added to the queue"
    );
    metrics::describe_counter!(
        "entity_verification_jobs_completed_total",
        "Verification runs that reached a terminal state, by status"
    );
    metrics::describe_counter!(
        "entity_verification_drain_failures_total",
        "Queue entries whose processing failed"
    );
    metrics::describe_histogram!(
        "entity_verification_processing_seconds",
        "Time to verify one queued entity"
    );
    metrics::describe_gauge!(
        "entity_verification_queue_depth",
        "Pending entries in the verification queue"
    );
}
