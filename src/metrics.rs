//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to render the current metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a download attempt (first try or retry)
pub fn record_download_attempt(model_id: &str) {
    metrics::counter!("model_bootstrap_download_attempts_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a download retry scheduled by the download layer
pub fn record_download_retry(model_id: &str) {
    metrics::counter!("model_bootstrap_download_retries_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a failed download attempt
pub fn record_download_failure(model_id: &str, kind: &'static str) {
    metrics::counter!("model_bootstrap_download_failures_total",
        "model" => model_id.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record bytes written to disk
pub fn record_bytes_downloaded(model_id: &str, bytes: u64) {
    metrics::counter!("model_bootstrap_downloaded_bytes_total",
        "model" => model_id.to_string()
    )
    .increment(bytes);
}

/// Update the download progress gauge (0.0 - 1.0)
pub fn update_download_progress(model_id: &str, progress: f64) {
    metrics::gauge!("model_bootstrap_download_progress",
        "model" => model_id.to_string()
    )
    .set(progress);
}

/// Record a failed preflight probe
pub fn record_preflight_failure(stage: &'static str) {
    metrics::counter!("model_bootstrap_preflight_failures_total",
        "stage" => stage
    )
    .increment(1);
}

/// Record a context construction attempt
pub fn record_init_attempt(model_id: &str, success: bool) {
    metrics::counter!("model_bootstrap_init_attempts_total",
        "model" => model_id.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record an outer pipeline retry
pub fn record_pipeline_retry(model_id: &str) {
    metrics::counter!("model_bootstrap_pipeline_retries_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record the final pipeline outcome
pub fn record_pipeline_outcome(model_id: &str, outcome: &'static str) {
    metrics::counter!("model_bootstrap_pipeline_outcomes_total",
        "model" => model_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
