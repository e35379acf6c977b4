//! Prometheus metrics for image-service.
//!
//! Recording helpers are no-ops until [`init_metrics`] has run, so handlers
//! and tests can call them unconditionally.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP endpoint metrics
pub static IMAGE_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static STREAM_CHUNKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Provider metrics
pub static PROVIDER_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static PROVIDER_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Reference image fetch metrics
pub static IMAGE_FETCH_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static IMAGE_FETCH_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let image_requests = IntCounterVec::new(
        Opts::new("image_requests_total", "Total image endpoint requests"),
        &["endpoint", "status"],
    )?;

    let stream_chunks = IntCounterVec::new(
        Opts::new("image_stream_chunks_total", "Total NDJSON chunks streamed"),
        &["chunk_type"],
    )?;

    let provider_latency = HistogramVec::new(
        HistogramOpts::new(
            "image_provider_latency_seconds",
            "Image provider API latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        &["provider", "operation"],
    )?;

    let provider_errors = IntCounterVec::new(
        Opts::new("image_provider_errors_total", "Total image provider errors"),
        &["provider", "error_type"],
    )?;

    let fetch_duration = HistogramVec::new(
        HistogramOpts::new(
            "image_fetch_duration_seconds",
            "Reference image download duration in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["outcome"],
    )?;

    let fetch_errors = IntCounterVec::new(
        Opts::new("image_fetch_errors_total", "Total reference image download errors"),
        &["error_type"],
    )?;

    registry.register(Box::new(image_requests.clone()))?;
    registry.register(Box::new(stream_chunks.clone()))?;
    registry.register(Box::new(provider_latency.clone()))?;
    registry.register(Box::new(provider_errors.clone()))?;
    registry.register(Box::new(fetch_duration.clone()))?;
    registry.register(Box::new(fetch_errors.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = IMAGE_REQUESTS_TOTAL.set(image_requests);
    let _ = STREAM_CHUNKS_TOTAL.set(stream_chunks);
    let _ = PROVIDER_LATENCY_SECONDS.set(provider_latency);
    let _ = PROVIDER_ERRORS_TOTAL.set(provider_errors);
    let _ = IMAGE_FETCH_DURATION_SECONDS.set(fetch_duration);
    let _ = IMAGE_FETCH_ERRORS_TOTAL.set(fetch_errors);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

// Helper functions for recording metrics

/// Record a finished request to one of the image endpoints.
pub fn record_image_request(endpoint: &str, status: u16) {
    if let Some(counter) = IMAGE_REQUESTS_TOTAL.get() {
        let status = status.to_string();
        counter.with_label_values(&[endpoint, status.as_str()]).inc();
    }
}

/// Record one NDJSON chunk written to a client.
pub fn record_stream_chunk(chunk_type: &str) {
    if let Some(counter) = STREAM_CHUNKS_TOTAL.get() {
        counter.with_label_values(&[chunk_type]).inc();
    }
}

/// Record provider latency.
pub fn record_provider_latency(provider: &str, operation: &str, duration_secs: f64) {
    if let Some(histogram) = PROVIDER_LATENCY_SECONDS.get() {
        histogram
            .with_label_values(&[provider, operation])
            .observe(duration_secs);
    }
}

/// Record a provider error.
pub fn record_provider_error(provider: &str, error_type: &str) {
    if let Some(counter) = PROVIDER_ERRORS_TOTAL.get() {
        counter.with_label_values(&[provider, error_type]).inc();
    }
}

/// Record a reference image download.
pub fn record_image_fetch(outcome: &str, duration_secs: f64) {
    if let Some(histogram) = IMAGE_FETCH_DURATION_SECONDS.get() {
        histogram.with_label_values(&[outcome]).observe(duration_secs);
    }
}

/// Record a failed reference image download.
pub fn record_image_fetch_error(error_type: &str) {
    if let Some(counter) = IMAGE_FETCH_ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type]).inc();
    }
}
