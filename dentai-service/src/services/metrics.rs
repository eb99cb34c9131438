//! Prometheus metrics for dentai-service.
//!
//! Gateway, provider and view-level counters, served at `/metrics`.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Every collector together with the registry that serves it, installed as
/// one value so recorders can never write to an unregistered collector.
struct Metrics {
    registry: Registry,
    gateway_requests: IntCounterVec,
    genai_tokens: IntCounterVec,
    provider_latency: HistogramVec,
    provider_errors: IntCounterVec,
    view_actions: IntCounterVec,
    workspaces_active: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let gateway_requests = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Total gateway operations"),
            &["operation", "model", "outcome"],
        )?;

        let genai_tokens = IntCounterVec::new(
            Opts::new("genai_tokens_total", "Total tokens processed"),
            &["model", "type"], // type: input, output
        )?;

        let provider_latency = HistogramVec::new(
            HistogramOpts::new(
                "genai_provider_latency_seconds",
                "AI provider API latency in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["provider", "model"],
        )?;

        let provider_errors = IntCounterVec::new(
            Opts::new("genai_provider_errors_total", "Total AI provider errors"),
            &["provider", "error_type"],
        )?;

        let view_actions = IntCounterVec::new(
            Opts::new("view_actions_total", "Actions dispatched to view controllers"),
            &["view", "outcome"],
        )?;

        let workspaces_active = IntGauge::new("workspaces_active", "Currently open workspaces")?;

        registry.register(Box::new(gateway_requests.clone()))?;
        registry.register(Box::new(genai_tokens.clone()))?;
        registry.register(Box::new(provider_latency.clone()))?;
        registry.register(Box::new(provider_errors.clone()))?;
        registry.register(Box::new(view_actions.clone()))?;
        registry.register(Box::new(workspaces_active.clone()))?;

        Ok(Self {
            registry,
            gateway_requests,
            genai_tokens,
            provider_latency,
            provider_errors,
            view_actions,
            workspaces_active,
        })
    }
}

/// Initialize all metrics. Calling it more than once, or from several
/// threads at once, installs exactly one set.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    // A caller that loses the race drops its whole set unused.
    let metrics = Metrics::new()?;
    if METRICS.set(metrics).is_ok() {
        tracing::info!("Prometheus metrics initialized");
    }
    Ok(())
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match METRICS.get() {
        Some(m) => &m.registry,
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

/// Record a completed gateway operation.
pub fn record_gateway_request(operation: &str, model: &str, outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.gateway_requests.with_label_values(&[operation, model, outcome]).inc();
    }
}

/// Record token usage.
pub fn record_tokens(model: &str, input_tokens: i32, output_tokens: i32) {
    if let Some(m) = METRICS.get() {
        m.genai_tokens
            .with_label_values(&[model, "input"])
            .inc_by(input_tokens.max(0) as u64);
        m.genai_tokens
            .with_label_values(&[model, "output"])
            .inc_by(output_tokens.max(0) as u64);
    }
}

/// Record provider latency.
pub fn record_provider_latency(provider: &str, model: &str, duration_secs: f64) {
    if let Some(m) = METRICS.get() {
        m.provider_latency
            .with_label_values(&[provider, model])
            .observe(duration_secs);
    }
}

/// Record a provider error.
pub fn record_provider_error(provider: &str, error_type: &str) {
    if let Some(m) = METRICS.get() {
        m.provider_errors.with_label_values(&[provider, error_type]).inc();
    }
}

/// Record the outcome of an action dispatched to a view.
pub fn record_view_action(view: &str, outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.view_actions.with_label_values(&[view, outcome]).inc();
    }
}

pub fn set_active_workspaces(count: usize) {
    if let Some(m) = METRICS.get() {
        m.workspaces_active.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_values_show_up_in_text_output() {
        init_metrics().unwrap();
        init_metrics().unwrap();

        record_gateway_request("quick_summary", "gemini-flash-lite-latest", "ok");
        record_provider_error("mock", "network_error");

        let text = get_metrics();
        assert!(text.contains("gateway_requests_total"));
        assert!(text.contains("genai_provider_errors_total"));
    }

    #[test]
    fn concurrent_initialization_keeps_recorders_registered() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(init_metrics))
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        record_view_action("concurrent_init_view", "ok");

        let text = get_metrics();
        let line = text
            .lines()
            .find(|line| line.contains("view=\"concurrent_init_view\""))
            .expect("recorded counter missing from served registry");
        assert!(line.starts_with("view_actions_total"));
        assert!(line.ends_with(" 1"));
    }
}
