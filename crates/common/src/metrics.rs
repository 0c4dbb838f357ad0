//! Metrics collection for Textgen
//!
//! This module provides Prometheus metrics for observability of the
//! invoke path. Metrics are registered once in a process-wide registry.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for Textgen
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub invoke: InvokeMetrics,
    pub generation: GenerationMetrics,
}

/// Invoke endpoint metrics
#[derive(Debug, Clone)]
pub struct InvokeMetrics {
    /// Total number of invoke requests
    pub requests_total: IntCounter,

    /// Total number of successful requests
    pub requests_success: IntCounter,

    /// Total number of failed requests
    pub requests_failed: IntCounter,

    /// Requests rejected before reaching the pipeline
    pub requests_rejected: IntCounter,

    /// Request duration histogram, queueing included
    pub request_duration: Histogram,

    /// Requests currently running on the pipeline
    pub active_requests: IntGauge,

    /// Requests waiting for or running on the pipeline
    pub pending_requests: IntGauge,
}

/// Generation metrics
#[derive(Debug, Clone)]
pub struct GenerationMetrics {
    /// Generation duration histogram
    pub generation_duration: Histogram,

    /// Prompt tokens processed
    pub prompt_tokens_total: IntCounter,

    /// Tokens generated total
    pub tokens_generated_total: IntCounter,

    /// Tokens per second
    pub tokens_per_second: Histogram,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    ///
    /// Panics only if metric names collide, which the fixed names below
    /// rule out.
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Invoke metrics
        let requests_total = IntCounter::new(
            "invoke_requests_total",
            "Total number of invoke requests"
        ).unwrap();

        let requests_success = IntCounter::new(
            "invoke_requests_success_total",
            "Total number of successful invoke requests"
        ).unwrap();

        let requests_failed = IntCounter::new(
            "invoke_requests_failed_total",
            "Total number of failed invoke requests"
        ).unwrap();

        let requests_rejected = IntCounter::new(
            "invoke_requests_rejected_total",
            "Invoke requests rejected by admission control"
        ).unwrap();

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "invoke_request_duration_seconds",
                "Invoke request duration in seconds"
            ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0])
        ).unwrap();

        let active_requests = IntGauge::new(
            "invoke_active_requests",
            "Current number of invocations running on the pipeline"
        ).unwrap();

        let pending_requests = IntGauge::new(
            "invoke_pending_requests",
            "Current number of invocations waiting for or running on the pipeline"
        ).unwrap();

        // Generation metrics
        let generation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "generation_duration_seconds",
                "Text generation duration in seconds"
            ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
        ).unwrap();

        let prompt_tokens_total = IntCounter::new(
            "generation_prompt_tokens_total",
            "Total number of prompt tokens processed"
        ).unwrap();

        let tokens_generated_total = IntCounter::new(
            "generation_tokens_generated_total",
            "Total number of tokens generated"
        ).unwrap();

        let tokens_per_second = Histogram::with_opts(
            HistogramOpts::new(
                "generation_tokens_per_second",
                "Tokens generated per second"
            ).buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0])
        ).unwrap();

        // Register all metrics
        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(requests_success.clone())).unwrap();
        registry.register(Box::new(requests_failed.clone())).unwrap();
        registry.register(Box::new(requests_rejected.clone())).unwrap();
        registry.register(Box::new(request_duration.clone())).unwrap();
        registry.register(Box::new(active_requests.clone())).unwrap();
        registry.register(Box::new(pending_requests.clone())).unwrap();

        registry.register(Box::new(generation_duration.clone())).unwrap();
        registry.register(Box::new(prompt_tokens_total.clone())).unwrap();
        registry.register(Box::new(tokens_generated_total.clone())).unwrap();
        registry.register(Box::new(tokens_per_second.clone())).unwrap();

        let invoke = InvokeMetrics {
            requests_total,
            requests_success,
            requests_failed,
            requests_rejected,
            request_duration,
            active_requests,
            pending_requests,
        };

        let generation = GenerationMetrics {
            generation_duration,
            prompt_tokens_total,
            tokens_generated_total,
            tokens_per_second,
        };

        MetricsRegistry {
            registry,
            invoke,
            generation,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Record token counts of a finished generation
    ///
    /// The generation duration itself is observed by the caller.
    pub fn record_generation(&self, prompt_tokens: usize, generated_tokens: usize, seconds: f64) {
        self.generation.prompt_tokens_total.inc_by(prompt_tokens as u64);
        self.generation.tokens_generated_total.inc_by(generated_tokens as u64);
        if seconds > 0.0 {
            self.generation
                .tokens_per_second
                .observe(generated_tokens as f64 / seconds);
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.invoke.requests_total.inc();
        metrics.invoke.pending_requests.set(3);
        metrics.record_generation(5, 10, 0.5);

        let output = metrics.gather();
        assert!(output.contains("invoke_requests_total 1"));
        assert!(output.contains("invoke_pending_requests 3"));
        assert!(output.contains("generation_tokens_generated_total 10"));
        assert!(output.contains("generation_prompt_tokens_total 5"));
    }

    #[test]
    fn test_latency_timer() {
        let metrics = MetricsRegistry::new();
        let value = metrics.generation.generation_duration.time(|| 42);

        assert_eq!(value, 42);
        assert_eq!(metrics.generation.generation_duration.get_sample_count(), 1);
    }
}
