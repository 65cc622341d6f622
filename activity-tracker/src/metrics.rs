use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct TrackerMetrics {
    registry: Registry,
    ingestion_submits: IntCounterVec,
    ingestion_flush_latency: Histogram,
    overflow_depth: IntGauge,
    rate_checks: IntCounterVec,
    cache_lookups: IntCounterVec,
}

impl TrackerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ingestion_submits = IntCounterVec::new(
            Opts::new("tracker_ingestion_submits_total", "Total activity records submitted"),
            &["outcome"],
        )?;
        let ingestion_flush_latency = Histogram::with_opts(HistogramOpts::new(
            "tracker_ingestion_flush_seconds",
            "Time spent flushing the pending batch to the durable log store",
        ))?;
        let overflow_depth = IntGauge::with_opts(Opts::new(
            "tracker_overflow_depth",
            "Current number of entries held in the overflow buffer",
        ))?;
        let rate_checks = IntCounterVec::new(
            Opts::new("tracker_rate_limit_checks_total", "Total rate limit checks"),
            &["outcome"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("tracker_cache_lookups_total", "Analytics cache lookups"),
            &["result"],
        )?;

        registry.register(Box::new(ingestion_submits.clone()))?;
        registry.register(Box::new(ingestion_flush_latency.clone()))?;
        registry.register(Box::new(overflow_depth.clone()))?;
        registry.register(Box::new(rate_checks.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;

        Ok(Self {
            registry,
            ingestion_submits,
            ingestion_flush_latency,
            overflow_depth,
            rate_checks,
            cache_lookups,
        })
    }

    pub fn record_submit(&self, outcome: &str) {
        self.ingestion_submits.with_label_values(&[outcome]).inc();
    }

    pub fn observe_flush_latency(&self, seconds: f64) {
        self.ingestion_flush_latency.observe(seconds);
    }

    pub fn set_overflow_depth(&self, depth: i64) {
        self.overflow_depth.set(depth);
    }

    pub fn record_rate_check(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.rate_checks.with_label_values(&[outcome]).inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
