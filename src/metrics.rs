//! Prometheus-backed observability (spec §8, ambient stack), grounded in
//! the teacher's `src/metrics.rs` / `crates/cdp-adapter/src/metrics.rs`
//! registration pattern. Mounting these behind an HTTP `/metrics` route is
//! the external router's job (out of scope, spec §1); this module only
//! owns registration and rendering.

use once_cell::sync::{Lazy, OnceCell};
use prometheus::{HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

static SAMPLER_EVENTS: OnceCell<IntCounterVec> = OnceCell::new();
static BUDGET_DENIALS: OnceCell<IntCounterVec> = OnceCell::new();
static RECORDING_EVENTS: OnceCell<IntCounterVec> = OnceCell::new();
static CONSOLE_EVENTS: OnceCell<IntCounterVec> = OnceCell::new();
static CYCLE_LATENCY: OnceCell<HistogramVec> = OnceCell::new();

/// Registers all studio metrics exactly once; safe to call repeatedly.
pub fn register() {
    REGISTER_ONCE.get_or_init(|| {
        register_counter(
            &SAMPLER_EVENTS,
            "studio_sampler_events_total",
            "Frame sampler accept/skip decisions",
            &["outcome"],
        );
        register_counter(
            &BUDGET_DENIALS,
            "studio_budget_denials_total",
            "Budget controller denials by reason",
            &["reason"],
        );
        register_counter(
            &RECORDING_EVENTS,
            "studio_recording_events_total",
            "Recording engine lifecycle transitions",
            &["event"],
        );
        register_counter(
            &CONSOLE_EVENTS,
            "studio_console_events_total",
            "Console capture events by level",
            &["level"],
        );
        register_histogram(
            &CYCLE_LATENCY,
            "studio_perception_cycle_duration_ms",
            "Perception loop cycle duration",
        );
    });
}

fn register_counter(
    cell: &OnceCell<IntCounterVec>,
    name: &str,
    help: &str,
    labels: &[&str],
) {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("valid counter metric definition");
    if let Err(err) = REGISTRY.register(Box::new(counter.clone())) {
        tracing::error!(?err, name, "failed to register counter metric");
    }
    let _ = cell.set(counter);
}

fn register_histogram(cell: &OnceCell<HistogramVec>, name: &str, help: &str) {
    let histogram = HistogramVec::new(
        prometheus::histogram_opts!(
            name,
            help,
            vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
        ),
        &["outcome"],
    )
    .expect("valid histogram metric definition");
    if let Err(err) = REGISTRY.register(Box::new(histogram.clone())) {
        tracing::error!(?err, name, "failed to register histogram metric");
    }
    let _ = cell.set(histogram);
}

pub fn sampler_accept() {
    register();
    if let Some(metric) = SAMPLER_EVENTS.get() {
        metric.with_label_values(&["accept"]).inc();
    }
}

pub fn sampler_skip() {
    register();
    if let Some(metric) = SAMPLER_EVENTS.get() {
        metric.with_label_values(&["skip"]).inc();
    }
}

pub fn budget_denied(reason: &str) {
    register();
    if let Some(metric) = BUDGET_DENIALS.get() {
        metric.with_label_values(&[reason]).inc();
    }
}

pub fn recording_event(event: &str) {
    register();
    if let Some(metric) = RECORDING_EVENTS.get() {
        metric.with_label_values(&[event]).inc();
    }
}

pub fn console_event(level: &str) {
    register();
    if let Some(metric) = CONSOLE_EVENTS.get() {
        metric.with_label_values(&[level]).inc();
    }
}

pub fn observe_cycle_duration(outcome: &str, duration_ms: f64) {
    register();
    if let Some(metric) = CYCLE_LATENCY.get() {
        metric.with_label_values(&[outcome]).observe(duration_ms);
    }
}

/// Render the global registry in Prometheus text exposition format.
pub fn render() -> String {
    register();
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!(?err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
