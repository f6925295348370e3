use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct ResearchMetrics {
    runs: Counter<u64>,
    searches: Counter<u64>,
    loops: Histogram<f64>,
    duration_ms: Histogram<f64>,
}

static METRICS: OnceCell<ResearchMetrics> = OnceCell::new();

fn handles() -> &'static ResearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("prosearch.research");
        ResearchMetrics {
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Total research runs by status")
                .init(),
            searches: meter
                .u64_counter("web_searches_total")
                .with_description("Web search tasks executed")
                .init(),
            loops: meter
                .f64_histogram("research_loops")
                .with_description("Reflection loops performed per run")
                .init(),
            duration_ms: meter
                .f64_histogram("research_run_duration_ms")
                .with_description("Research run wall time in milliseconds")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("PROSEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "PROSEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export research metrics."
        );
    }
}

/// Count a completed search batch (no-op if no provider installed).
pub fn record_search_batch(batch_size: usize) {
    handles().searches.add(batch_size as u64, &[]);
}

/// Values recorded for one finished run.
#[derive(Debug, PartialEq)]
struct RunObservation {
    attrs: Vec<KeyValue>,
    loops: Option<f64>,
    duration_ms: f64,
}

fn observe_run(status: &str, loops: Option<u32>, duration_ms: u64) -> RunObservation {
    RunObservation {
        attrs: vec![KeyValue::new("status", status.to_string())],
        loops: loops.map(f64::from),
        duration_ms: duration_ms as f64,
    }
}

/// Record the end of a run. Runs that aborted before a loop count was known
/// pass `None` and stay out of the loop histogram.
pub fn record_run(status: &str, loops: Option<u32>, duration_ms: u64) {
    let metrics = handles();
    let observation = observe_run(status, loops, duration_ms);

    metrics.runs.add(1, &observation.attrs);
    if let Some(loops) = observation.loops {
        metrics.loops.record(loops, &observation.attrs);
    }
    metrics
        .duration_ms
        .record(observation.duration_ms, &observation.attrs);
}
