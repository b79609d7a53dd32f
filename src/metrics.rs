use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // Pre-register counters so they appear even before the first increment.
    for outcome in ["success", "deferred", "busy", "conflict", "rejected", "failed"] {
        counter!("snipe_executions_total", "outcome" => outcome).absolute(0);
    }
    counter!("positions_closed_total", "reason" => "stop_loss").absolute(0);
    counter!("positions_closed_total", "reason" => "take_profit").absolute(0);
    counter!("positions_closed_total", "reason" => "manual").absolute(0);

    // Pre-register gauges at zero.
    gauge!("snipe_targets_eligible").set(0.0);
    gauge!("open_positions").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("snipe_execution_latency_seconds").record(0.0);

    handle
}
