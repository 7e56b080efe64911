//! Performance metrics for query planning and execution
//!
//! Recording goes through the `metrics` facade. Nothing is collected until the
//! process owner installs a recorder, normally the Prometheus exporter below.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Installs the Prometheus exporter as the process-wide recorder
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// Record a successfully generated plan stage ("logical", "physical", "state")
pub fn record_plan_built(stage: &'static str, steps: usize) {
    counter!("tscoord.plan.built", "stage" => stage).increment(1);
    histogram!("tscoord.plan.steps", "stage" => stage).record(steps as f64);
}

/// Record a query execution and its outcome
pub fn record_query(duration_ms: f64, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("tscoord.query.executions", "outcome" => outcome).increment(1);
    histogram!("tscoord.query.duration_ms").record(duration_ms);
}

/// Record one fan-out/fan-in batch
pub fn record_parallel_batch(requests: usize, failed: usize) {
    histogram!("tscoord.parallel.requests").record(requests as f64);
    counter!("tscoord.parallel.failed").increment(failed as u64);
}

/// Record a backend that rejected a fanned-out write
pub fn record_fanout_write_failure() {
    counter!("tscoord.fanout.write_failures").increment(1);
}
