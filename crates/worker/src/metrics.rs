//! Prometheus metrics for the worker process.
//!
//! Counters and histograms live in tally-core and update inline as runs
//! execute. The gauges here are snapshotted from the orchestrator right
//! before each scrape.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use tally_core::OrchestratorStatus;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "tally_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Receipt runs currently in flight (collected dynamically).
pub static RUNS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "tally_runs_active",
        "Number of receipt runs currently in flight",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(RUNS_ACTIVE.clone())).unwrap();

    // Core metrics (engine, orchestrator, LLM clients)
    for metric in tally_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Update gauges from the current orchestrator state.
pub fn collect_dynamic_metrics(status: &OrchestratorStatus) {
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    RUNS_ACTIVE.set(status.active_runs as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_dynamic_metrics_updates_gauges() {
        let status = OrchestratorStatus {
            running: true,
            active_runs: 3,
            max_concurrent_runs: 4,
        };
        collect_dynamic_metrics(&status);
        assert_eq!(ORCHESTRATOR_RUNNING.get(), 1);
        assert_eq!(RUNS_ACTIVE.get(), 3);

        let status = OrchestratorStatus {
            running: false,
            active_runs: 0,
            max_concurrent_runs: 4,
        };
        collect_dynamic_metrics(&status);
        assert_eq!(ORCHESTRATOR_RUNNING.get(), 0);
        assert_eq!(RUNS_ACTIVE.get(), 0);
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        ORCHESTRATOR_RUNNING.set(0);
        tally_core::metrics::RUNS_STARTED.inc();

        let output = encode_metrics();
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
        assert!(output.contains("tally_orchestrator_running"));
        assert!(output.contains("tally_runs_started_total"));
    }
}
