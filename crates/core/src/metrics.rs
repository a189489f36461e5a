//! Prometheus metrics for the pipeline stages.
//!
//! Counters are process-wide; a run's totals are written out by the binary
//! at the end of the batch.

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};

/// Input documents checked, by result.
pub static RECORDS_VERIFIED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "workbooks_records_verified_total",
            "Input documents checked against their referral",
        ),
        &["result"], // "passed", "mismatch", "malformed", "unreadable"
    )
    .unwrap()
});

/// Job launch attempts, by result.
pub static JOBS_LAUNCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("workbooks_jobs_launched_total", "Workbook job launch attempts"),
        &["result"], // "submitted", "reused", "failed"
    )
    .unwrap()
});

/// Job polls, by observed state.
pub static JOBS_POLLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("workbooks_jobs_polled_total", "Workbook job status polls"),
        &["state"], // "done", "failed", "pending", "missing_output", "error"
    )
    .unwrap()
});

/// Artifact downloads, by result.
pub static ARTIFACTS_FETCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "workbooks_artifacts_fetched_total",
            "Workbook artifact downloads",
        ),
        &["result"], // "delivered", "failed"
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(RECORDS_VERIFIED.clone()),
        Box::new(JOBS_LAUNCHED.clone()),
        Box::new(JOBS_POLLED.clone()),
        Box::new(ARTIFACTS_FETCHED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_all_metrics_register() {
        let registry = Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        RECORDS_VERIFIED.with_label_values(&["passed"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "workbooks_records_verified_total"));
    }
}
