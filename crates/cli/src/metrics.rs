//! Prometheus registry for the batch binary.
//!
//! Counters live in `workbooks_core::metrics`; this module registers them and
//! writes the text exposition for a node-exporter textfile collector.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use workbooks_core::metrics::all_metrics;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        // A collector can only fail to register if its name is taken
        let _ = registry.register(metric);
    }
    let _ = registry.register(Box::new(LAST_RUN_TIMESTAMP.clone()));
    registry
});

/// Unix time at which the metrics were written.
pub static LAST_RUN_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "workbooks_last_run_timestamp_seconds",
        "Unix time the last workbooks command finished",
    )
    .unwrap()
});

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}

/// Write the metrics to `path`, via a temporary file so collectors never read
/// a partial file.
pub fn write_metrics(path: &Path) -> Result<()> {
    LAST_RUN_TIMESTAMP.set(unix_now_secs());
    let text = encode_metrics()?;

    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move metrics to {:?}", path))?;
    Ok(())
}

fn unix_now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use workbooks_core::metrics::RECORDS_VERIFIED;

    #[test]
    fn test_write_metrics_file() {
        RECORDS_VERIFIED.with_label_values(&["passed"]).inc();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workbooks.prom");

        write_metrics(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("workbooks_records_verified_total"));
        assert!(text.contains("workbooks_last_run_timestamp_seconds"));
        assert!(!dir.path().join("workbooks.prom.tmp").exists());
    }
}
