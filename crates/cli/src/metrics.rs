//! Prometheus metrics export.
//!
//! A crawl is a batch job, so metrics are written once to a file for a
//! node exporter textfile collector rather than served.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in sitecrawl_core::metrics::all_metrics() {
        if let Err(e) = registry.register(metric) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }
    registry
});

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}

/// Write the text exposition to `path`, replacing it atomically.
pub fn write_metrics(path: &Path) -> Result<()> {
    let text = encode_metrics()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move metrics to {:?}", path))?;
    Ok(())
}
