//! Scalar telemetry sinks for per-epoch metric series.

use std::sync::Mutex;

/// Receives `(series, value, step)` scalars.
pub trait TelemetrySink: Send + Sync {
    fn add_scalar(&self, series: &str, value: f64, step: i64);
}

/// Emits every scalar as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn add_scalar(&self, series: &str, value: f64, step: i64) {
        tracing::info!(target: "evalscore::telemetry", series, value, step, "scalar");
    }
}

/// Keeps every scalar in memory, in arrival order.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    records: Mutex<Vec<ScalarRecord>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub series: String,
    pub value: f64,
    pub step: i64,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ScalarRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn add_scalar(&self, series: &str, value: f64, step: i64) {
        if let Ok(mut records) = self.records.lock() {
            records.push(ScalarRecord {
                series: series.to_string(),
                value,
                step,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_records_in_order() {
        let sink = InMemoryTelemetry::new();
        sink.add_scalar("Train/valid_accuracy", 71.5, 2);
        sink.add_scalar("Train/valid_f1", 0.5, 2);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].series, "Train/valid_accuracy");
        assert_eq!(records[1].step, 2);
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingTelemetry.add_scalar("Train/valid_accuracy", 1.0, 0);
    }
}
