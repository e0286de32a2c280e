//! Telemetry sink boundary
//!
//! The polling client pushes decoded values to a [`TelemetrySink`]: one
//! schema declaration per event group at startup, then one `log` call per
//! group per poll tick. The host framework supplies the real sink;
//! [`TracingSink`] renders values into the structured log stream and
//! [`MemorySink`] records calls for tests.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::{DataType, Value};

/// Telemetry field metadata declared once per event group
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub datatype: DataType,
    pub unit: String,
}

/// Consumer of named, typed, scaled poll results
pub trait TelemetrySink: Send {
    /// Declare an event group's schema before any values are logged
    fn declare_event(&mut self, event: &str, fields: &[FieldSpec]);

    /// Log one tick's values for an event group
    fn log(&mut self, event: &str, values: &[(String, Value)]);
}

/// Sink that renders telemetry into the tracing log stream
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn declare_event(&mut self, event: &str, fields: &[FieldSpec]) {
        debug!(
            target: "regtrace::telemetry",
            "declared event '{}' with {} fields",
            event,
            fields.len()
        );
    }

    fn log(&mut self, event: &str, values: &[(String, Value)]) {
        let rendered = values
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "regtrace::telemetry", "{event}: {rendered}");
    }
}

#[derive(Debug, Default)]
struct MemorySinkInner {
    declared: Vec<(String, Vec<FieldSpec>)>,
    records: Vec<(String, Vec<(String, Value)>)>,
}

/// Sink that records every call, for inspection from tests
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkInner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared event names in declaration order
    pub fn declared_events(&self) -> Vec<String> {
        self.inner
            .lock()
            .declared
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn declared_fields(&self, event: &str) -> Option<Vec<FieldSpec>> {
        self.inner
            .lock()
            .declared
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, fields)| fields.clone())
    }

    /// All logged records, in emission order
    pub fn records(&self) -> Vec<(String, Vec<(String, Value)>)> {
        self.inner.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }
}

impl TelemetrySink for MemorySink {
    fn declare_event(&mut self, event: &str, fields: &[FieldSpec]) {
        self.inner
            .lock()
            .declared
            .push((event.to_string(), fields.to_vec()));
    }

    fn log(&mut self, event: &str, values: &[(String, Value)]) {
        self.inner
            .lock()
            .records
            .push((event.to_string(), values.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        sink.declare_event(
            "voltage",
            &[FieldSpec {
                name: "l1".to_string(),
                datatype: DataType::Float32,
                unit: "V".to_string(),
            }],
        );
        sink.log("voltage", &[("l1".to_string(), Value::Float(230.0))]);
        sink.log("voltage", &[("l1".to_string(), Value::Float(231.0))]);

        assert_eq!(sink.declared_events(), vec!["voltage"]);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1[0].1, Value::Float(230.0));
    }
}
