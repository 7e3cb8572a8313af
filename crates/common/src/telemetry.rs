//! Telemetry contract consumed by the orchestrator.
//!
//! Emission is fire-and-forget: sinks swallow their own failures so a
//! broken sink can never fail a protection operation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ErrorCode;

/// Completion events raised by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventName {
    DataEncryptCompleted = 1001,
    DataDecryptCompleted = 1002,
    DataDeleteCompleted = 1003,
    EncryptionKeyRotationCompleted = 1004,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::DataEncryptCompleted => "DataEncryptCompleted",
            EventName::DataDecryptCompleted => "DataDecryptCompleted",
            EventName::DataDeleteCompleted => "DataDeleteCompleted",
            EventName::EncryptionKeyRotationCompleted => "EncryptionKeyRotationCompleted",
        }
    }

    pub fn key(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timed section of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySpan {
    pub name: String,
    pub elapsed_ms: u64,
    pub nest_level: u32,
}

/// Shared list collecting the spans of one operation.
pub type SpanList = Arc<Mutex<Vec<TelemetrySpan>>>;

/// Records a [`TelemetrySpan`] into its list when dropped.
pub struct SpanMeasure {
    name: &'static str,
    nest_level: u32,
    started: Instant,
    spans: SpanList,
}

impl SpanMeasure {
    pub fn start(name: &'static str, spans: &SpanList) -> Self {
        Self::start_nested(name, 1, spans)
    }

    pub fn start_nested(name: &'static str, nest_level: u32, spans: &SpanList) -> Self {
        Self {
            name,
            nest_level,
            started: Instant::now(),
            spans: Arc::clone(spans),
        }
    }
}

impl Drop for SpanMeasure {
    fn drop(&mut self) {
        let span = TelemetrySpan {
            name: self.name.to_string(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            nest_level: self.nest_level,
        };
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span);
        }
    }
}

/// Drains a span list into an owned vector.
pub fn take_spans(spans: &SpanList) -> Vec<TelemetrySpan> {
    spans
        .lock()
        .map(|mut guard| std::mem::take(&mut *guard))
        .unwrap_or_default()
}

/// Per-item detail of a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryWarning {
    pub key: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Event attributes, keyed by name.
pub type Attributes = BTreeMap<String, Value>;

/// Destination for orchestrator telemetry.
pub trait TelemetrySink: Send + Sync {
    fn raise_event<'a>(
        &'a self,
        name: EventName,
        correlation_id: &'a str,
        spans: Vec<TelemetrySpan>,
        attributes: Attributes,
    ) -> BoxFuture<'a, ()>;

    fn raise_error<'a>(
        &'a self,
        code: ErrorCode,
        message: &'a str,
        correlation_id: &'a str,
    ) -> BoxFuture<'a, ()>;

    fn raise_warning<'a>(
        &'a self,
        message: &'a str,
        warnings: Vec<TelemetryWarning>,
        correlation_id: &'a str,
    ) -> BoxFuture<'a, ()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTelemetry;

impl TelemetrySink for NoOpTelemetry {
    fn raise_event<'a>(
        &'a self,
        _name: EventName,
        _correlation_id: &'a str,
        _spans: Vec<TelemetrySpan>,
        _attributes: Attributes,
    ) -> BoxFuture<'a, ()> {
        Box::pin(future::ready(()))
    }

    fn raise_error<'a>(
        &'a self,
        _code: ErrorCode,
        _message: &'a str,
        _correlation_id: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(future::ready(()))
    }

    fn raise_warning<'a>(
        &'a self,
        _message: &'a str,
        _warnings: Vec<TelemetryWarning>,
        _correlation_id: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(future::ready(()))
    }
}

/// Emits telemetry as structured `tracing` records.
#[derive(Debug, Clone)]
pub struct TracingTelemetry {
    source: String,
}

impl TracingTelemetry {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Default for TracingTelemetry {
    fn default() -> Self {
        Self::new("data-encryption-service")
    }
}

impl TelemetrySink for TracingTelemetry {
    fn raise_event<'a>(
        &'a self,
        name: EventName,
        correlation_id: &'a str,
        spans: Vec<TelemetrySpan>,
        attributes: Attributes,
    ) -> BoxFuture<'a, ()> {
        let duration_ms = spans
            .iter()
            .find(|span| span.nest_level == 1)
            .map(|span| span.elapsed_ms);
        let attributes = serde_json::to_string(&attributes).unwrap_or_default();
        info!(
            source = %self.source,
            event = %name,
            event_key = name.key(),
            correlation_id,
            duration_ms = ?duration_ms,
            attributes = %attributes,
            "telemetry event"
        );
        Box::pin(future::ready(()))
    }

    fn raise_error<'a>(
        &'a self,
        code: ErrorCode,
        message: &'a str,
        correlation_id: &'a str,
    ) -> BoxFuture<'a, ()> {
        warn!(
            source = %self.source,
            code = code.as_u32(),
            code_name = code.name(),
            correlation_id,
            error_message = message,
            "telemetry error"
        );
        Box::pin(future::ready(()))
    }

    fn raise_warning<'a>(
        &'a self,
        message: &'a str,
        warnings: Vec<TelemetryWarning>,
        correlation_id: &'a str,
    ) -> BoxFuture<'a, ()> {
        let details = serde_json::to_string(&warnings).unwrap_or_default();
        warn!(
            source = %self.source,
            correlation_id,
            details = %details,
            warning = message,
            "telemetry warning"
        );
        Box::pin(future::ready(()))
    }
}
