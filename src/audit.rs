//! Lifecycle audit records written as newline-delimited JSON.
//!
//! The orchestrator reports lifecycle points through the [`AuditSink`]
//! trait; it never opens the audit file itself. [`JsonlAuditLogger`] is the
//! file-backed implementation, [`NoopAudit`] the default when no audit file
//! is configured. Secrets never reach this module: messages are sanitized
//! before records are built.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use crate::error::CategorizedError;

/// Outcome state of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditStatus {
    /// The operation has started and not yet finished.
    InProgress,
    /// The operation finished successfully.
    Success,
    /// The operation finished with an error.
    Failure,
}

/// A single structured audit record.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    /// Lifecycle point, e.g. `model_invocation`.
    pub operation: String,
    /// Outcome state at the time of the record.
    pub status: AuditStatus,
    /// Run-scoped correlation identifier.
    pub correlation_id: String,
    /// RFC 3339 timestamp of the record.
    pub timestamp: String,
    /// Operation inputs worth auditing (model names, counts, flags).
    pub inputs: serde_json::Value,
    /// Operation outputs worth auditing (token counts, file paths).
    pub outputs: serde_json::Value,
    /// Sanitized error description, null on success.
    pub error: Option<AuditError>,
}

/// Error details carried in a failure record.
#[derive(Debug, Serialize)]
pub struct AuditError {
    /// Error category label.
    pub category: String,
    /// Sanitized message.
    pub message: String,
    /// Opaque remote request identifier, empty when none.
    pub request_id: String,
}

impl AuditRecord {
    /// Build a record with the current timestamp and empty payloads.
    pub fn new(
        operation: impl Into<String>,
        status: AuditStatus,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            status,
            correlation_id: correlation_id.into(),
            timestamp: Utc::now().to_rfc3339(),
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
            error: None,
        }
    }

    /// Attach input fields.
    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Attach output fields.
    pub fn with_outputs(mut self, outputs: serde_json::Value) -> Self {
        self.outputs = outputs;
        self
    }

    /// Attach a categorized error; its message is already sanitized.
    pub fn with_error(mut self, err: &CategorizedError) -> Self {
        self.error = Some(AuditError {
            category: err.category.label().to_owned(),
            message: err.message.clone(),
            request_id: err.request_id.clone(),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Receiver of audit records at orchestrator lifecycle points.
pub trait AuditSink: Send + Sync {
    /// Record one lifecycle event. Implementations must not panic; sink
    /// failures are logged and swallowed by callers.
    fn record(&self, record: AuditRecord);
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _record: AuditRecord) {}
}

/// Audit logger appending one JSON object per line to a writer.
pub struct JsonlAuditLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlAuditLogger {
    /// Create a logger appending to the given file path.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create a logger from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn write_record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl AuditSink for JsonlAuditLogger {
    fn record(&self, record: AuditRecord) {
        if let Err(e) = self.write_record(&record) {
            tracing::warn!(operation = %record.operation, error = %e, "audit write failed");
        }
    }
}
