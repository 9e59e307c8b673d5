//! Audit log interceptor
//!
//! Logs every background request for compliance and debugging. Entries
//! record what was asked and by whom, never the payload or the result.

use crate::interceptors::{InterceptorDecision, RequestContext, RequestInterceptor};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entry in the audit log
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: DateTime<Utc>,
    entry_type: &'static str,
    request_id: u64,
    operation: &'a str,
    origin: &'a str,
    error_code: Option<&'static str>,
    duration_ms: u64,
    status: &'static str,
}

/// Writer for audit log entries
struct AuditLogWriter {
    path: PathBuf,
}

impl AuditLogWriter {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, entry: &AuditEntry<'_>) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Interceptor that logs all requests to a file
pub struct AuditLogInterceptor {
    writer: Arc<Mutex<AuditLogWriter>>,
}

impl AuditLogInterceptor {
    /// Create a new audit log interceptor
    ///
    /// # Arguments
    /// * `log_path` - Path to the audit log file (JSONL format)
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(AuditLogWriter::new(log_path.into()))),
        }
    }

    async fn append(&self, entry: AuditEntry<'_>) {
        let writer = self.writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            tracing::warn!(error = %e, "Failed to write audit log entry");
        }
    }
}

#[async_trait]
impl RequestInterceptor for AuditLogInterceptor {
    async fn intercept(&self, context: &RequestContext) -> InterceptorDecision {
        self.append(AuditEntry {
            timestamp: Utc::now(),
            entry_type: "request_start",
            request_id: context.id,
            operation: &context.operation,
            origin: &context.origin,
            error_code: None,
            duration_ms: 0,
            status: "pending",
        })
        .await;

        // Audit logging never blocks
        InterceptorDecision::Allow
    }

    async fn on_complete(&self, context: &RequestContext, outcome: &Result<Value>, duration_ms: u64) {
        let (error_code, status) = match outcome {
            Ok(_) => (None, "success"),
            Err(e) => (Some(e.code()), "error"),
        };

        self.append(AuditEntry {
            timestamp: Utc::now(),
            entry_type: "request_complete",
            request_id: context.id,
            operation: &context.operation,
            origin: &context.origin,
            error_code,
            duration_ms,
            status,
        })
        .await;
    }
}
