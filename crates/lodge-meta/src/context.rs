//! Per-request tracing context.

use tracing::{info_span, Span};

/// Correlates the log lines of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    trace_id: String,
}

impl RequestContext {
    /// Uses the caller's trace id.
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// Generates a random trace id.
    pub fn generate() -> Self {
        Self::new(hex::encode(rand::random::<[u8; 8]>()))
    }

    /// Uses `trace_id` when present and non-empty, otherwise generates one.
    pub fn from_trace_id(trace_id: Option<String>) -> Self {
        match trace_id {
            Some(id) if !id.trim().is_empty() => Self::new(id),
            _ => Self::generate(),
        }
    }

    /// Returns the trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Opens the span every log line of `method` is emitted under.
    pub fn span(&self, method: &'static str) -> Span {
        info_span!("request", trace = %self.trace_id, method)
    }
}
