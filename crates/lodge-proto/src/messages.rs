//! Client-facing request and response messages.

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, Metadata};

/// One client operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Provision the caller's home directory
    Home,
    /// Create a directory
    Mkdir {
        /// Logical path
        path: String,
    },
    /// Describe a resource
    Stat {
        /// Logical path
        path: String,
        /// Include direct children of a container
        #[serde(default)]
        children: bool,
    },
    /// Copy a resource
    Cp {
        /// Source logical path
        src: String,
        /// Destination logical path
        dst: String,
    },
    /// Move a resource
    Mv {
        /// Source logical path
        src: String,
        /// Destination logical path
        dst: String,
    },
    /// Remove a resource and its subtree
    Rm {
        /// Logical path
        path: String,
    },
}

impl Operation {
    /// Returns the operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Home => "home",
            Operation::Mkdir { .. } => "mkdir",
            Operation::Stat { .. } => "stat",
            Operation::Cp { .. } => "cp",
            Operation::Mv { .. } => "mv",
            Operation::Rm { .. } => "rm",
        }
    }
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id chosen by the caller, generated by the service if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Token identifying the caller
    pub access_token: String,
    /// The operation
    #[serde(flatten)]
    pub op: Operation,
}

impl Request {
    /// Creates a request without a trace id.
    pub fn new(access_token: impl Into<String>, op: Operation) -> Self {
        Self {
            trace_id: None,
            access_token: access_token.into(),
            op,
        }
    }

    /// Sets the trace id.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// A response to a client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Operation succeeded without a payload
    Ack,
    /// Stat result
    Metadata {
        /// The metadata
        metadata: Metadata,
    },
    /// Operation failed
    Error {
        /// Error class
        code: ErrorCode,
        /// Human readable detail
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_flat() {
        let req = Request::new(
            "tok",
            Operation::Cp {
                src: "a".into(),
                dst: "b".into(),
            },
        )
        .with_trace_id("t-1");

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "cp");
        assert_eq!(json["src"], "a");
        assert_eq!(json["trace_id"], "t-1");
        assert_eq!(req.op.name(), "cp");
    }

    #[test]
    fn test_stat_children_defaults_to_false() {
        let req: Request =
            serde_json::from_str(r#"{"access_token":"tok","op":"stat","path":"x"}"#).unwrap();
        assert_eq!(
            req.op,
            Operation::Stat {
                path: "x".into(),
                children: false
            }
        );
        assert!(req.trace_id.is_none());
    }
}
