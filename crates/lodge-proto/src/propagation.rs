//! Messages exchanged with the propagation service.

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, Record};

/// A request to the propagation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PropRequest {
    /// Fetch the record for a path, creating it first if `force_creation` is set
    Get {
        /// Logical path
        path: String,
        /// Caller's access token
        access_token: String,
        /// Materialize the record instead of failing not-found
        force_creation: bool,
    },
    /// Create or refresh the record for a path
    Put {
        /// Logical path
        path: String,
        /// Caller's access token
        access_token: String,
    },
    /// Rename the records of a path and its descendants
    Mv {
        /// Source logical path
        src: String,
        /// Destination logical path
        dst: String,
        /// Caller's access token
        access_token: String,
    },
    /// Remove the records of a path and its descendants
    Rm {
        /// Logical path
        path: String,
        /// Caller's access token
        access_token: String,
    },
}

impl PropRequest {
    /// Returns the operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            PropRequest::Get { .. } => "get",
            PropRequest::Put { .. } => "put",
            PropRequest::Mv { .. } => "mv",
            PropRequest::Rm { .. } => "rm",
        }
    }
}

/// A response from the propagation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PropResponse {
    /// Record returned by Get
    Record {
        /// The record
        record: Record,
    },
    /// Put, Mv and Rm succeeded
    Ack,
    /// Request failed
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
    fn test_wire_shape() {
        let req = PropRequest::Get {
            path: "local/users/h/hugo".into(),
            access_token: "tok".into(),
            force_creation: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "get");
        assert_eq!(json["force_creation"], true);

        let resp: PropResponse =
            serde_json::from_str(r#"{"status":"error","code":"not_found","message":"x"}"#)
                .unwrap();
        assert_eq!(
            resp,
            PropResponse::Error {
                code: ErrorCode::NotFound,
                message: "x".into()
            }
        );
    }
}
