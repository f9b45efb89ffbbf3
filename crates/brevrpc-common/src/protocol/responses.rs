//! brevrpc Response Types
//!
//! This module defines the body carried by RESPONSE frames.

use serde::{Deserialize, Serialize};

/// The outcome of one request, sent back on the connection it arrived on.
///
/// # Response Flow
///
/// 1. Server decodes a `Request` frame and hands it to a dispatch worker
/// 2. The worker invokes the handler and builds a `Response` (success or error)
/// 3. The response is encoded with the request's codec and written in a
///    RESPONSE frame that reuses the request id
/// 4. The client resolves the pending call registered under that id
///
/// The frame header's status byte mirrors which of the two fields is set:
/// `SUCCESS` frames carry `result`, `FAIL` frames carry `error`.
///
/// # Example
///
/// ```
/// use brevrpc_common::protocol::responses::Response;
///
/// let ok = Response::success(b"encoded".to_vec());
/// assert!(ok.is_success());
///
/// let failed = Response::error("service not exist: Foo#1.0.0");
/// assert!(!failed.is_success());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Encoded return value (present on success)
    #[serde(with = "serde_bytes")]
    pub result: Option<Vec<u8>>,
    /// Stringified remote error (present on failure)
    pub error: Option<String>,
}

impl Response {
    /// Creates a successful response around an already encoded result.
    pub fn success(result: Vec<u8>) -> Self {
        Response {
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failed response.
    ///
    /// The remote error is carried as text only; it never crosses the wire
    /// as a structured error value.
    pub fn error(message: impl Into<String>) -> Self {
        Response {
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
