//! Application level errors shared by all services.
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Status codes for failed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// The request was malformed, e.g. a negative number for a square root
    InvalidArgument,
    /// The requested entity does not exist
    NotFound,
    /// The call did not complete before its deadline
    DeadlineExceeded,
}

/// An error that is sent over the wire as part of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{code:?}: {message}")]
pub struct RpcStatus {
    /// What kind of failure this is
    pub code: StatusCode,
    /// Human readable description
    pub message: String,
}

impl std::error::Error for RpcStatus {}

impl RpcStatus {
    /// Create a new status.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// An [StatusCode::InvalidArgument] status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    /// A [StatusCode::NotFound] status.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    /// A [StatusCode::DeadlineExceeded] status.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }
}
