//! Error and status types shared by hosts and execution provider plugins.
//!
//! Every fallible call across the plugin boundary returns [`Result`]. Hosts that
//! need a machine-checkable code convert the error with [`EpError::status`].

use std::fmt;

use thiserror::Error;

/// Result type for plugin and host operations.
pub type Result<T> = std::result::Result<T, EpError>;

/// Machine-checkable status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic failure.
    Fail,
    /// Missing or malformed argument.
    InvalidArgument,
    /// Operator, element type, or feature not implemented.
    NotImplemented,
    /// Graph structure violates a host invariant.
    InvalidGraph,
    /// An execution provider broke its contract with the host.
    EpFail,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fail => "FAIL",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::InvalidGraph => "INVALID_GRAPH",
            Self::EpFail => "EP_FAIL",
        };
        f.write_str(name)
    }
}

/// A status object carrying an error code and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Error code.
    pub code: ErrorCode,
    /// Message describing the failure.
    pub message: String,
}

impl Status {
    /// Create a new status.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

/// Errors raised across the plugin boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EpError {
    /// Missing or malformed input, e.g. an absent tensor or undersized buffer.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operator or element type the provider does not implement.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A host service call failed. The host's status is kept unchanged.
    #[error(transparent)]
    Host(Status),

    /// The host could not provide a requested buffer.
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// Graph structure is inconsistent.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A provider returned results that violate the protocol.
    #[error("Execution provider failure: {0}")]
    EpFailure(String),
}

impl EpError {
    /// Status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Unsupported(_) => ErrorCode::NotImplemented,
            Self::Host(status) => status.code,
            Self::AllocationFailure(_) => ErrorCode::Fail,
            Self::InvalidGraph(_) => ErrorCode::InvalidGraph,
            Self::EpFailure(_) => ErrorCode::EpFail,
        }
    }

    /// Convert into a status object. Host statuses are returned as-is.
    pub fn status(&self) -> Status {
        match self {
            Self::Host(status) => status.clone(),
            Self::InvalidArgument(msg)
            | Self::Unsupported(msg)
            | Self::AllocationFailure(msg)
            | Self::InvalidGraph(msg)
            | Self::EpFailure(msg) => Status::new(self.code(), msg.clone()),
        }
    }
}

impl From<Status> for EpError {
    fn from(status: Status) -> Self {
        Self::Host(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_status_passes_through_unchanged() {
        let status = Status::new(ErrorCode::InvalidGraph, "node 3 has no inputs");
        let err = EpError::from(status.clone());

        assert_eq!(err.code(), ErrorCode::InvalidGraph);
        assert_eq!(err.status(), status);
        assert_eq!(err.to_string(), status.to_string());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            EpError::InvalidArgument("x".into()).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            EpError::Unsupported("f64".into()).code(),
            ErrorCode::NotImplemented
        );
        assert_eq!(
            EpError::AllocationFailure("out".into()).code(),
            ErrorCode::Fail
        );

        let status = EpError::Unsupported("element type F64".into()).status();
        assert_eq!(status.code, ErrorCode::NotImplemented);
        assert_eq!(status.message, "element type F64");
    }
}
