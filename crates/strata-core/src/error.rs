//! Error types for the transport core.
//!
//! This module defines the central `Error` enum shared by every protocol
//! binding. Errors fall into three families that the server lifecycle treats
//! differently:
//!
//! - Instance-fatal: `Bind`, `Resolve`, `UnsupportedNetwork` and
//!   `InvalidConfig`. A resolution error is cached by the listener gate and
//!   handed to every later caller, so `Error` is `Clone`.
//! - Lifecycle: `AlreadyStarted`, `Stopped` and `Serve`. Stopping twice or
//!   stopping an instance that never started is not an error and never
//!   produces these.
//! - Per-call: `Call`, `Status`, `DeadlineExceeded`, `Cancelled` and
//!   `Panicked`. These only ever reach the caller of a single request.
//!
//! `From<Error>` for `tonic::Status` lets a binding surface any of them to a
//! gRPC client with the matching status code.

use core::fmt;
use std::io;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for servers, middleware and handlers.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The server configuration was rejected while building it.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The configured network kind is not one of `tcp`, `tcp4` or `tcp6`.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// The listener could not be created.
    #[error("Failed to bind {address}: {message}")]
    Bind {
        address: String,
        kind: io::ErrorKind,
        message: String,
    },

    /// The bound address could not be turned into an advertisable endpoint.
    #[error("Failed to resolve endpoint for {address}: {reason}")]
    Resolve { address: String, reason: String },

    /// `start` was called on an instance that is already serving.
    #[error("Server already started")]
    AlreadyStarted,

    /// The instance has been stopped and cannot serve again.
    #[error("Server is stopped")]
    Stopped,

    /// The protocol engine's serve loop exited with an error.
    #[error("Serve loop failed: {reason}")]
    Serve { reason: String },

    /// A handler or middleware rejected the call.
    #[error("{code:?}: {message}")]
    Call { code: Code, message: String },

    /// A status a protocol handler replied with. Details and metadata are kept
    /// so the reply reaches the caller as the handler wrote it.
    #[error("{0}")]
    Status(ReplyStatus),

    /// The merged deadline of the call elapsed before a reply was produced.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled by the client or by server shutdown.
    #[error("Request cancelled")]
    Cancelled,

    /// A panic inside the handler chain was caught by recovery middleware.
    #[error("Handler panicked: {message}")]
    Panicked { message: String },

    /// A registrar or discovery backend failed.
    #[error("Registry error: {reason}")]
    Registry { reason: String },
}

impl Error {
    /// Builds a per-call error with an explicit status code.
    pub fn call(code: Code, message: impl Into<String>) -> Self {
        Self::Call {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn bind(address: &str, err: &io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Status code a client observes for this error.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidConfig { .. } | Self::UnsupportedNetwork(_) => Code::InvalidArgument,
            Self::Bind { .. } | Self::Resolve { .. } | Self::Registry { .. } => Code::Unavailable,
            Self::AlreadyStarted => Code::FailedPrecondition,
            Self::Stopped | Self::Serve { .. } => Code::Unavailable,
            Self::Call { code, .. } => *code,
            Self::Status(status) => status.get().code(),
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::Cancelled => Code::Cancelled,
            Self::Panicked { .. } => Code::Internal,
        }
    }

    /// Returns `true` for errors that are local to a single call.
    pub fn is_call_local(&self) -> bool {
        matches!(
            self,
            Self::Call { .. }
                | Self::Status(_)
                | Self::DeadlineExceeded
                | Self::Cancelled
                | Self::Panicked { .. }
        )
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Call { code, message } => Status::new(code, message),
            Error::Status(status) => status.into_inner(),
            Error::Panicked { .. } => Status::internal("Internal server error"),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::Status(ReplyStatus::new(status))
    }
}

/// A [`Status`] carried inside [`Error`] without losing any of its parts.
#[derive(Clone, Debug)]
pub struct ReplyStatus(Box<Status>);

impl ReplyStatus {
    pub fn new(status: Status) -> Self {
        Self(Box::new(status))
    }

    pub fn get(&self) -> &Status {
        &self.0
    }

    pub fn into_inner(self) -> Status {
        *self.0
    }
}

// Metadata is left out: `MetadataMap` has no equality.
impl PartialEq for ReplyStatus {
    fn eq(&self, other: &Self) -> bool {
        self.0.code() == other.0.code()
            && self.0.message() == other.0.message()
            && self.0.details() == other.0.details()
    }
}

impl Eq for ReplyStatus {}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.0.code(), self.0.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_errors_keep_their_code() {
        let status: Status = Error::call(Code::PermissionDenied, "nope").into();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(status.message(), "nope");
    }

    #[test]
    fn panics_do_not_leak_details() {
        let status: Status = Error::Panicked {
            message: "index out of bounds".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("index"));
    }

    #[test]
    fn handler_status_survives_the_round_trip() {
        let mut status =
            Status::with_details(Code::FailedPrecondition, "quota", b"rich-detail"[..].into());
        status
            .metadata_mut()
            .insert("x-retry-after", "5".parse().unwrap());

        let err = Error::from(status);
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert!(err.is_call_local());
        assert!(!Error::Stopped.is_call_local());

        let back = Status::from(err);
        assert_eq!(back.code(), Code::FailedPrecondition);
        assert_eq!(back.message(), "quota");
        assert_eq!(back.details(), b"rich-detail");
        assert_eq!(back.metadata().get("x-retry-after").unwrap(), "5");
    }

    #[test]
    fn handler_deadline_keeps_its_message() {
        let err = Error::from(Status::deadline_exceeded("db query slow"));
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(Status::from(err).message(), "db query slow");
    }
}
