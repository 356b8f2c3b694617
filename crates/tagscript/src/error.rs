use std::{io, result::Result as StdResult};

use thiserror::Error;

use crate::field::Tag;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Error type for harness operations.
pub enum Error {
    /// I/O error with a message.
    #[error("IO error: {message}")]
    Io {
        /// Error message details.
        message: String,
    },

    /// Malformed wire data.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Transport URI could not be parsed.
    #[error("Invalid transport URI '{uri}': {reason}")]
    InvalidUri {
        /// The URI as given.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The connector failed to establish a connection.
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed {
        /// Target endpoint.
        endpoint: String,
        /// Error message details.
        message: String,
    },

    /// The connection attempt did not finish in time.
    #[error("Connecting to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The connection is closed; nothing more can be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The I/O driver thread is no longer running.
    #[error("I/O driver stopped")]
    DriverStopped,

    /// An expected tag is absent from the received message.
    #[error("missing field: {tag}")]
    MissingField {
        /// The absent tag.
        tag: Tag,
    },

    /// An expected tag is present with a different value.
    #[error("value mismatch for tag {tag}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        /// The tag that differs.
        tag: Tag,
        /// Expected value.
        expected: String,
        /// Received value.
        actual: String,
    },

    /// No message arrived within the receive ceiling.
    #[error("receive timed out after {waited_ms}ms")]
    ReceiveTimeout {
        /// Total wait in milliseconds.
        waited_ms: u64,
    },
}

impl Error {
    /// Create a ConnectFailed error
    pub fn connect_failed(endpoint: impl ToString, message: impl ToString) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an InvalidUri error
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Short, stable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Codec(_) => "codec",
            Self::InvalidUri { .. } => "invalid_uri",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::DriverStopped => "driver_stopped",
            Self::MissingField { .. } => "missing_field",
            Self::ValueMismatch { .. } => "value_mismatch",
            Self::ReceiveTimeout { .. } => "receive_timeout",
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Result alias using the crate error type.
pub type Result<T> = StdResult<T, Error>;
