//! Connection Error Taxonomy
//!
//! The closed set of failure kinds shared by every transport backend.
//! All public operations return these as typed results; nothing panics
//! or escapes past the transport boundary.

use thiserror::Error;

/// Failures reported by the connection layer.
///
/// The `*Failed` variants carry a description of the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Malformed endpoint descriptor.
    #[error("invalid endpoint name")]
    InvalidName,

    /// A connect attempt is already in flight; the request was rejected,
    /// not queued.
    #[error("connect already in progress")]
    Connecting,

    /// The radio is not in a usable state (permission or power).
    #[error("bluetooth radio is not usable")]
    RadioUnavailable,

    /// Scanning or accessory matching produced nothing.
    #[error("no compatible device found")]
    NoCompatibleDevice,

    /// The send deadline elapsed with bytes still unsent.
    #[error("send timed out")]
    SendTimeout,

    /// No terminated response arrived before the read deadline.
    #[error("receive timed out")]
    ReceiveTimeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Empty or otherwise unusable input (e.g. an empty target list).
    #[error("invalid data")]
    InvalidData,

    #[error("not connected to a device")]
    NotConnected,

    /// The active transport does not implement this operation.
    #[error("operation not supported by this transport")]
    Unsupported,

    #[error("unknown error")]
    Unknown,
}
