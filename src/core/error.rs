//! Error types for the PLAYLINK transport layer.

use thiserror::Error;

/// Errors from encoding or decoding the channel frame envelope.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame body was not valid JSON or did not match the envelope shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame exceeds the maximum allowed wire size.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Encoded size of the offending frame.
        size: usize,
        /// Maximum size permitted on the wire.
        max: usize,
    },
}

/// Errors from the peer signaling exchange.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// HTTP request to the signaling endpoint failed.
    #[error("signaling request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Signaling server reported failure or returned no answer.
    #[error("offer rejected by signaling server")]
    Rejected,

    /// Remote answer carried no usable relay candidate.
    #[error("no usable remote candidate")]
    NoRemoteCandidate,
}

/// Errors from a single transport adapter connection attempt.
///
/// These are recovered locally by the session manager's fallback loop and
/// are never surfaced individually to callers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection establishment failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The attempt did not complete within its wall-clock bound.
    #[error("connection attempt timed out")]
    Timeout,

    /// The adapter cannot use the given endpoint.
    #[error("unusable endpoint: {0}")]
    BadEndpoint(String),

    /// Frame envelope error on this connection.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Peer signaling error.
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// The underlying connection is closed.
    #[error("connection closed")]
    Closed,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Every candidate transport was tried and failed. Terminal.
    #[error("no transport succeeded after {attempts} attempt(s)")]
    NoTransportSucceeded {
        /// Number of candidates that were actually attempted.
        attempts: usize,
    },

    /// The session is no longer connected.
    #[error("session disconnected")]
    Disconnected,
}

/// Top-level PLAYLINK errors.
#[derive(Debug, Error)]
pub enum PlaylinkError {
    /// Frame envelope error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
