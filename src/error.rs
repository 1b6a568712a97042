// src/error.rs
// Error types for the relay, the push notifier and the client session.

use thiserror::Error;

/// Malformed or unknown signaling traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("malformed packet: {0}")]
    Packet(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection refused: missing callerId")]
    MissingIdentity,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push delivery is not configured")]
    NotConfigured,

    #[error("credential error: {0}")]
    Auth(String),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push service returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The token will never work again; it should be forgotten.
    #[error("push token is no longer valid (HTTP {status})")]
    TokenRejected { status: u16 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to load service account: {0}")]
    ServiceAccount(String),
}

/// Failures surfaced by the client call session.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("another call is already in progress")]
    Busy,

    #[error("no pending call")]
    NoPendingCall,

    #[error("room mismatch: pending {expected}, got {got}")]
    RoomMismatch { expected: String, got: String },

    #[error("media unavailable: {0}")]
    Media(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Teardown started while the transition was still in flight.
    #[error("call was torn down")]
    Cancelled,

    #[error("signaling transport is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("client is missing {0}")]
    Incomplete(&'static str),
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Protocol(ProtocolError::Payload(e))
    }
}
