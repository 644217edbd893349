//! Error types for the acquisition gateway.

use std::borrow::Cow;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, DatacollError>;

/// Gateway error types.
///
/// Uses `Cow<'static, str>` to avoid allocations for static error messages.
#[derive(Debug, Error)]
pub enum DatacollError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(Cow<'static, str>),

    /// Not connected to remote
    #[error("Not connected")]
    NotConnected,

    /// Connection timeout (T0 expired before STARTDT handshake finished)
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(Cow<'static, str>),

    /// Invalid ASDU
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(Cow<'static, str>),

    /// Send sequence number of a received I-frame does not match our rsn
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Peer acknowledged frames that were never sent
    #[error("Receive sequence number {peer_rsn} outside send window (ssn={ssn})")]
    AckOutOfWindow { ssn: u16, peer_rsn: u16 },

    /// T1 expired without the peer confirming an outstanding act frame
    #[error("Confirmation timeout: no reply within T1")]
    AckTimeout,

    /// Outstanding-command queue is full, user command refused
    #[error("Command queue full ({0} outstanding)")]
    QueueFull(usize),

    /// Store (key-value / pub-sub) error
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity missing from the store
    #[error("Not found: {0}")]
    NotFound(Cow<'static, str>),

    /// Configuration field missing or unparsable
    #[error("Config error: {0}")]
    Config(Cow<'static, str>),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(Cow<'static, str>),
}

impl DatacollError {
    /// Create a protocol error with a static message (zero allocation).
    #[inline]
    pub const fn protocol_static(msg: &'static str) -> Self {
        Self::Protocol(Cow::Borrowed(msg))
    }

    /// Create a protocol error with a dynamic message.
    #[inline]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(Cow::Owned(msg.into()))
    }

    /// Create an invalid frame error with a static message (zero allocation).
    #[inline]
    pub const fn invalid_frame_static(msg: &'static str) -> Self {
        Self::InvalidFrame(Cow::Borrowed(msg))
    }

    /// Create an invalid frame error with a dynamic message.
    #[inline]
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(Cow::Owned(msg.into()))
    }

    /// Create an invalid ASDU error with a static message (zero allocation).
    #[inline]
    pub const fn invalid_asdu_static(msg: &'static str) -> Self {
        Self::InvalidAsdu(Cow::Borrowed(msg))
    }

    /// Create an invalid ASDU error with a dynamic message.
    #[inline]
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(Cow::Owned(msg.into()))
    }

    /// Create a not-found error.
    #[inline]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(Cow::Owned(msg.into()))
    }

    /// Create a config error.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(Cow::Owned(msg.into()))
    }

    /// Errors that indicate the transport is unusable.
    ///
    /// A session that hits one of these disconnects and schedules a reconnect;
    /// everything else is handled in place (logged, frame dropped, request
    /// refused) without touching the link.
    #[inline]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectionTimeout
                | Self::Io(_)
                | Self::SequenceMismatch { .. }
                | Self::AckOutOfWindow { .. }
                | Self::AckTimeout
        )
    }
}
