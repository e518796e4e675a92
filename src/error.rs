//! Error types for aerobio-client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Send attempted on a closed channel, or the connection's internal
    /// channel has gone away.
    #[error("Channel closed")]
    ChannelClosed,

    /// The remote end closed the connection.
    #[error("Transport closed (code {code}): {reason}")]
    TransportClosed { code: u16, reason: String },

    /// I/O failure on the underlying transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A decoded frame is missing its `op` or `payload` field, or carries
    /// an operation tag this client does not know.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// I/O error while starting runtimes or worker threads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (text encoding).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// A scheduled task panicked or was dropped before producing a result.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Non-blocking submit found the scheduler's work queue full.
    #[error("Scheduler work queue is full")]
    SchedulerFull,

    /// The connection stopped before the operation could complete.
    #[error("Connection stopped")]
    ConnectionStopped,
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        let reason = e.to_string();
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Error::TransportClosed {
                code: 1000,
                reason,
            },
            _ => Error::Transport(reason),
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
