/// Error types for the real-time conversation layer
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Channel auth failed for {channel} (status {status}): {message}")]
    ChannelAuth {
        channel: String,
        status: u16,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Subscription rejected for {channel}: {message}")]
    Subscription { channel: String, message: String },

    #[error("Channel already subscribed: {0}")]
    DuplicateSubscription(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RealtimeError {
    /// Errors that only mean "no live updates this session"
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            RealtimeError::SessionUnavailable(_)
                | RealtimeError::ChannelAuth { .. }
                | RealtimeError::Subscription { .. }
                | RealtimeError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
