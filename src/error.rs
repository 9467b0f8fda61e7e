//! Error handling for the packet bridge
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the library. Every recoverable condition in the pipeline is
//! carried as a [`BridgeError`] value; only the binary converts it into a
//! process exit status.

use crate::pipeline::PushError;
use thiserror::Error;

/// Main error type for packet bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport hardware is not connected or not ready
    ///
    /// This is the expected idle state of an intermittently attached radio
    /// or serial device, not a failure.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Reading from the transport failed
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// The packet queue stayed full for the whole push timeout
    #[error("Queue full: batch of {packets} packet(s) dropped")]
    QueueFull { packets: usize },

    /// The packet queue was closed for shutdown before the push
    #[error("Queue closed: batch of {packets} packet(s) dropped")]
    QueueClosed { packets: usize },

    /// The publish sink could not establish its connection
    #[error("Sink connection error: {0}")]
    SinkConnect(String),

    /// Publish attempted while the sink is not connected
    #[error("Sink not connected")]
    NotConnected,

    /// The sink failed to deliver a payload
    #[error("Publish error on topic '{topic}': {message}")]
    Publish { topic: String, message: String },

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Shutdown was requested before the operation finished
    #[error("Interrupted")]
    Interrupted,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BridgeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error only means "no hardware right now"
    ///
    /// Context wrappers are looked through.
    pub fn is_unavailable(&self) -> bool {
        match self {
            BridgeError::SourceUnavailable(_) => true,
            BridgeError::WithContext { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }

    /// Create a publish error for a topic
    pub fn publish(topic: &str, message: impl Into<String>) -> Self {
        BridgeError::Publish {
            topic: topic.to_string(),
            message: message.into(),
        }
    }
}

impl From<PushError> for BridgeError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::Full(batch) => BridgeError::QueueFull {
                packets: batch.len(),
            },
            PushError::Closed(batch) => BridgeError::QueueClosed {
                packets: batch.len(),
            },
        }
    }
}

impl From<rustls::Error> for BridgeError {
    fn from(err: rustls::Error) -> Self {
        BridgeError::Tls(err.to_string())
    }
}

/// Result type alias for packet bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| BridgeError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| BridgeError::Io(e).with_context(f()))
    }
}
