//! Unified error types for the event correlator.
//!
//! Error codes:
//! - CORR_001-002: Configuration errors
//! - STORE_001-004: Group store errors
//! - ROUTE_001-002: Routing / aggregation errors
//! - STREAM_001-003: Streaming errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorCode {
    /// CORR_001: No correlation key could be resolved for an event
    MissingCorrelationKey,
    /// CORR_002: Invalid correlator setting
    InvalidSetting,
}

impl ConfigErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCorrelationKey => "CORR_001",
            Self::InvalidSetting => "CORR_002",
        }
    }
}

/// Group store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// STORE_001: Key already exists in the partition
    AlreadyExists,
    /// STORE_002: Key not found in the partition
    NotFound,
    /// STORE_003: Backend I/O failure
    Io,
    /// STORE_004: Group could not be (de)serialized
    Serialization,
}

impl StoreErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "STORE_001",
            Self::NotFound => "STORE_002",
            Self::Io => "STORE_003",
            Self::Serialization => "STORE_004",
        }
    }
}

/// Routing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingErrorCode {
    /// ROUTE_001: The policy failed to aggregate a group
    AggregationFailed,
    /// ROUTE_002: A group timed out before completing
    CorrelationTimeout,
    /// ROUTE_003: A completed result could not be handed downstream
    DeliveryFailed,
}

impl RoutingErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AggregationFailed => "ROUTE_001",
            Self::CorrelationTimeout => "ROUTE_002",
            Self::DeliveryFailed => "ROUTE_003",
        }
    }
}

/// Streaming error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCode {
    /// STREAM_001: Consumer or iterator is closed
    Closed,
    /// STREAM_002: The underlying producer failed
    ProducerFailed,
    /// STREAM_003: Cursor buffer reached its maximum size
    BufferFull,
}

impl StreamErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Closed => "STREAM_001",
            Self::ProducerFailed => "STREAM_002",
            Self::BufferFull => "STREAM_003",
        }
    }
}

/// Unified error type for the event correlator.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with code. Fatal, never retried.
    #[error("[{code}] {message}")]
    Config { code: &'static str, message: String },

    /// Group store error with code.
    #[error("[{code}] {message}")]
    Store { code: &'static str, message: String },

    /// Routing error with code.
    #[error("[{code}] {message}")]
    Routing { code: &'static str, message: String },

    /// Streaming error with code.
    #[error("[{code}] {message}")]
    Stream { code: &'static str, message: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(code: ConfigErrorCode, msg: impl Into<String>) -> Self {
        Self::Config {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a store error.
    pub fn store(code: StoreErrorCode, msg: impl Into<String>) -> Self {
        Self::Store {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create the distinguishable "already exists" store error.
    pub fn already_exists(key: &str, partition: &str) -> Self {
        Self::store(
            StoreErrorCode::AlreadyExists,
            format!("group '{}' already exists in partition '{}'", key, partition),
        )
    }

    /// Create the distinguishable "not found" store error.
    pub fn not_found(key: &str, partition: &str) -> Self {
        Self::store(
            StoreErrorCode::NotFound,
            format!("group '{}' not found in partition '{}'", key, partition),
        )
    }

    /// Create a routing error.
    pub fn routing(code: RoutingErrorCode, msg: impl Into<String>) -> Self {
        Self::Routing {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a streaming error.
    pub fn stream(code: StreamErrorCode, msg: impl Into<String>) -> Self {
        Self::Stream {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create the distinguishable "closed" streaming error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::stream(StreamErrorCode::Closed, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Config { code, .. }
            | Self::Store { code, .. }
            | Self::Routing { code, .. }
            | Self::Stream { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.error_code() == Some(StoreErrorCode::AlreadyExists.code())
    }

    pub fn is_not_found(&self) -> bool {
        self.error_code() == Some(StoreErrorCode::NotFound.code())
    }

    pub fn is_closed(&self) -> bool {
        self.error_code() == Some(StreamErrorCode::Closed.code())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    pub fn is_routing(&self) -> bool {
        matches!(self, Self::Routing { .. })
    }

    /// Whether retrying the same operation later can make progress.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { code, .. } => *code == StoreErrorCode::Io.code(),
            Self::Routing { code, .. } => {
                *code == RoutingErrorCode::AggregationFailed.code()
                    || *code == RoutingErrorCode::DeliveryFailed.code()
            }
            _ => false,
        }
    }
}
