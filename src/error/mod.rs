use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Invalid or inconsistent cache settings
    #[error("Config Error: {0}")]
    Config(String),

    /// Connection establishment or liveness check failed
    #[error("Connection Error: {0}")]
    Connection(String),

    /// A command against the key-value store failed
    #[error("Backend Error: {0}")]
    Backend(String),

    /// A value could not be encoded into or decoded from a cache blob
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// Caching is disabled for this process
    #[error("Cache backend unavailable")]
    Unavailable,

    /// The store was closed and accepts no further commands
    #[error("Cache backend closed")]
    Closed,
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

impl CacheError {
    /// Backend-side faults, as opposed to problems with the value or settings.
    pub fn is_backend_fault(&self) -> bool {
        matches!(
            self,
            CacheError::Connection(_) | CacheError::Backend(_) | CacheError::Unavailable | CacheError::Closed
        )
    }
}
