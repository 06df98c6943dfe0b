//! Error types for the task service.

use std::fmt;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which validation step rejected a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStep {
    /// `type` has no registered handler.
    Type,
    /// `params` did not decode into the handler's type.
    Params,
    /// The handler's own `valid()` check failed.
    Valid,
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Type => "type",
            Self::Params => "params",
            Self::Valid => "valid",
        };
        write!(f, "{s}")
    }
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task ({step}): {reason}")]
    Validation { step: ValidationStep, reason: String },

    #[error("Task not found: {id:?}")]
    NotFound { id: String },

    #[error("Unknown task type: {0}")]
    UnknownType(String),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Task {id} failed: {message}")]
    Execution { id: String, message: String },

    #[error("Task {id} progress channel closed without a terminal update")]
    ProgressClosed { id: String },
}

impl TaskError {
    /// Short machine-readable kind, used on the RPC wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::UnknownType(_) => "unknown_type",
            Self::Store(_) => "store",
            Self::Queue(_) => "queue",
            Self::Execution { .. } => "execution",
            Self::ProgressClosed { .. } => "progress_closed",
        }
    }
}

/// Queue broker errors raised while enqueuing.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to connect to queue broker: {0}")]
    Connect(String),

    #[error("Failed to open channel: {0}")]
    Channel(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Error publishing to queue: {0}")]
    Publish(String),

    #[error("Error marshaling params to JSON: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pub/sub broker errors raised by the progress bridge.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("No pub/sub broker address configured")]
    Config,

    #[error("Couldn't connect to pub/sub broker after {attempts} attempts: {reason}")]
    Connect { attempts: u32, reason: String },

    #[error("Subscription to {pattern} failed: {reason}")]
    Subscribe { pattern: String, reason: String },

    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error("Bridge startup cancelled")]
    Cancelled,
}

/// Errors seen by an RPC caller.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Connection could not be established or broke mid-call. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service handled the call and returned an application error.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Whether the caller may retry the call as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
