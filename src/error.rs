//! Error types for pool construction and runtime management.
//!
//! Scheduling itself never fails: submission always succeeds (queues are
//! unbounded past the fast path) and a failing task body is routed to its
//! error handler, not surfaced here.

/// Result type alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or tearing down a task system.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Worker pool construction failed
    #[error("executor error: {0}")]
    Executor(String),

    /// The global runtime was initialized twice
    #[error("runtime already initialized")]
    AlreadyInitialized,
}

impl Error {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an executor error
    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }
}
