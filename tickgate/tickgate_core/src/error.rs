//! Error types for the tickgate crates.
//!
//! Each subsystem owns a dedicated error enum. The root error type, `Error`,
//! wraps all of them so that a host can funnel every failure through a
//! single `Result` alias.

use thiserror::Error;

/// Root error type for tickgate.
#[derive(Debug, Error)]
pub enum Error {
    /// Dispatcher lifecycle errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Failures of individual work items
    #[error("Work error: {0}")]
    Work(#[from] WorkError),

    /// Resource pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Configuration loading and validation errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging setup errors
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Errors raised by the main-thread dispatcher itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher was never created, or has already been torn down
    #[error("dispatcher is not initialized")]
    Uninitialized,
}

/// Outcome of a work item that did not produce a value.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The callback panicked while running on the designated thread
    #[error("work item panicked: {0}")]
    Panicked(String),

    /// The callback returned an error
    #[error("work item failed: {0}")]
    Failed(#[source] anyhow::Error),

    /// The work item was discarded before it ran
    #[error("work item was abandoned before execution")]
    Abandoned,
}

impl WorkError {
    /// Build a `Panicked` error from a payload returned by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<unknown panic>".to_string()
        };
        Self::Panicked(message)
    }
}

/// Errors returned by the asynchronous resource pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The factory failed while constructing a refill batch
    #[error("refill failed: {0}")]
    RefillFailed(String),

    /// The factory reported success but produced no resources
    #[error("refill produced no resources")]
    EmptyBatch,

    /// No async runtime is available to run the refill on
    #[error("no async runtime available to run the refill")]
    RuntimeUnavailable,
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        /// Path of the file that failed to load
        path: String,

        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside of its accepted range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type used throughout tickgate.
pub type Result<T> = std::result::Result<T, Error>;
