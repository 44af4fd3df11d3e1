//! # Tickgate Core
//!
//! Shared building blocks for the tickgate crates: the error hierarchy,
//! configuration types with TOML loading, and logging setup.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for every tickgate subsystem
//! - **config**: Dispatcher, pool and logging configuration
//! - **utils**: Logging levels and subscriber installation

pub mod config;
pub mod error;
pub mod utils;

// Re-export key types for convenience
pub use config::{DispatcherConfig, LoggingConfig, PoolConfig, TickgateConfig};
pub use error::{ConfigError, DispatchError, Error, PoolError, Result, WorkError};
pub use utils::{init_logging, LogLevel};
