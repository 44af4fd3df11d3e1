//! Resource pooling.
//!
//! Keeps a buffer of expensive resources and refills it in the background,
//! one batch at a time, when requests drain it.

pub mod resource;

// Re-export key types from resource
pub use resource::{AsyncResourcePool, PoolStats, ResourceFactory};
