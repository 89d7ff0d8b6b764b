//! Core types and shared functionality for mediagate.
//!
//! This crate provides:
//! - The SQLite metadata store and its migrations
//! - The filesystem object store
//! - The response cache and the size-bounded object cache
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod object_cache;
pub mod response_cache;
pub mod store;

pub use cache::CacheDb;
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use object_cache::{CacheStats, CachedObject, ClearReport, EvictionReport, ObjectCache, ObjectCacheLimits};
pub use response_cache::ResponseCache;
pub use store::ObjectStore;
