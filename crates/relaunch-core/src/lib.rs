//! Core types and configuration for relaunch.
//!
//! This crate defines the `relaunch.toml` schema ([`RelaunchConfig`]),
//! runtime configuration validation ([`RuntimeEnv`]), the image cache
//! policy ([`CachePolicy`]), durable storage binding ([`StorageBinding`]),
//! and shared error types.

pub mod config;
pub mod context;
pub mod env_file;
pub mod error;
pub mod policy;
pub mod storage;

pub use config::{
    BuildConfig, CONFIG_FILE_NAME, EnvConfig, RelaunchConfig, ServiceConfig, SourceConfig,
    StorageConfig,
};
pub use context::BuildContext;
pub use env_file::RuntimeEnv;
pub use error::{Error, Result};
pub use policy::{BuildFlags, CachePolicy};
pub use storage::{StorageBinding, StorageLocation};
