//! Core configuration and error types for the sdd engine.
//!
//! This crate provides the foundational types shared across the workspace:
//!
//! - [`Config`] and its sections ([`WatchConfig`], [`ProjectConfig`], [`CacheConfig`])
//! - [`ConfigError`] for configuration loading and validation failures
//!
//! # Crate Dependencies
//!
//! ```text
//! sdd-cli ──► sdd-cache ──► sdd-watcher ──► sdd-core
//!                     └───► sdd-reactive
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{CacheConfig, Config, ProjectConfig, WatchConfig};
pub use error::ConfigError;
