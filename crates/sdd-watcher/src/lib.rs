//! Reference-counted, debounced file watching for the sdd engine.
//!
//! This crate sits between the OS watch primitive and the reactive cache.
//! It guarantees one OS-level handle per `(path, recursive)` pair however many
//! consumers ask for it, collapses bursts of raw events into a single
//! callback round, and keeps watching paths that do not exist yet or that
//! disappear and come back.
//!
//! # Overview
//!
//! - [`WatcherPool`] - shared subscriptions, debouncing, polling for missing paths
//! - [`WatchGuard`] - releases one callback; the last release closes the OS watch
//! - [`WatchBackend`] - the OS seam, with [`NotifyBackend`] for production use
//! - [`ProjectWatcher`] - detects a project root being replaced and rebuilds its watches
//! - [`Fingerprint`] - directory identity used by the liveness check
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   acquire / release   ┌──────────────────────────┐
//! │ ReactiveCache      │ ────────────────────► │ WatcherPool              │
//! │ ProjectWatcher     │ ◄──────────────────── │  (path, recursive) → sub │
//! └────────────────────┘   debounced callback  └────────────┬─────────────┘
//!                                                           │ watch(path)
//!                                                           ▼
//!                                              ┌──────────────────────────┐
//!                                              │ WatchBackend (notify)    │
//!                                              └──────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! sdd-cli ──► sdd-cache ──► sdd-reactive
//!        │             └──► sdd-watcher ──► sdd-core
//!        └──────────────────────────────────►
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use camino::Utf8Path;
//! use sdd_core::{ProjectConfig, WatchConfig};
//! use sdd_watcher::{ProjectWatcher, WatcherPool};
//!
//! # async fn example() -> Result<(), sdd_watcher::WatchError> {
//! let pool = WatcherPool::native(&WatchConfig::default());
//! let project = ProjectWatcher::new(&ProjectConfig::default(), pool.clone())?;
//!
//! project.ensure_started()?;
//! let mut events = project.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?} (generation {})", project.generation());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod backend;
mod error;
mod fingerprint;
mod path;
mod pool;
mod project;

pub use backend::{EventSink, NotifyBackend, WatchBackend, WatchHandle};
pub use error::WatchError;
pub use fingerprint::Fingerprint;
pub use path::{nearest_existing_ancestor, normalize_path};
pub use pool::{AcquireOptions, ChangeCallback, PoolStatus, WatchGuard, WatcherPool};
pub use project::{Liveness, ProjectEvent, ProjectWatcher, ProjectWatcherStatus, ReinitReason};
