//! Reactive values with automatic, task-scoped dependency tracking.
//!
//! A [`Signal`] holds one value and notifies its dependents only when a
//! [`Signal::set`] actually changes that value. A [`Context`] collects every
//! signal read while it is the ambient context and wakes up when any of them
//! changes. [`stream`] and [`try_stream`] turn a plain read of signals into a
//! live, cancellable sequence; [`run_once`] evaluates the same read exactly
//! once.
//!
//! # Ambient Context
//!
//! The active context is stored in a `tokio` task-local, entered with a
//! synchronous scope around each run of the task. Two live queries running on
//! different tasks, or interleaved on the same worker thread, never see each
//! other's context.
//!
//! ```text
//! stream(task) ──► Context::run_once(task) ──► Signal::get()
//!       ▲                                          │ track + subscribe
//!       │                                          ▼
//!       └──── pending change resolved ◄──── Signal::set() (value differs)
//! ```
//!
//! # Examples
//!
//! ```
//! use futures_util::StreamExt;
//! use sdd_reactive::{stream, Signal};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let count = Signal::new(1);
//! let reader = count.clone();
//! let cancel = CancellationToken::new();
//!
//! let mut doubled = Box::pin(stream(move || reader.get() * 2, cancel.clone()));
//! assert_eq!(doubled.next().await, Some(2));
//!
//! count.set(5);
//! assert_eq!(doubled.next().await, Some(10));
//!
//! cancel.cancel();
//! assert_eq!(doubled.next().await, None);
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod context;
mod signal;
mod stream;

pub use context::{Context, ContextId, run_once};
pub use signal::{Signal, SignalId};
pub use stream::{stream, try_stream};
