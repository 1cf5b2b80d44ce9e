//! Reactive cache of filesystem reads.
//!
//! Combines [`sdd_reactive`] signals with [`sdd_watcher`] subscriptions:
//! every distinct read is seeded once from disk and kept current by a
//! debounced watch. Consumers either call the cache directly for a snapshot
//! or wrap reads in [`sdd_reactive::stream`] to get a live sequence.
//!
//! # Reads
//!
//! | operation                            | absent value | watched directory |
//! |--------------------------------------|--------------|-------------------|
//! | [`ReactiveCache::read_file`]         | `None`       | parent            |
//! | [`ReactiveCache::read_directory`]    | empty        | the directory     |
//! | [`ReactiveCache::exists`]            | `false`      | parent            |
//! | [`ReactiveCache::stat`]              | `None`       | parent            |

#![deny(clippy::all)]
#![warn(missing_docs)]

mod cache;
mod fs;
mod key;
mod types;

pub use cache::ReactiveCache;
pub use key::CacheKey;
pub use types::{DirEntry, DirOptions, EntryKind, FileStat};
