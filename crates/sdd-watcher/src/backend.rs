//! The seam between the watcher pool and the OS watch primitive.
//!
//! A [`WatchBackend`] turns "watch this path" into a [`WatchHandle`] whose
//! drop closes the OS-level watch. Every raw event is reported through an
//! [`EventSink`]; the pool does its own debouncing on top, so a backend only
//! has to say *that* something happened.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8Path;
use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;

/// Sending half for raw change notifications.
///
/// Cheap to clone and usable from any thread, including the backend's own
/// delivery thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<()>,
    lost: Arc<AtomicBool>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<()>) -> Self {
        Self {
            tx,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reports one raw event. Returns `false` once the subscription is gone.
    #[inline]
    pub fn notify(&self) -> bool {
        self.tx.send(()).is_ok()
    }

    /// Reports that the watched path itself was removed or renamed away.
    ///
    /// The OS handle is dead from then on, even if a new entry appears under
    /// the same name. The pool rebuilds it after the current debounce window.
    pub fn watch_lost(&self) -> bool {
        self.lost.store(true, Ordering::Release);
        self.notify()
    }

    /// Clears and returns the lost flag.
    pub(crate) fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::AcqRel)
    }
}

/// An open OS-level watch. Dropping it closes the watch.
pub struct WatchHandle {
    _inner: Box<dyn Send>,
}

impl WatchHandle {
    /// Wraps any value whose drop tears the underlying watch down.
    pub fn new<H: Send + 'static>(inner: H) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// An OS watch primitive.
///
/// Implementations must be able to watch a file or a directory, optionally
/// recursively. The pool only calls [`watch`](Self::watch) for paths that
/// exist; waiting for a missing path is handled by the pool.
pub trait WatchBackend: Send + Sync + 'static {
    /// Starts watching `path`, reporting raw events to `sink`.
    fn watch(&self, path: &Utf8Path, recursive: bool, sink: EventSink) -> Result<WatchHandle, WatchError>;
}

/// The platform's recommended `notify` watcher (inotify, FSEvents,
/// ReadDirectoryChangesW, or polling as a fallback).
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyBackend;

impl WatchBackend for NotifyBackend {
    fn watch(&self, path: &Utf8Path, recursive: bool, sink: EventSink) -> Result<WatchHandle, WatchError> {
        let target = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            // Reads done by change callbacks would otherwise feed back into the watch.
            Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
            Ok(event) => {
                tracing::trace!(path = %target, kind = ?event.kind, "Raw watch event");
                let lost = matches!(event.kind, EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
                    && event.paths.iter().any(|p| p == target.as_std_path());
                let delivered = if lost { sink.watch_lost() } else { sink.notify() };
                if !delivered {
                    tracing::trace!(path = %target, "Event for closed subscription dropped");
                }
            }
            Err(error) => {
                tracing::warn!(path = %target, error = %error, "Watch backend error");
            }
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(path.as_std_path(), mode)?;

        tracing::debug!(path = %path, recursive, "Native watch started");
        Ok(WatchHandle::new(watcher))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend that lets tests fire events by hand.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use camino::{Utf8Path, Utf8PathBuf};
    use parking_lot::Mutex;

    use super::{EventSink, WatchBackend, WatchHandle};
    use crate::error::WatchError;

    struct ManualWatch {
        path: Utf8PathBuf,
        sink: EventSink,
        open: Arc<AtomicBool>,
    }

    struct ManualHandle(Arc<AtomicBool>);

    impl Drop for ManualHandle {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct ManualBackend {
        watches: Arc<Mutex<Vec<ManualWatch>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ManualBackend {
        /// Fires one raw event at every open watch on `path`.
        pub(crate) fn emit(&self, path: &Utf8Path) -> usize {
            self.watches
                .lock()
                .iter()
                .filter(|w| w.open.load(Ordering::SeqCst) && w.path == path)
                .filter(|w| w.sink.notify())
                .count()
        }

        /// Reports the watched `path` itself as removed to every open watch on it.
        pub(crate) fn lose(&self, path: &Utf8Path) -> usize {
            self.watches
                .lock()
                .iter()
                .filter(|w| w.open.load(Ordering::SeqCst) && w.path == path)
                .filter(|w| w.sink.watch_lost())
                .count()
        }

        /// Number of OS-level watches currently open.
        pub(crate) fn open_count(&self) -> usize {
            self.watches
                .lock()
                .iter()
                .filter(|w| w.open.load(Ordering::SeqCst))
                .count()
        }

        /// Number of times `watch` was called.
        pub(crate) fn watch_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl WatchBackend for ManualBackend {
        fn watch(&self, path: &Utf8Path, _recursive: bool, sink: EventSink) -> Result<WatchHandle, WatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let open = Arc::new(AtomicBool::new(true));
            self.watches.lock().push(ManualWatch {
                path: path.to_path_buf(),
                sink,
                open: Arc::clone(&open),
            });
            Ok(WatchHandle::new(ManualHandle(open)))
        }
    }
}
