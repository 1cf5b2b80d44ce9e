//! Reference-counted, debounced watch subscriptions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── backend delivery thread ────────────────┐
//! │  notify watcher ──► EventSink::notify() (unbounded send) │
//! └───────────────────────────────┬──────────────────────────┘
//!                                 ▼
//! ┌──────────────────── tokio runtime ──────────────────────┐
//! │  debounce task (one per subscription)                    │
//! │    first event arms the timer, every further event       │
//! │    pushes the deadline back; on expiry each callback     │
//! │    runs exactly once, in registration order              │
//! │                                                          │
//! │  poll task (only while the path is missing)              │
//! │    checks the path every poll interval, then hands off   │
//! │    to a native watch and fires the callbacks once        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one OS-level handle exists per `(normalized path, recursive)` key,
//! however many consumers share it. The handle is closed when the last
//! [`WatchGuard`] for the key is released and is never reused afterwards.

use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use sdd_core::WatchConfig;

use crate::backend::{EventSink, NotifyBackend, WatchBackend, WatchHandle};
use crate::error::WatchError;
use crate::fingerprint::Fingerprint;
use crate::path::{nearest_existing_ancestor, normalize_path};

/// A change callback. Returning `Err` or panicking is logged and does not
/// affect sibling callbacks. Callbacks run on tokio's blocking pool and may
/// do synchronous I/O.
pub type ChangeCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

type CallbackList = Arc<Mutex<SmallVec<[(u64, ChangeCallback); 4]>>>;

/// Per-acquire watch options.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use sdd_watcher::AcquireOptions;
///
/// let options = AcquireOptions::new(Duration::from_millis(50)).recursive(true);
/// assert!(options.recursive);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Debounce window. Only the acquire that creates a subscription decides it.
    pub debounce: Duration,
    /// Whether to watch subdirectories.
    pub recursive: bool,
}

impl AcquireOptions {
    /// Creates non-recursive options with the given debounce window.
    #[must_use]
    pub const fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            recursive: false,
        }
    }

    /// Sets recursive watching.
    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

impl From<&WatchConfig> for AcquireOptions {
    fn from(config: &WatchConfig) -> Self {
        Self::new(config.debounce()).recursive(config.recursive)
    }
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    path: Utf8PathBuf,
    recursive: bool,
}

/// One shared OS watch and everyone listening to it.
struct Subscription {
    /// Distinguishes this subscription from a later one on the same key.
    serial: u64,
    ref_count: usize,
    callbacks: CallbackList,
    sink: EventSink,
    /// `None` while the path is missing and being polled for.
    handle: Option<WatchHandle>,
    /// Identity of the directory the native handle was opened on.
    identity: Option<Fingerprint>,
    debounce_task: JoinHandle<()>,
    poll_task: Option<JoinHandle<()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.debounce_task.abort();
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

/// Snapshot of pool activity for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Distinct subscriptions (one per OS-level watch key).
    pub active: usize,
    /// Subscriptions still waiting for their path to appear.
    pub pending: usize,
    /// Registered callbacks across all subscriptions.
    pub callbacks: usize,
}

/// A pool of shared, debounced watch subscriptions.
///
/// Cloning the pool yields another handle to the same set of subscriptions.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use sdd_core::WatchConfig;
/// use sdd_watcher::{AcquireOptions, WatcherPool};
///
/// # async fn example() -> Result<(), sdd_watcher::WatchError> {
/// let config = WatchConfig::default();
/// let pool = WatcherPool::native(&config);
///
/// let mut guard = pool.acquire(
///     Utf8Path::new("./specs"),
///     || {
///         println!("specs changed");
///         Ok(())
///     },
///     AcquireOptions::from(&config),
/// )?;
///
/// // ... later
/// guard.release();
/// assert_eq!(pool.active_count(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WatcherPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    backend: Arc<dyn WatchBackend>,
    poll_interval: Duration,
    subscriptions: Mutex<FxHashMap<WatchKey, Subscription>>,
    next_id: AtomicU64,
}

impl WatcherPool {
    /// Creates a pool over the given backend.
    pub fn new<B: WatchBackend>(backend: B, config: &WatchConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                backend: Arc::new(backend),
                poll_interval: config.poll_interval(),
                subscriptions: Mutex::new(FxHashMap::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a pool over the platform's native watcher.
    pub fn native(config: &WatchConfig) -> Self {
        Self::new(NotifyBackend, config)
    }

    /// Registers `on_change` for changes at `path`.
    ///
    /// The first acquire for a `(path, recursive)` key opens the OS watch;
    /// later ones share it. A path that does not exist yet is polled for at
    /// the pool's poll interval and watched natively once it appears, at
    /// which point the callbacks fire once.
    ///
    /// Must be called inside a tokio runtime.
    pub fn acquire<F>(&self, path: &Utf8Path, on_change: F, options: AcquireOptions) -> Result<WatchGuard, WatchError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let key = WatchKey {
            path: normalize_path(path)?,
            recursive: options.recursive,
        };
        let callback_id = self.inner.next_id();
        let callback: ChangeCallback = Arc::new(on_change);

        let mut subscriptions = self.inner.subscriptions.lock();
        match subscriptions.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let subscription = occupied.get_mut();
                subscription.ref_count += 1;
                subscription.callbacks.lock().push((callback_id, callback));
                tracing::debug!(path = %key.path, refs = subscription.ref_count, "Shared existing watch");
            }
            Entry::Vacant(vacant) => {
                let mut subscription = self.inner.open(&runtime, &key, options.debounce)?;
                subscription.ref_count = 1;
                subscription.callbacks.lock().push((callback_id, callback));
                vacant.insert(subscription);
            }
        }
        drop(subscriptions);

        Ok(WatchGuard {
            pool: Arc::downgrade(&self.inner),
            key,
            callback_id,
            released: false,
        })
    }

    /// Rebuilds the OS handle of every subscription under `root`.
    ///
    /// Callbacks and reference counts are kept; each rebuilt subscription
    /// fires its callbacks once so that readers pick up whatever the new
    /// directory contains. Returns the number of subscriptions rebuilt.
    pub fn rewatch_under(&self, root: &Utf8Path) -> Result<usize, WatchError> {
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let root = normalize_path(root)?;

        let mut subscriptions = self.inner.subscriptions.lock();
        let mut rebuilt = 0;
        for (key, subscription) in subscriptions.iter_mut().filter(|(key, _)| key.path.starts_with(&root)) {
            subscription.handle = None;
            subscription.identity = None;
            if let Some(task) = subscription.poll_task.take() {
                task.abort();
            }
            self.inner.start_watch(&runtime, key, subscription);
            subscription.sink.notify();
            rebuilt += 1;
        }
        drop(subscriptions);

        tracing::debug!(root = %root, rebuilt, "Rebuilt watches under root");
        Ok(rebuilt)
    }

    /// Returns the number of distinct OS-level subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Returns a diagnostic snapshot of the pool.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let subscriptions = self.inner.subscriptions.lock();
        PoolStatus {
            active: subscriptions.len(),
            pending: subscriptions.values().filter(|s| s.handle.is_none()).count(),
            callbacks: subscriptions.values().map(|s| s.ref_count).sum(),
        }
    }

    /// Closes every subscription and cancels every pending timer.
    ///
    /// Outstanding guards become no-ops. Meant for shutdown and test teardown.
    pub fn close_all(&self) {
        let drained: Vec<Subscription> = self.inner.subscriptions.lock().drain().map(|(_, s)| s).collect();
        tracing::debug!(closed = drained.len(), "Closed all watches");
        drop(drained);
    }
}

impl fmt::Debug for WatcherPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherPool")
            .field("poll_interval", &self.inner.poll_interval)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates a subscription for `key`, native if the path exists and
    /// polling otherwise.
    fn open(self: &Arc<Self>, runtime: &Handle, key: &WatchKey, debounce: Duration) -> Result<Subscription, WatchError> {
        let serial = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        let (handle, identity, poll_task) = if key.path.exists() {
            let identity = Fingerprint::capture(&key.path);
            let handle = self.backend.watch(&key.path, key.recursive, sink.clone())?;
            (Some(handle), identity, None)
        } else {
            (None, None, Some(self.spawn_poll(runtime, key, serial)))
        };

        let callbacks = CallbackList::default();
        let debounce_task = runtime.spawn(debounce_loop(
            Arc::downgrade(self),
            key.clone(),
            serial,
            rx,
            debounce,
            Arc::clone(&callbacks),
        ));

        tracing::debug!(
            path = %key.path,
            recursive = key.recursive,
            debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX),
            waiting = handle.is_none(),
            "Opened watch"
        );

        Ok(Subscription {
            serial,
            ref_count: 0,
            callbacks,
            sink,
            handle,
            identity,
            debounce_task,
            poll_task,
        })
    }

    /// Installs a native handle if the path exists, or falls back to polling.
    fn start_watch(self: &Arc<Self>, runtime: &Handle, key: &WatchKey, subscription: &mut Subscription) {
        if key.path.exists() {
            let identity = Fingerprint::capture(&key.path);
            match self.backend.watch(&key.path, key.recursive, subscription.sink.clone()) {
                Ok(handle) => {
                    subscription.handle = Some(handle);
                    subscription.identity = identity;
                    return;
                }
                Err(error) => {
                    tracing::warn!(path = %key.path, error = %error, "Native watch failed, polling instead");
                }
            }
        }
        subscription.poll_task = Some(self.spawn_poll(runtime, key, subscription.serial));
    }

    fn spawn_poll(self: &Arc<Self>, runtime: &Handle, key: &WatchKey, serial: u64) -> JoinHandle<()> {
        runtime.spawn(await_path(Arc::downgrade(self), key.clone(), serial, self.poll_interval))
    }

    /// Switches a polling subscription over to a native watch.
    fn hand_off(self: &Arc<Self>, key: &WatchKey, serial: u64) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let mut subscriptions = self.subscriptions.lock();
        let Some(subscription) = subscriptions.get_mut(key) else {
            return;
        };
        if subscription.serial != serial || subscription.handle.is_some() {
            return;
        }
        // The finished poll task is the caller; detach rather than abort it.
        subscription.poll_task = None;
        self.start_watch(&runtime, key, subscription);
        if subscription.handle.is_some() {
            tracing::debug!(path = %key.path, "Watched path appeared");
            subscription.sink.notify();
        }
    }

    /// Checks that a native handle still points at the directory on disk.
    ///
    /// A vanished path drops the stale handle and goes back to polling. A
    /// path that was removed and recreated gets a fresh handle and one more
    /// callback round, since changes between the two are otherwise lost.
    fn refresh(self: &Arc<Self>, key: &WatchKey, serial: u64) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let mut subscriptions = self.subscriptions.lock();
        let Some(subscription) = subscriptions.get_mut(key) else {
            return;
        };
        if subscription.serial != serial || subscription.handle.is_none() {
            return;
        }

        let Some(current) = Fingerprint::capture(&key.path) else {
            subscription.sink.take_lost();
            subscription.handle = None;
            subscription.identity = None;
            subscription.poll_task = Some(self.spawn_poll(&runtime, key, serial));
            tracing::debug!(path = %key.path, "Watched path disappeared, polling for it");
            return;
        };
        let replaced = subscription.sink.take_lost()
            || subscription
                .identity
                .is_some_and(|identity| !identity.same_identity(&current));
        if replaced {
            subscription.handle = None;
            subscription.identity = None;
            self.start_watch(&runtime, key, subscription);
            subscription.sink.notify();
            tracing::debug!(path = %key.path, "Watched path was replaced, rebuilt its watch");
        }
    }

    fn release(&self, key: &WatchKey, callback_id: u64) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let Some(subscription) = subscriptions.get_mut(key) else {
            return false;
        };
        let removed = {
            let mut callbacks = subscription.callbacks.lock();
            let before = callbacks.len();
            callbacks.retain(|(id, _)| *id != callback_id);
            callbacks.len() != before
        };
        if !removed {
            return false;
        }

        subscription.ref_count -= 1;
        if subscription.ref_count == 0 {
            let closed = subscriptions.remove(key);
            drop(subscriptions);
            drop(closed);
            tracing::debug!(path = %key.path, "Closed watch");
        }
        true
    }
}

/// Coalesces raw events into one callback round per quiet window.
async fn debounce_loop(
    pool: Weak<PoolInner>,
    key: WatchKey,
    serial: u64,
    mut events: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    callbacks: CallbackList,
) {
    while events.recv().await.is_some() {
        let deadline = tokio::time::sleep(debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => break,
                event = events.recv() => match event {
                    Some(()) => deadline.as_mut().reset(Instant::now() + debounce),
                    None => return,
                },
            }
        }

        // Callbacks may block on filesystem reads.
        let path = key.path.clone();
        let round = Arc::clone(&callbacks);
        if tokio::task::spawn_blocking(move || fire(&path, &round)).await.is_err() {
            return;
        }

        if let Some(pool) = pool.upgrade() {
            pool.refresh(&key, serial);
        }
    }
}

/// Runs every registered callback once, isolating failures.
///
/// Called on the blocking pool, so callbacks may do synchronous I/O.
fn fire(path: &Utf8Path, callbacks: &CallbackList) {
    let snapshot: SmallVec<[ChangeCallback; 4]> = callbacks.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
    tracing::trace!(path = %path, callbacks = snapshot.len(), "Debounce window closed");

    for callback in snapshot {
        match panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(path = %path, error = format!("{error:#}"), "Watch callback failed");
            }
            Err(_) => {
                tracing::warn!(path = %path, "Watch callback panicked");
            }
        }
    }
}

/// Polls for a missing path, then hands the subscription to a native watch.
async fn await_path(pool: Weak<PoolInner>, key: WatchKey, serial: u64, interval: Duration) {
    tracing::debug!(
        path = %key.path,
        ancestor = ?nearest_existing_ancestor(&key.path),
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "Waiting for path to appear"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if key.path.exists() {
            break;
        }
    }
    if let Some(pool) = pool.upgrade() {
        pool.hand_off(&key, serial);
    }
}

/// Owning handle for one acquired callback.
///
/// Releasing is idempotent, and dropping the guard releases it.
#[must_use = "dropping the guard releases the watch"]
pub struct WatchGuard {
    pool: Weak<PoolInner>,
    key: WatchKey,
    callback_id: u64,
    released: bool,
}

impl WatchGuard {
    /// Removes this guard's callback. Closes the OS watch if it was the last.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(pool) = self.pool.upgrade() {
            pool.release(&self.key, self.callback_id);
        }
    }

    /// Returns the normalized path being watched.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.key.path
    }

    /// Returns `true` once [`release`](Self::release) has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("path", &self.key.path)
            .field("recursive", &self.key.recursive)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
