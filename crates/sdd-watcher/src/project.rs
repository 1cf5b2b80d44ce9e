//! Liveness tracking for one project root.
//!
//! A [`ProjectWatcher`] remembers the [`Fingerprint`] of the root it started
//! watching. [`check_path_liveness`](ProjectWatcher::check_path_liveness)
//! compares it with the directory currently at that path; when the root went
//! missing or was replaced (renamed away and recreated, remounted), the watch
//! is rebuilt and the generation counter moves forward.
//!
//! ```text
//!   check_path_liveness()
//!          │
//!          ▼
//!   stored vs. current fingerprint ── same ──► Alive
//!          │
//!          ├─ root gone ──────► schedule_reinitialize(missing-project-dir)
//!          └─ other identity ─► schedule_reinitialize(project-dir-replaced)
//!                                      │
//!                                      ▼
//!                release root guard, rewatch_under(root), re-acquire,
//!                recapture fingerprint, generation += 1, broadcast
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use sdd_core::ProjectConfig;

use crate::error::WatchError;
use crate::fingerprint::Fingerprint;
use crate::path::normalize_path;
use crate::pool::{AcquireOptions, WatchGuard, WatcherPool};

const EVENT_CAPACITY: usize = 64;

/// Why a project watch was rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReinitReason {
    /// The root directory no longer exists.
    MissingProjectDir,
    /// A different directory now lives at the root path.
    ProjectDirReplaced,
    /// A caller asked for a rebuild.
    Requested,
}

impl ReinitReason {
    /// Returns the reason as a stable kebab-case string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingProjectDir => "missing-project-dir",
            Self::ProjectDirReplaced => "project-dir-replaced",
            Self::Requested => "requested",
        }
    }
}

impl fmt::Display for ReinitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Liveness {
    /// The root is the directory that was fingerprinted.
    Alive,
    /// The root does not exist.
    Missing,
    /// The root was replaced by another directory and has been rewatched.
    Replaced,
    /// The watcher is disabled; nothing was checked.
    Disabled,
}

/// Notifications published by a [`ProjectWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProjectEvent {
    /// Something changed under the root (debounced).
    Changed,
    /// The root watch was rebuilt; earlier watch-based results are stale.
    Reinitialized {
        /// Generation after the rebuild.
        generation: u64,
        /// What triggered it.
        reason: ReinitReason,
    },
}

/// Read-only runtime status for health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectWatcherStatus {
    /// Whether the watcher is enabled.
    pub enabled: bool,
    /// Number of completed rebuilds.
    pub generation: u64,
    /// Number of rebuilds started.
    pub reinitialize_count: u64,
}

/// Watches one project root and rebuilds the watch when the root is replaced.
///
/// Cloning yields another handle to the same watcher.
#[derive(Clone)]
pub struct ProjectWatcher {
    inner: Arc<ProjectInner>,
}

struct ProjectInner {
    root: Utf8PathBuf,
    pool: WatcherPool,
    debounce: Duration,
    enabled: bool,
    state: Mutex<ProjectState>,
    generation: AtomicU64,
    reinitialize_count: AtomicU64,
    reinitializing: AtomicBool,
    events: broadcast::Sender<ProjectEvent>,
}

#[derive(Default)]
struct ProjectState {
    fingerprint: Option<Fingerprint>,
    guard: Option<WatchGuard>,
    started: bool,
}

/// Clears the in-flight flag on every exit path of a rebuild.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProjectWatcher {
    /// Creates a watcher for `config.root`. Nothing is watched until the
    /// first [`ensure_started`](Self::ensure_started) or liveness check.
    pub fn new(config: &ProjectConfig, pool: WatcherPool) -> Result<Self, WatchError> {
        let root = normalize_path(&config.root)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(ProjectInner {
                root,
                pool,
                debounce: config.debounce(),
                enabled: config.enabled,
                state: Mutex::new(ProjectState::default()),
                generation: AtomicU64::new(0),
                reinitialize_count: AtomicU64::new(0),
                reinitializing: AtomicBool::new(false),
                events,
            }),
        })
    }

    /// Returns the normalized root path.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.inner.root
    }

    /// Returns the current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Subscribes to change and rebuild notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a status snapshot.
    #[must_use]
    pub fn status(&self) -> ProjectWatcherStatus {
        ProjectWatcherStatus {
            enabled: self.inner.enabled,
            generation: self.generation(),
            reinitialize_count: self.inner.reinitialize_count.load(Ordering::Acquire),
        }
    }

    /// Opens the recursive root watch and records the root's fingerprint, if
    /// that has not happened yet. Does nothing when disabled.
    pub fn ensure_started(&self) -> Result<(), WatchError> {
        if !self.inner.enabled {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        if state.started {
            return Ok(());
        }
        state.guard = Some(self.acquire_root()?);
        state.fingerprint = Fingerprint::capture(&self.inner.root);
        state.started = true;
        tracing::debug!(root = %self.inner.root, exists = state.fingerprint.is_some(), "Project watch started");
        Ok(())
    }

    /// Compares the root's current identity with the stored one and rebuilds
    /// the watch if the root went missing or was replaced.
    ///
    /// Permission changes on the root do not count as a replacement. A root
    /// that is still missing after a rebuild does not trigger another one.
    pub fn check_path_liveness(&self) -> Result<Liveness, WatchError> {
        if !self.inner.enabled {
            return Ok(Liveness::Disabled);
        }
        self.ensure_started()?;

        let stored = self.inner.state.lock().fingerprint;
        let current = Fingerprint::capture(&self.inner.root);

        match (stored, current) {
            (None, None) => Ok(Liveness::Missing),
            (Some(_), None) => {
                self.schedule_reinitialize(ReinitReason::MissingProjectDir)?;
                Ok(Liveness::Missing)
            }
            (None, Some(_)) => {
                self.schedule_reinitialize(ReinitReason::ProjectDirReplaced)?;
                Ok(Liveness::Replaced)
            }
            (Some(before), Some(now)) if !before.same_identity(&now) => {
                self.schedule_reinitialize(ReinitReason::ProjectDirReplaced)?;
                Ok(Liveness::Replaced)
            }
            (Some(_), Some(_)) => Ok(Liveness::Alive),
        }
    }

    /// Tears down and rebuilds every watch under the root.
    ///
    /// Returns `Ok(false)` if another rebuild was already in flight; that
    /// rebuild covers this request.
    pub fn schedule_reinitialize(&self, reason: ReinitReason) -> Result<bool, WatchError> {
        let inner = &self.inner;
        if inner
            .reinitializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(root = %inner.root, %reason, "Reinitialize already in flight");
            return Ok(false);
        }
        let _in_flight = InFlight(&inner.reinitializing);
        inner.reinitialize_count.fetch_add(1, Ordering::AcqRel);

        let stale = inner.state.lock().guard.take();
        drop(stale);

        let rebuilt = inner.pool.rewatch_under(&inner.root)?;
        let guard = self.acquire_root()?;
        let fingerprint = Fingerprint::capture(&inner.root);
        {
            let mut state = inner.state.lock();
            state.guard = Some(guard);
            state.fingerprint = fingerprint;
            state.started = true;
        }

        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(root = %inner.root, %reason, generation, rebuilt, "Project watch reinitialized");
        // No receivers is fine.
        let _ = inner.events.send(ProjectEvent::Reinitialized { generation, reason });
        Ok(true)
    }

    /// Runs [`check_path_liveness`](Self::check_path_liveness) every
    /// `interval` until `cancel` fires.
    pub fn spawn_liveness_monitor(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, WatchError> {
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let watcher = self.clone();
        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match watcher.check_path_liveness() {
                    Ok(Liveness::Alive | Liveness::Disabled) => {}
                    Ok(liveness) => tracing::debug!(root = %watcher.root(), ?liveness, "Liveness check"),
                    Err(error) => tracing::warn!(root = %watcher.root(), error = %error, "Liveness check failed"),
                }
            }
            tracing::debug!(root = %watcher.root(), "Liveness monitor stopped");
        }))
    }

    fn acquire_root(&self) -> Result<WatchGuard, WatchError> {
        let events = self.inner.events.clone();
        self.inner.pool.acquire(
            &self.inner.root,
            move || {
                let _ = events.send(ProjectEvent::Changed);
                Ok(())
            },
            AcquireOptions::new(self.inner.debounce).recursive(true),
        )
    }
}

impl fmt::Debug for ProjectWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectWatcher")
            .field("root", &self.inner.root)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
