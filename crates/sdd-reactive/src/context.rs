//! Per-task dependency collection and change waiting.
//!
//! A [`Context`] becomes the ambient context for the duration of
//! [`Context::run_once`]. Every [`Signal::get`](crate::Signal::get) performed
//! inside that scope, however deeply nested, records itself with the context.
//! The scope lives in a `tokio` task-local, so concurrent live queries keep
//! independent dependency sets.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::signal::{Signal, SignalId};

tokio::task_local! {
    static CURRENT_CONTEXT: Context;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

/// Type-erased view of a signal, as seen by the contexts depending on it.
pub(crate) trait Dependency: Send + Sync {
    fn signal_id(&self) -> SignalId;
    fn unsubscribe(&self, context: ContextId);
}

/// A dependency collector and change-waiter for one live query.
///
/// Cloning a `Context` yields another handle to the same collector.
///
/// Once [`destroy`](Self::destroy) has run, tracking and change
/// notification are no-ops for the rest of the context's life.
///
/// # Examples
///
/// ```
/// use sdd_reactive::{Context, Signal};
///
/// let title = Signal::new("Overview".to_owned());
/// let context = Context::new();
///
/// let len = context.run_once(|| title.get().len());
/// assert_eq!(len, 8);
/// assert!(context.depends_on(&title));
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    state: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    dependencies: Vec<Arc<dyn Dependency>>,
    pending_change: Option<oneshot::Sender<()>>,
    destroyed: bool,
}

/// Non-owning handle kept by signals so that a forgotten context is freed.
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ContextInner>);

impl WeakContext {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<Context> {
        self.0.upgrade().map(|inner| Context { inner })
    }
}

impl Context {
    /// Creates an empty, live context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    /// Returns the context active for the calling task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_CONTEXT.try_with(Self::clone).ok()
    }

    /// Returns this context's unique ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.inner))
    }

    /// Runs `task` once with this context as the ambient context.
    ///
    /// Signals read by `task` are added to the dependency set and stay there
    /// after the call returns. Nothing waits and `task` is never re-invoked.
    pub fn run_once<T>(&self, task: impl FnOnce() -> T) -> T {
        CURRENT_CONTEXT.sync_scope(self.clone(), task)
    }

    /// Records `dependency`. Returns `true` only when it was newly added.
    pub(crate) fn track(&self, dependency: Arc<dyn Dependency>) -> bool {
        let mut state = self.inner.state.lock();
        if state.destroyed {
            return false;
        }
        let id = dependency.signal_id();
        if state.dependencies.iter().any(|d| d.signal_id() == id) {
            return false;
        }
        state.dependencies.push(dependency);
        true
    }

    /// Resolves the pending change, if one is armed.
    ///
    /// Repeated calls within one cycle are harmless: only the first one
    /// finds a pending change to resolve.
    pub fn notify_change(&self) {
        let sender = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.pending_change.take()
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Arms a fresh pending change and returns the receiving half.
    pub(crate) fn arm(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        if !state.destroyed {
            state.pending_change = Some(tx);
        }
        rx
    }

    /// Unsubscribes from every tracked signal and empties the dependency set.
    pub fn clear_dependencies(&self) {
        let dependencies = std::mem::take(&mut self.inner.state.lock().dependencies);
        for dependency in dependencies {
            dependency.unsubscribe(self.inner.id);
        }
    }

    /// Tears the context down: clears dependencies, marks it destroyed and
    /// drops any pending change. Calling it again is a no-op.
    pub fn destroy(&self) {
        let dependencies = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.pending_change = None;
            std::mem::take(&mut state.dependencies)
        };
        for dependency in dependencies {
            dependency.unsubscribe(self.inner.id);
        }
        tracing::trace!(context = self.inner.id.0, "Context destroyed");
    }

    /// Returns `true` once [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Returns the number of distinct signals tracked.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.state.lock().dependencies.len()
    }

    /// Returns `true` if `signal` is in the dependency set.
    #[must_use]
    pub fn depends_on<T>(&self, signal: &Signal<T>) -> bool
    where
        T: Send + Sync + 'static,
    {
        let id = signal.id();
        self.inner
            .state
            .lock()
            .dependencies
            .iter()
            .any(|d| d.signal_id() == id)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("dependencies", &state.dependencies.len())
            .field("pending_change", &state.pending_change.is_some())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

/// Runs `task` once inside a throwaway context.
///
/// Returns the current truth with no live updates and no subscriptions left
/// behind afterwards.
pub fn run_once<T>(task: impl FnOnce() -> T) -> T {
    let context = Context::new();
    let value = context.run_once(task);
    context.destroy();
    value
}
