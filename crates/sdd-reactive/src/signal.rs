//! Single-value reactive cells.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::context::{Context, ContextId, Dependency, WeakContext};

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A reactive value cell with equality-gated change notification.
///
/// Cloning a `Signal` yields another handle to the same cell.
///
/// The value only changes through [`set`](Self::set), and `set` does nothing
/// when the new value is equal to the current one under the signal's
/// equality function. Reading with [`get`](Self::get) while a [`Context`] is
/// active registers the signal as a dependency of that context.
///
/// # Thread Safety
///
/// The value sits behind an `RwLock` and the subscriber list behind its own
/// `Mutex`, so one writer and many readers may interleave freely. Subscriber
/// notification runs after both locks are released.
///
/// # Examples
///
/// ```
/// use sdd_reactive::Signal;
///
/// let signal = Signal::new("draft".to_owned());
/// assert!(!signal.set("draft".to_owned()));
/// assert!(signal.set("final".to_owned()));
/// assert_eq!(signal.get(), "final");
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

pub(crate) struct SignalInner<T> {
    id: SignalId,
    value: RwLock<T>,
    equals: EqualsFn<T>,
    /// Dependent contexts in insertion order.
    subscribers: Mutex<SmallVec<[(ContextId, WeakContext); 4]>>,
}

impl<T> Signal<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a signal compared with [`PartialEq`].
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, <T as PartialEq>::eq)
    }

    /// Creates a signal with a custom equality function.
    ///
    /// Use this for values whose `PartialEq` would report changes in fields
    /// that do not matter to readers.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SignalInner {
                id: SignalId(NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed)),
                value: RwLock::new(value),
                equals: Box::new(equals),
                subscribers: Mutex::new(SmallVec::new()),
            }),
        }
    }

    /// Returns the signal's unique ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// Returns the current value.
    ///
    /// Inside an active [`Context`] this also records the dependency in both
    /// directions: the context tracks the signal and the signal notifies the
    /// context on change.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        if let Some(context) = Context::current() {
            let dependency: Arc<dyn Dependency> = Arc::<SignalInner<T>>::clone(&self.inner);
            if context.track(dependency) {
                self.inner.subscribe(&context);
            }
        }
        self.inner.value.read().clone()
    }

    /// Returns the current value without recording a dependency.
    #[must_use]
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.read().clone()
    }

    /// Runs `f` against the current value without cloning or tracking it.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Replaces the value if it differs from the current one.
    ///
    /// Returns `false` and notifies nobody when the values are equal.
    /// Otherwise stores `next`, notifies every subscriber in insertion order
    /// and returns `true`.
    pub fn set(&self, next: T) -> bool {
        {
            let mut value = self.inner.value.write();
            if (self.inner.equals)(&value, &next) {
                return false;
            }
            *value = next;
        }

        let snapshot: SmallVec<[WeakContext; 4]> = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|(_, weak)| weak.is_alive());
            subscribers.iter().map(|(_, weak)| weak.clone()).collect()
        };

        tracing::trace!(signal = self.inner.id.0, subscribers = snapshot.len(), "Signal changed");

        for weak in snapshot {
            if let Some(context) = weak.upgrade() {
                context.notify_change();
            }
        }
        true
    }

    /// Removes `context` from the subscriber set. Removing an absent
    /// context is a no-op.
    pub fn unsubscribe(&self, context: &Context) {
        self.inner.remove_subscriber(context.id());
    }

    /// Returns the number of contexts currently subscribed.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<T> SignalInner<T> {
    fn subscribe(&self, context: &Context) {
        let mut subscribers = self.subscribers.lock();
        let id = context.id();
        if !subscribers.iter().any(|(existing, _)| *existing == id) {
            subscribers.push((id, context.downgrade()));
        }
    }

    fn remove_subscriber(&self, id: ContextId) {
        self.subscribers.lock().retain(|(existing, _)| *existing != id);
    }
}

impl<T> Dependency for SignalInner<T>
where
    T: Send + Sync + 'static,
{
    fn signal_id(&self) -> SignalId {
        self.id
    }

    fn unsubscribe(&self, context: ContextId) {
        self.remove_subscriber(context);
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}
