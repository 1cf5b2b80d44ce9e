//! Live, re-run-on-change sequences over reactive reads.

use std::convert::Infallible;

use futures_util::{Stream, StreamExt, stream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::context::Context;

/// State of one live query between polls.
///
/// Dropping it tears the context down, which covers every exit path:
/// cancellation, task failure, a non-reactive task, or the consumer simply
/// dropping the stream.
struct LiveQuery<F> {
    context: Context,
    task: F,
    cancel: CancellationToken,
    pending_change: Option<oneshot::Receiver<()>>,
    finished: bool,
}

impl<F> Drop for LiveQuery<F> {
    fn drop(&mut self) {
        self.context.destroy();
    }
}

impl<F, T, E> LiveQuery<F>
where
    F: FnMut() -> Result<T, E>,
{
    async fn advance(mut self) -> Option<(Result<T, E>, Self)> {
        if self.finished || self.cancel.is_cancelled() {
            return None;
        }

        if let Some(change) = self.pending_change.take() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::trace!(context = ?self.context.id(), "Live query cancelled");
                    return None;
                }
                _ = change => {}
            }
        }

        self.context.clear_dependencies();
        let change = self.context.arm();
        let outcome = self.context.run_once(&mut self.task);

        match outcome {
            Ok(value) => {
                if self.context.dependency_count() == 0 {
                    self.finished = true;
                } else {
                    self.pending_change = Some(change);
                }
                Some((Ok(value), self))
            }
            Err(err) => {
                self.context.destroy();
                self.finished = true;
                Some((Err(err), self))
            }
        }
    }
}

/// Turns a fallible reactive read into a live sequence.
///
/// The first item is produced immediately. After that, the sequence waits
/// until a signal read by the previous run changes and runs `task` again,
/// re-collecting its dependencies each time. It ends when:
///
/// - `cancel` fires (checked before every run and while waiting),
/// - a run reads no signal at all, after yielding that run's value,
/// - `task` returns `Err`, after yielding the error.
///
/// Whichever way it ends, the underlying context is destroyed exactly once
/// and no signal keeps a subscription to it. Polling after the end keeps
/// returning `None`.
pub fn try_stream<T, E, F>(
    task: F,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<T, E>> + Send + 'static
where
    F: FnMut() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let query = LiveQuery {
        context: Context::new(),
        task,
        cancel,
        pending_change: None,
        finished: false,
    };
    stream::unfold(query, LiveQuery::advance).fuse()
}

/// Turns an infallible reactive read into a live sequence.
///
/// See [`try_stream`] for when the sequence ends.
///
/// # Examples
///
/// ```
/// use futures_util::StreamExt;
/// use sdd_reactive::{stream, Signal};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// // A task that reads no signal yields once and ends.
/// let mut constant = Box::pin(stream(|| 42, CancellationToken::new()));
/// assert_eq!(constant.next().await, Some(42));
/// assert_eq!(constant.next().await, None);
/// # }
/// ```
pub fn stream<T, F>(mut task: F, cancel: CancellationToken) -> impl Stream<Item = T> + Send + 'static
where
    F: FnMut() -> T + Send + 'static,
    T: Send + 'static,
{
    try_stream(move || Ok::<T, Infallible>(task()), cancel).map(|item| match item {
        Ok(value) => value,
        Err(never) => match never {},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_reruns_when_dependency_changes() {
        let signal = Signal::new(1);
        let reader = signal.clone();
        let cancel = CancellationToken::new();
        let mut values = Box::pin(stream(move || reader.get() * 10, cancel.clone()));

        assert_eq!(values.next().await, Some(10));
        signal.set(2);
        assert_eq!(values.next().await, Some(20));

        cancel.cancel();
        assert_eq!(values.next().await, None);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_without_dependencies_ends() {
        let mut values = Box::pin(stream(|| "static", CancellationToken::new()));
        assert_eq!(values.next().await, Some("static"));
        assert_eq!(values.next().await, None);
        assert_eq!(values.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_set_does_not_wake_stream() {
        let signal = Signal::new(5);
        let reader = signal.clone();
        let mut values = Box::pin(stream(move || reader.get(), CancellationToken::new()));
        assert_eq!(values.next().await, Some(5));

        assert!(!signal.set(5));
        let woke = tokio::time::timeout(Duration::from_millis(50), values.next()).await;
        assert!(woke.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_wait_leaves_no_subscribers() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let cancel = CancellationToken::new();
        let mut values = Box::pin(stream(move || reader.get(), cancel.clone()));
        assert_eq!(values.next().await, Some(0));
        assert_eq!(signal.subscriber_count(), 1);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        assert_eq!(values.next().await, None);
        assert_eq!(signal.subscriber_count(), 0);

        // Cancelling again after termination is harmless.
        cancel.cancel();
        assert_eq!(values.next().await, None);
    }

    #[tokio::test]
    async fn test_dependency_set_follows_latest_run() {
        let use_left = Signal::new(true);
        let left = Signal::new("left");
        let right = Signal::new("right");
        let (switch, l, r) = (use_left.clone(), left.clone(), right.clone());
        let mut values = Box::pin(stream(
            move || if switch.get() { l.get() } else { r.get() },
            CancellationToken::new(),
        ));

        assert_eq!(values.next().await, Some("left"));
        assert_eq!(right.subscriber_count(), 0);

        use_left.set(false);
        assert_eq!(values.next().await, Some("right"));
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_try_stream_error_tears_down() {
        let signal = Signal::new(1);
        let reader = signal.clone();
        let mut values = Box::pin(try_stream(
            move || match reader.get() {
                2 => Err("unreadable"),
                n => Ok(n),
            },
            CancellationToken::new(),
        ));

        assert_eq!(values.next().await, Some(Ok(1)));
        signal.set(2);
        assert_eq!(values.next().await, Some(Err("unreadable")));
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(values.next().await, None);
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let signal = Signal::new(1);
        let reader = signal.clone();
        let mut values = Box::pin(stream(move || reader.get(), CancellationToken::new()));
        assert_eq!(values.next().await, Some(1));
        assert_eq!(signal.subscriber_count(), 1);

        drop(values);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_change_during_run_triggers_rerun() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let writer = signal.clone();
        let mut runs = 0;
        let mut values = Box::pin(stream(
            move || {
                runs += 1;
                let value = reader.get();
                if runs == 1 {
                    writer.set(value + 1);
                }
                value
            },
            CancellationToken::new(),
        ));

        assert_eq!(values.next().await, Some(0));
        assert_eq!(values.next().await, Some(1));
    }
}
