//! Error types for the sdd-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while acquiring watches or checking a project root.

use camino::Utf8PathBuf;

/// Errors that can occur during file watching operations.
///
/// A missing path is deliberately *not* an error here: the pool waits for it
/// to appear. These variants cover the cases where no watch can be set up.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): Fatal for the acquire that hit it
/// - **No runtime** ([`WatchError::NoRuntime`]): Fatal - caller must run inside tokio
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - skip the path
/// - **I/O errors** ([`WatchError::Io`]): Fatal - propagate immediately
///
/// # Examples
///
/// ```
/// use sdd_watcher::WatchError;
///
/// fn handle_error(err: WatchError) {
///     match err {
///         WatchError::Notify(e) => eprintln!("Notify error: {e}"),
///         WatchError::NoRuntime => eprintln!("No tokio runtime"),
///         WatchError::NonUtf8Path(p) => eprintln!("Invalid path: {}", p.display()),
///         WatchError::Io(e) => eprintln!("I/O error: {e}"),
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The OS watch backend failed to start or operate.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The pool was used outside a tokio runtime.
    ///
    /// Debounce timers and path polling run as tokio tasks.
    #[error("watcher pool used outside a tokio runtime")]
    NoRuntime,

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred while resolving a path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if this error is recoverable (watching can continue).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error is fatal (watching should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the paths reported by the backend, if any.
    #[must_use]
    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        match self {
            Self::Notify(e) => e
                .paths
                .iter()
                .filter_map(|p| Utf8PathBuf::from_path_buf(p.clone()).ok())
                .collect(),
            Self::NoRuntime | Self::NonUtf8Path(_) | Self::Io(_) => Vec::new(),
        }
    }
}
