//! Configuration errors.

use camino::Utf8PathBuf;

/// Why a configuration could not be loaded or accepted.
///
/// A project root that does not exist is *not* an error: the watcher waits
/// for it to appear.
///
/// # Examples
///
/// ```
/// use sdd_core::ConfigError;
///
/// let error = ConfigError::invalid_option("watch.debounce_ms", "must be a number");
/// assert_eq!(
///     error.to_string(),
///     "invalid option 'watch.debounce_ms': must be a number"
/// );
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configured path cannot be used as a project root.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The rejected path.
        path: Utf8PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// An option holds a value serde accepted but the engine cannot run with.
    #[error("invalid option '{option}': {reason}")]
    InvalidOption {
        /// Dotted option name, e.g. `watch.poll_interval_ms`.
        option: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`Config`](crate::Config).
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a [`ConfigError::InvalidOption`].
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Returns the dotted option name for option errors.
    #[must_use]
    pub fn option(&self) -> Option<&str> {
        match self {
            Self::InvalidOption { option, .. } => Some(option),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root_message() {
        let error = ConfigError::InvalidPath {
            path: Utf8PathBuf::new(),
            reason: "project root must not be empty".to_owned(),
        };
        insta::assert_snapshot!(error, @"invalid path '': project root must not be empty");
    }

    #[test]
    fn test_option_name() {
        let error = ConfigError::invalid_option("project.liveness_interval_ms", "must be greater than zero");
        assert_eq!(error.option(), Some("project.liveness_interval_ms"));

        let parse = serde_json::from_str::<crate::Config>("{").unwrap_err();
        assert_eq!(ConfigError::from(parse).option(), None);
    }
}
