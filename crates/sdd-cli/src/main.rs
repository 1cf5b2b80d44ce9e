//! Command-line front end for the sdd engine.
//!
//! Reads files and directories through the reactive cache, either once or
//! live, and monitors a project root for replacement.
//!
//! # Usage
//!
//! ```bash
//! sdd-watch [OPTIONS] <COMMAND>
//!
//! # One-shot reads
//! sdd-watch cat specs/overview.md
//! sdd-watch ls specs --files-only --exclude drafts
//!
//! # Print the listing again every time it changes (Ctrl-C to stop)
//! sdd-watch follow ls specs
//!
//! # Watch the project root and report every reinitialize
//! sdd-watch --root ./my-project monitor
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use sdd_cache::{DirEntry, DirOptions, EntryKind, FileStat, ReactiveCache};
use sdd_core::Config;
use sdd_reactive::{run_once, stream};
use sdd_watcher::{ProjectEvent, ProjectWatcher, WatcherPool};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Reactive filesystem reads and project root monitoring.
#[derive(Parser)]
#[command(name = "sdd-watch", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Project root. Relative read paths are resolved against it.
    #[arg(short, long, global = true, env = "SDD_ROOT")]
    root: Option<Utf8PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, global = true, env = "SDD_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Debounce window for cache watches, in milliseconds.
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Once(Read),

    /// Print a read, then print it again every time it changes.
    Follow {
        /// The read to follow.
        #[command(subcommand)]
        read: Read,
    },

    /// Watch the project root and print status on every reinitialize.
    Monitor {
        /// Liveness check interval in milliseconds (overrides the config file).
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

/// A single cache read.
#[derive(Subcommand, Clone)]
enum Read {
    /// Print a file's contents.
    Cat {
        /// File to read.
        path: Utf8PathBuf,
    },

    /// List a directory.
    Ls {
        /// Directory to list.
        path: Utf8PathBuf,

        #[command(flatten)]
        filters: ListFilters,
    },

    /// Print a file's metadata.
    Stat {
        /// Path to stat.
        path: Utf8PathBuf,
    },

    /// Print whether a path exists.
    Exists {
        /// Path to check.
        path: Utf8PathBuf,
    },
}

/// Directory listing filters.
#[derive(Args, Clone)]
struct ListFilters {
    /// Include entries starting with `.`.
    #[arg(short = 'a', long)]
    hidden: bool,

    /// Only list regular files.
    #[arg(long, conflicts_with = "dirs_only")]
    files_only: bool,

    /// Only list directories.
    #[arg(long)]
    dirs_only: bool,

    /// Entry names to leave out (repeatable).
    #[arg(long, value_name = "NAME")]
    exclude: Vec<String>,
}

impl From<&ListFilters> for DirOptions {
    fn from(filters: &ListFilters) -> Self {
        Self {
            include_hidden: filters.hidden,
            files_only: filters.files_only,
            directories_only: filters.dirs_only,
            exclude: filters.exclude.clone(),
        }
    }
}

// =============================================================================
// READS
// =============================================================================

/// The value produced by one read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Reading {
    Text(Option<String>),
    Listing(Vec<DirEntry>),
    Stat(Option<FileStat>),
    Flag(bool),
}

impl Read {
    /// Resolves relative paths against `root`.
    fn resolve(mut self, root: &Utf8Path) -> Self {
        let (Self::Cat { path } | Self::Ls { path, .. } | Self::Stat { path } | Self::Exists { path }) = &mut self;
        if path.is_relative() {
            *path = root.join(&*path);
        }
        self
    }

    fn run(&self, cache: &ReactiveCache) -> Reading {
        match self {
            Self::Cat { path } => Reading::Text(cache.read_file(path)),
            Self::Ls { path, filters } => Reading::Listing(cache.read_directory(path, &filters.into())),
            Self::Stat { path } => Reading::Stat(cache.stat(path)),
            Self::Exists { path } => Reading::Flag(cache.exists(path)),
        }
    }
}

/// Formats a reading for the terminal.
fn render(reading: &Reading, json: bool) -> color_eyre::Result<String> {
    if json {
        return Ok(serde_json::to_string(reading)?);
    }
    let text = match reading {
        Reading::Text(Some(contents)) => contents.clone(),
        Reading::Text(None) | Reading::Stat(None) => "<absent>".to_owned(),
        Reading::Listing(entries) => entries
            .iter()
            .map(|entry| match entry.kind {
                EntryKind::Directory => format!("{}/", entry.name),
                EntryKind::Symlink => format!("{}@", entry.name),
                EntryKind::File | EntryKind::Other => entry.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Reading::Stat(Some(stat)) => serde_json::to_string_pretty(stat)?,
        Reading::Flag(flag) => flag.to_string(),
    };
    Ok(text)
}

fn print_line(text: &str) -> color_eyre::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{text}")?;
    Ok(())
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects `RUST_LOG` if set. Otherwise uses `debug` with `--verbose` and
/// `info` by default, keeping `notify` at `warn`. Logs go to stderr so that
/// read output stays clean.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},notify=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the config file and CLI overrides.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(root) = &cli.root {
        config.project.root.clone_from(root);
    }
    if let Some(debounce_ms) = cli.debounce_ms {
        config.cache.debounce_ms = debounce_ms;
    }
    if let Commands::Monitor {
        interval_ms: Some(interval_ms),
    } = cli.command
    {
        config.project.liveness_interval_ms = interval_ms;
    }
    config.validate()?;
    Ok(config)
}

/// Cancels `cancel` on Ctrl-C or, on Unix, SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) -> color_eyre::Result<()> {
    #[cfg(unix)]
    let mut sigterm = {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())?
    };

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down");
            }
        }

        cancel.cancel();
    });
    Ok(())
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Performs one read and prints it.
fn run_once_read(cache: &ReactiveCache, read: &Read, json: bool) -> color_eyre::Result<()> {
    let reading = run_once(|| read.run(cache));
    print_line(&render(&reading, json)?)
}

/// Prints a read every time its value changes, until cancelled.
async fn run_follow(cache: ReactiveCache, read: Read, json: bool, cancel: CancellationToken) -> color_eyre::Result<()> {
    let mut readings = Box::pin(stream(move || read.run(&cache), cancel));
    while let Some(reading) = readings.next().await {
        print_line(&render(&reading, json)?)?;
    }
    Ok(())
}

/// Runs the liveness monitor and prints status on every reinitialize.
async fn run_monitor(config: &Config, pool: WatcherPool, cancel: CancellationToken) -> color_eyre::Result<()> {
    let project = ProjectWatcher::new(&config.project, pool)?;
    info!(root = %project.root(), interval_ms = config.project.liveness_interval_ms, "Monitoring project root");

    let mut events = project.subscribe();
    project.ensure_started()?;
    let monitor = project.spawn_liveness_monitor(config.project.liveness_interval(), cancel.clone())?;
    print_line(&serde_json::to_string(&project.status())?)?;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(ProjectEvent::Changed) => debug!(root = %project.root(), "Project changed"),
                Ok(ProjectEvent::Reinitialized { generation, reason }) => {
                    info!(generation, %reason, "Project reinitialized");
                    print_line(&serde_json::to_string(&project.status())?)?;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped project events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Err(error) = monitor.await {
        warn!(error = %error, "Liveness monitor ended abnormally");
    }
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Build configuration and the shared pool
    let config = build_config(&cli)?;
    let pool = WatcherPool::native(&config.watch);
    let cache = ReactiveCache::new(pool.clone(), &config.cache);
    let cancel = CancellationToken::new();

    // 5. Route to appropriate command
    let result = match &cli.command {
        Commands::Once(read) => run_once_read(&cache, &read.clone().resolve(&config.project.root), cli.json),
        Commands::Follow { read } => {
            spawn_shutdown_listener(cancel.clone())?;
            let read = read.clone().resolve(&config.project.root);
            run_follow(cache.clone(), read, cli.json, cancel).await
        }
        Commands::Monitor { .. } => {
            spawn_shutdown_listener(cancel.clone())?;
            run_monitor(&config, pool.clone(), cancel).await
        }
    };

    cache.clear();
    pool.close_all();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_follow_parses_nested_read() {
        let cli = Cli::try_parse_from(["sdd-watch", "follow", "ls", "specs", "--dirs-only", "--exclude", "drafts"]).unwrap();
        let Commands::Follow {
            read: Read::Ls { path, filters },
        } = cli.command
        else {
            panic!("expected follow ls");
        };
        assert_eq!(path, "specs");
        let options = DirOptions::from(&filters);
        assert!(options.directories_only);
        assert_eq!(options.exclude, vec!["drafts"]);
    }

    #[test]
    fn test_conflicting_filters_rejected() {
        assert!(Cli::try_parse_from(["sdd-watch", "ls", ".", "--files-only", "--dirs-only"]).is_err());
    }

    #[test]
    fn test_resolve_relative_paths() {
        let root = Utf8Path::new("/srv/project");
        let Read::Cat { path } = (Read::Cat { path: "specs/a.md".into() }).resolve(root) else {
            panic!("expected cat");
        };
        assert_eq!(path, "/srv/project/specs/a.md");

        let Read::Exists { path } = (Read::Exists { path: "/etc".into() }).resolve(root) else {
            panic!("expected exists");
        };
        assert_eq!(path, "/etc");
    }

    #[test]
    fn test_render_plain_and_json() {
        let listing = Reading::Listing(vec![
            DirEntry {
                name: "docs".to_owned(),
                kind: EntryKind::Directory,
            },
            DirEntry {
                name: "a.md".to_owned(),
                kind: EntryKind::File,
            },
        ]);
        assert_eq!(render(&listing, false).unwrap(), "docs/\na.md");
        assert_eq!(render(&Reading::Text(None), false).unwrap(), "<absent>");
        insta::assert_snapshot!(
            render(&listing, true).unwrap(),
            @r#"[{"name":"docs","kind":"directory"},{"name":"a.md","kind":"file"}]"#
        );
        assert_eq!(render(&Reading::Flag(true), true).unwrap(), "true");
    }
}
