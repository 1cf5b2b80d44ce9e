//! The reactive cache.

use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sdd_core::CacheConfig;
use sdd_reactive::Signal;
use sdd_watcher::{AcquireOptions, WatchGuard, WatcherPool, normalize_path};

use crate::fs;
use crate::key::CacheKey;
use crate::types::{DirEntry, DirOptions, FileStat};

/// The signal behind one cache entry.
enum EntrySignal {
    Text(Signal<Option<String>>),
    Listing(Signal<Vec<DirEntry>>),
    Flag(Signal<bool>),
    Stat(Signal<Option<FileStat>>),
}

struct CacheEntry {
    signal: EntrySignal,
    /// Keeps the entry's watch open; dropped with the entry.
    _guard: WatchGuard,
}

/// A value type that can live in a cache entry.
trait Cached: Clone + Send + Sync + Sized + 'static {
    fn new_signal(value: Self) -> Signal<Self>;
    fn wrap(signal: Signal<Self>) -> EntrySignal;
    fn project(entry: &EntrySignal) -> Option<&Signal<Self>>;
}

macro_rules! cached_value {
    ($ty:ty, $variant:ident, $new:expr) => {
        impl Cached for $ty {
            fn new_signal(value: Self) -> Signal<Self> {
                $new(value)
            }

            fn wrap(signal: Signal<Self>) -> EntrySignal {
                EntrySignal::$variant(signal)
            }

            fn project(entry: &EntrySignal) -> Option<&Signal<Self>> {
                match entry {
                    EntrySignal::$variant(signal) => Some(signal),
                    _ => None,
                }
            }
        }
    };
}

cached_value!(Option<String>, Text, Signal::new);
cached_value!(Vec<DirEntry>, Listing, Signal::new);
cached_value!(bool, Flag, Signal::new);
cached_value!(Option<FileStat>, Stat, stat_signal);

fn stat_signal(value: Option<FileStat>) -> Signal<Option<FileStat>> {
    Signal::with_equality(value, |a, b| match (a, b) {
        (Some(a), Some(b)) => a.same_state(b),
        (None, None) => true,
        _ => false,
    })
}

/// Reactive, watch-backed reads of the filesystem.
///
/// Each distinct `(kind, path, options)` gets one [`Signal`], seeded by a
/// single OS read and kept current by a [`WatcherPool`] subscription whose
/// callback re-reads and sets it. Reading through the cache inside a
/// [`Context`](sdd_reactive::Context) registers the dependency, so a
/// [`stream`](sdd_reactive::stream) over cache reads re-runs whenever what
/// it read changes on disk.
///
/// Absence is a value: a missing file reads as `None`, a missing directory
/// lists as empty, and `exists` is `false`. Other I/O errors read the same way.
///
/// Cloning the cache yields another handle to the same entries.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use futures_util::StreamExt;
/// use sdd_cache::ReactiveCache;
/// use sdd_core::{CacheConfig, WatchConfig};
/// use sdd_reactive::stream;
/// use sdd_watcher::WatcherPool;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let pool = WatcherPool::native(&WatchConfig::default());
/// let cache = ReactiveCache::new(pool, &CacheConfig::default());
///
/// let reader = cache.clone();
/// let mut contents = Box::pin(stream(
///     move || reader.read_file(Utf8Path::new("specs/overview.md")),
///     CancellationToken::new(),
/// ));
/// while let Some(text) = contents.next().await {
///     println!("{}", text.unwrap_or_default());
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct ReactiveCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    pool: WatcherPool,
    options: AcquireOptions,
    entries: Mutex<FxHashMap<CacheKey, CacheEntry>>,
}

impl ReactiveCache {
    /// Creates an empty cache whose watches come from `pool`.
    pub fn new(pool: WatcherPool, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                pool,
                options: AcquireOptions::new(config.debounce()),
                entries: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Returns the pool the cache watches through.
    #[must_use]
    pub fn pool(&self) -> &WatcherPool {
        &self.inner.pool
    }

    /// Returns the contents of a UTF-8 file, or `None` if it cannot be read.
    pub fn read_file(&self, path: &Utf8Path) -> Option<String> {
        let Some(path) = Self::normalize(path) else {
            return fs::read_file(path);
        };
        let target = path.clone();
        self.lookup(CacheKey::File(path), move || fs::read_file(&target))
    }

    /// Returns the filtered entries of a directory, sorted by name.
    pub fn read_directory(&self, path: &Utf8Path, options: &DirOptions) -> Vec<DirEntry> {
        let Some(path) = Self::normalize(path) else {
            return fs::read_directory(path, options);
        };
        let key = CacheKey::dir(path.clone(), options);
        let options = options.normalized();
        self.lookup(key, move || fs::read_directory(&path, &options))
    }

    /// Returns whether anything exists at `path`.
    pub fn exists(&self, path: &Utf8Path) -> bool {
        let Some(path) = Self::normalize(path) else {
            return fs::exists(path);
        };
        let target = path.clone();
        self.lookup(CacheKey::Exists(path), move || fs::exists(&target))
    }

    /// Returns the metadata of `path`, or `None` if it cannot be stat'ed.
    ///
    /// A permission-only change does not count as a change; readers keep the
    /// previously observed stat until something else differs.
    pub fn stat(&self, path: &Utf8Path) -> Option<FileStat> {
        let Some(path) = Self::normalize(path) else {
            return fs::stat(path);
        };
        let target = path.clone();
        self.lookup(CacheKey::Stat(path), move || fs::stat(&target))
    }

    /// Returns the number of live cache entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns the display form of every cache key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.entries.lock().keys().map(ToString::to_string).collect();
        keys.sort_unstable();
        keys
    }

    /// Drops every entry for `path`, releasing their watches. Returns how many
    /// entries were dropped.
    pub fn evict(&self, path: &Utf8Path) -> usize {
        let Some(path) = Self::normalize(path) else {
            return 0;
        };
        let evicted: Vec<CacheEntry> = {
            let mut entries = self.inner.entries.lock();
            let keys: Vec<CacheKey> = entries.keys().filter(|key| key.path() == path.as_path()).cloned().collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        tracing::debug!(path = %path, evicted = evicted.len(), "Evicted cache entries");
        evicted.len()
    }

    /// Drops every entry, releasing all of the cache's watches.
    pub fn clear(&self) {
        let drained: Vec<CacheEntry> = self.inner.entries.lock().drain().map(|(_, entry)| entry).collect();
        tracing::debug!(cleared = drained.len(), "Cleared cache");
    }

    fn normalize(path: &Utf8Path) -> Option<Utf8PathBuf> {
        match normalize_path(path) {
            Ok(normalized) => Some(normalized),
            Err(error) => {
                tracing::warn!(path = %path, error = %error, "Cannot normalize path, reading uncached");
                None
            }
        }
    }

    fn lookup<T, R>(&self, key: CacheKey, read: R) -> T
    where
        T: Cached,
        R: Fn() -> T + Send + Sync + 'static,
    {
        let cached = self
            .inner
            .entries
            .lock()
            .get(&key)
            .and_then(|entry| T::project(&entry.signal).cloned());
        if let Some(signal) = cached {
            return signal.get();
        }

        let read = Arc::new(read);
        let signal = T::new_signal(read());
        let writer = signal.clone();
        let refresh = Arc::clone(&read);
        let guard = match self.inner.pool.acquire(
            key.watch_path(),
            move || {
                writer.set(refresh());
                Ok(())
            },
            self.inner.options,
        ) {
            Ok(guard) => guard,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "Watch unavailable, returning uncached read");
                return signal.get_untracked();
            }
        };
        // Writes between the seed read and the watch opening raise no event.
        signal.set(read());

        let shared = match self.inner.entries.lock().entry(key) {
            Entry::Occupied(occupied) => T::project(&occupied.get().signal).cloned(),
            Entry::Vacant(vacant) => {
                tracing::debug!(key = %vacant.key(), "Created cache entry");
                vacant.insert(CacheEntry {
                    signal: T::wrap(signal.clone()),
                    _guard: guard,
                });
                None
            }
        };
        shared.unwrap_or(signal).get()
    }
}

impl fmt::Debug for ReactiveCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCache")
            .field("entries", &self.entry_count())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use sdd_core::WatchConfig;
    use sdd_reactive::{Context, stream};
    use sdd_watcher::{EventSink, WatchBackend, WatchError, WatchHandle};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Records sinks so tests can fire events by path.
    #[derive(Clone, Default)]
    struct FakeBackend {
        sinks: Arc<Mutex<Vec<(Utf8PathBuf, EventSink)>>>,
    }

    impl FakeBackend {
        fn fire(&self, path: &Utf8Path) {
            for (watched, sink) in self.sinks.lock().iter() {
                if watched == path {
                    sink.notify();
                }
            }
        }
    }

    impl WatchBackend for FakeBackend {
        fn watch(&self, path: &Utf8Path, _recursive: bool, sink: EventSink) -> Result<WatchHandle, WatchError> {
            self.sinks.lock().push((path.to_path_buf(), sink));
            Ok(WatchHandle::new(()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        backend: FakeBackend,
        cache: ReactiveCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        let backend = FakeBackend::default();
        let pool = WatcherPool::new(backend.clone(), &WatchConfig::default());
        let cache = ReactiveCache::new(pool, &CacheConfig::default());
        Fixture {
            _dir: dir,
            root,
            backend,
            cache,
        }
    }

    async fn past_debounce() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_reads_share_one_entry() {
        let f = fixture();
        f.cache.read_directory(&f.root, &DirOptions::default());
        f.cache.read_directory(&f.root, &DirOptions::default());
        assert_eq!(f.cache.entry_count(), 1);

        f.cache.read_directory(&f.root, &DirOptions::default().directories_only());
        assert_eq!(f.cache.entry_count(), 2);
        assert_eq!(f.cache.pool().active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_reads_watch_the_parent() {
        let f = fixture();
        f.cache.read_file(&f.root.join("a.md"));
        f.cache.stat(&f.root.join("b.md"));
        f.cache.read_directory(&f.root, &DirOptions::default());

        assert_eq!(f.cache.entry_count(), 3);
        assert_eq!(f.cache.pool().active_count(), 1);
        assert_eq!(f.cache.pool().status().callbacks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_event_refreshes_value() {
        let f = fixture();
        let file = f.root.join("spec.md");
        assert_eq!(f.cache.read_file(&file), None);

        std::fs::write(&file, "hello").unwrap();
        assert_eq!(f.cache.read_file(&file), None);

        f.backend.fire(&f.root);
        past_debounce().await;
        assert_eq!(f.cache.read_file(&file).as_deref(), Some("hello"));
    }

    /// Writes a file while the watch is being opened.
    struct WriteOnWatch(Utf8PathBuf);

    impl WatchBackend for WriteOnWatch {
        fn watch(&self, _path: &Utf8Path, _recursive: bool, _sink: EventSink) -> Result<WatchHandle, WatchError> {
            std::fs::write(&self.0, "hello").unwrap();
            Ok(WatchHandle::new(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_while_watch_opens_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        let file = root.join("spec.md");
        let pool = WatcherPool::new(WriteOnWatch(file.clone()), &WatchConfig::default());
        let cache = ReactiveCache::new(pool, &CacheConfig::default());

        assert_eq!(cache.read_file(&file).as_deref(), Some("hello"));
        past_debounce().await;
        assert_eq!(cache.read_file(&file).as_deref(), Some("hello"));
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_over_exists() {
        let f = fixture();
        let target = f.root.join("later");
        let reader = f.cache.clone();
        let probe = target.clone();
        let mut values = Box::pin(stream(move || reader.exists(&probe), CancellationToken::new()));

        assert_eq!(values.next().await, Some(false));
        std::fs::create_dir(&target).unwrap();
        f.backend.fire(&f.root);
        assert_eq!(values.next().await, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_inside_context_is_tracked() {
        let f = fixture();
        let context = Context::new();
        context.run_once(|| f.cache.exists(&f.root));
        assert_eq!(context.dependency_count(), 1);

        f.cache.exists(&f.root);
        assert_eq!(context.dependency_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_releases_watches() {
        let f = fixture();
        let file = f.root.join("a.md");
        f.cache.read_file(&file);
        f.cache.stat(&file);
        f.cache.exists(&f.root);

        assert_eq!(f.cache.evict(&file), 2);
        assert_eq!(f.cache.entry_count(), 1);
        assert_eq!(f.cache.pool().status().callbacks, 1);

        f.cache.clear();
        assert_eq!(f.cache.entry_count(), 0);
        assert_eq!(f.cache.pool().active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_stat_ignores_permission_change() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let file = f.root.join("a.md");
        std::fs::write(&file, "a").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
        let before = f.cache.stat(&file).unwrap();

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();
        f.backend.fire(&f.root);
        past_debounce().await;

        assert_eq!(f.cache.stat(&file).unwrap().mode, before.mode);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_snapshot() {
        let f = fixture();
        f.cache.read_directory(&f.root, &DirOptions::default().files_only());
        f.cache.exists(&f.root);

        let keys: Vec<String> = f
            .cache
            .keys()
            .into_iter()
            .map(|key| key.replace(f.root.as_str(), "<root>"))
            .collect();
        insta::assert_snapshot!(keys.join("\n"), @r#"
        dir:<root>:{"filesOnly":true}
        exists:<root>
        "#);
    }

    #[test]
    fn test_outside_runtime_reads_uncached() {
        let f = fixture();
        let file = f.root.join("a.md");
        std::fs::write(&file, "plain").unwrap();

        assert_eq!(f.cache.read_file(&file).as_deref(), Some("plain"));
        assert_eq!(f.cache.entry_count(), 0);
    }
}
