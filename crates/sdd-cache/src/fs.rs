//! One-shot OS reads.
//!
//! Every failure, not-found or otherwise, resolves to the empty value for
//! its read. The cache reflects what is readable right now.

use camino::Utf8Path;

use crate::types::{DirEntry, DirOptions, EntryKind, FileStat};

pub(crate) fn read_file(path: &Utf8Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(error) => {
            log_failure(path, "read_file", &error);
            None
        }
    }
}

pub(crate) fn read_directory(path: &Utf8Path, options: &DirOptions) -> Vec<DirEntry> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) => {
            log_failure(path, "read_directory", &error);
            return Vec::new();
        }
    };

    let mut listing: Vec<DirEntry> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let kind = entry.file_type().map_or(EntryKind::Other, EntryKind::from_file_type);
            Some(DirEntry { name, kind })
        })
        .filter(|entry| options.accepts(entry))
        .collect();
    listing.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    listing
}

pub(crate) fn exists(path: &Utf8Path) -> bool {
    path.exists()
}

pub(crate) fn stat(path: &Utf8Path) -> Option<FileStat> {
    match std::fs::metadata(path) {
        Ok(metadata) => Some(FileStat::from_metadata(&metadata)),
        Err(error) => {
            log_failure(path, "stat", &error);
            None
        }
    }
}

fn log_failure(path: &Utf8Path, op: &'static str, error: &std::io::Error) {
    if error.kind() == std::io::ErrorKind::NotFound {
        tracing::trace!(path = %path, op, "Path absent");
    } else {
        tracing::debug!(path = %path, op, error = %error, "Read failed, treating as absent");
    }
}
