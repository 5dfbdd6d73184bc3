//! Filesystem primitives for the samples directory.
//!
//! These helpers are deliberately forgiving: the directory is shared with a
//! producer process and with the scan worker, so files can appear, grow, or
//! disappear between any two calls.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{FileHandlerError, Result};

/// A listed file and the metadata the scan loop orders by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Absolute or directory-relative path of the file
    pub full_path: PathBuf,
    /// Final path component
    pub name: String,
    /// Last modification time
    pub last_write_time: DateTime<Utc>,
}

/// File-name glob supporting `*` and `?`.
#[derive(Debug, Clone)]
pub struct NameGlob {
    source: String,
    regex: Regex,
}

impl NameGlob {
    /// Compile a glob such as `*.txt`.
    pub fn new(glob: &str) -> Result<Self> {
        let mut pattern = String::with_capacity(glob.len() + 8);
        pattern.push('^');
        for c in glob.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|source| FileHandlerError::InvalidPattern {
            pattern: glob.to_string(),
            source,
        })?;

        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    /// Whether `name` matches the glob.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The glob text this was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// List regular files in `dir` whose names match `glob`, oldest first.
///
/// Entries removed while the listing is in progress are skipped.
pub fn list_matching(dir: &Path, glob: &NameGlob) -> io::Result<Vec<FileMetadata>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        if !glob.matches(&name) {
            continue;
        }

        // Re-check through metadata: the scan worker may have deleted it
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }

        files.push(FileMetadata {
            full_path: entry.path(),
            name,
            last_write_time: DateTime::<Utc>::from(metadata.modified()?),
        });
    }

    files.sort_by(|a, b| {
        a.last_write_time
            .cmp(&b.last_write_time)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(files)
}

/// Whether `path` currently exists.
#[must_use]
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Whether another process appears to hold `path`.
///
/// Opens the file for reading and writing and, on Unix, tries a non-blocking
/// exclusive `flock`. Every failure, including a missing file or a permission
/// problem, counts as locked; the caller retries on a later poll.
#[must_use]
#[allow(unsafe_code)]
pub fn is_locked(path: &Path) -> bool {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "File treated as locked");
            return true;
        }
    };

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `file` for the duration of both calls.
        let locked = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } != 0;
        if locked {
            debug!(path = %path.display(), "File holds an exclusive lock");
            return true;
        }
        // SAFETY: as above; releases the lock taken by this probe.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }

    drop(file);
    false
}

/// Create `path` and its parents if missing.
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
        debug!(path = %path.display(), "Created samples directory");
    }
    Ok(())
}

/// Delete `path`, logging instead of failing.
pub fn delete_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Deleted consumed file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete consumed file"),
    }
}
