//! Shared, append-only log of ingested samples files.
//!
//! Both the scan worker and on-demand reads record into the same
//! [`ResultsLog`]. Appends are serialized by a mutex, so a reader of the log
//! never observes a partially built [`SamplesFile`]; every entry is an
//! immutable `Arc`. Subscribers additionally receive each file as it is
//! appended through a `tokio::sync::broadcast` channel.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{FileHandlerError, Result};
use crate::samples::{format, SamplesFile};

/// Append-only collection of completed reads.
#[derive(Debug)]
pub struct ResultsLog {
    files: Mutex<Vec<Arc<SamplesFile>>>,
    notifier: broadcast::Sender<Arc<SamplesFile>>,
}

impl ResultsLog {
    /// Create an empty log whose subscribers buffer up to `notify_capacity` files.
    #[must_use]
    pub fn new(notify_capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(notify_capacity.max(1));
        Self {
            files: Mutex::new(Vec::new()),
            notifier,
        }
    }

    /// Read the samples file at `path` and append it.
    pub(crate) fn ingest(&self, path: &Path) -> Result<Arc<SamplesFile>> {
        let file = format::read_path(path).map_err(|e| FileHandlerError::io(path, e))?;
        Ok(self.append(file))
    }

    pub(crate) fn append(&self, file: SamplesFile) -> Arc<SamplesFile> {
        let file = Arc::new(file);
        let mut files = self.files.lock();
        files.push(Arc::clone(&file));
        // No subscribers is not an error
        let _ = self.notifier.send(Arc::clone(&file));
        file
    }

    /// Copy of the current entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SamplesFile>> {
        self.files.lock().clone()
    }

    /// Remove and return every entry.
    pub fn take_all(&self) -> Vec<Arc<SamplesFile>> {
        std::mem::take(&mut *self.files.lock())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    /// Receive every file appended after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SamplesFile>> {
        self.notifier.subscribe()
    }
}

impl Default for ResultsLog {
    fn default() -> Self {
        Self::new(64)
    }
}
