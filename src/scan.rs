//! Directory scan loop run by the background worker.
//!
//! The loop keeps a FIFO queue of candidate files ordered by modification
//! time. Each iteration inspects the head, reads it when the name matches the
//! configured pattern and no other process holds it, then drops it from the
//! queue. New arrivals are detected with a modification-time watermark: only
//! files strictly newer than the newest file already queued are enqueued.
//!
//! The watermark is the only duplicate filter. A file rewritten in place with
//! a timestamp at or below the watermark is not picked up again.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, trace};

use crate::directory::{self, FileMetadata, NameGlob};
use crate::error::{FileHandlerError, Result};
use crate::results::ResultsLog;

/// What happened to the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Read,
    PatternMismatch,
    Locked,
}

/// State owned by one scan worker.
pub(crate) struct Scanner {
    pub(crate) directory: PathBuf,
    pub(crate) glob: NameGlob,
    pub(crate) pattern: Regex,
    pub(crate) poll_interval: Duration,
    pub(crate) delete_consumed: bool,
    pub(crate) results: Arc<ResultsLog>,
    pub(crate) watermark: Arc<Mutex<Option<DateTime<Utc>>>>,
    pub(crate) cancel: Arc<AtomicBool>,
}

impl Scanner {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run until cancelled or until reading a file fails.
    pub(crate) fn run(&self) -> Result<()> {
        if self.is_cancelled() {
            debug!("Scan cancelled before it started");
            return Ok(());
        }

        let (mut queue, mut watermark) = self.initial_queue()?;
        info!(
            directory = %self.directory.display(),
            pattern = self.pattern.as_str(),
            queued = queue.len(),
            "Starting directory scan"
        );

        while !self.is_cancelled() {
            match queue.front().cloned() {
                Some(head) => {
                    let outcome = self.consume(&head);
                    queue.pop_front();

                    // A locked file is still being produced; leave it on disk. It is
                    // only retried if the producer's final write moves its mtime past
                    // the watermark.
                    if self.delete_consumed && !matches!(outcome, Ok(Disposition::Locked)) {
                        directory::delete_file(&head.full_path);
                    }
                    outcome?;
                }
                None => thread::sleep(self.poll_interval),
            }

            self.refresh(&mut queue, &mut watermark)?;
        }

        info!(remaining = queue.len(), "Scan cancelled");
        Ok(())
    }

    fn consume(&self, head: &FileMetadata) -> Result<Disposition> {
        if !self.pattern.is_match(&head.name) {
            trace!(file = %head.name, "Skipping file not matching pattern");
            return Ok(Disposition::PatternMismatch);
        }
        if directory::is_locked(&head.full_path) {
            debug!(file = %head.name, "Skipping locked file");
            return Ok(Disposition::Locked);
        }

        let file = self.results.ingest(&head.full_path)?;
        debug!(file = %head.name, samples = file.samples.len(), "Ingested samples file");
        Ok(Disposition::Read)
    }

    fn list(&self) -> Result<Vec<FileMetadata>> {
        directory::list_matching(&self.directory, &self.glob)
            .map_err(|e| FileHandlerError::io(&self.directory, e))
    }

    fn initial_queue(&self) -> Result<(VecDeque<FileMetadata>, DateTime<Utc>)> {
        let files = self.list()?;
        let watermark = files
            .last()
            .map_or_else(Utc::now, |newest| newest.last_write_time);
        self.publish(watermark);
        Ok((files.into(), watermark))
    }

    fn refresh(
        &self,
        queue: &mut VecDeque<FileMetadata>,
        watermark: &mut DateTime<Utc>,
    ) -> Result<()> {
        if let Some(newest) = queue.back() {
            *watermark = (*watermark).max(newest.last_write_time);
        }

        let fresh: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|f| f.last_write_time > *watermark)
            .collect();

        if let Some(newest) = fresh.last() {
            *watermark = newest.last_write_time;
            debug!(new_files = fresh.len(), "Found new files");
        }
        queue.extend(fresh);
        self.publish(*watermark);
        Ok(())
    }

    fn publish(&self, watermark: DateTime<Utc>) {
        *self.watermark.lock() = Some(watermark);
    }
}
