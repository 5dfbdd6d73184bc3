//! File handler state machine.
//!
//! [`FileHandler`] owns the I/O direction of one samples directory. In
//! [`StreamMode::Write`] it persists [`SamplesFile`]s on demand. In
//! [`StreamMode::Read`] it either reads named files on demand
//! ([`ReadMode::OnDemand`]) or runs a background worker that polls the
//! directory and ingests matching files as they arrive ([`ReadMode::Scan`]).
//!
//! # Guards
//!
//! `writer_busy` and `reader_busy` allow at most one write and one read or
//! scan at a time per handler. Every public entry point checks and sets the
//! relevant flag under the state lock, and a drop guard clears it again on
//! every exit path. Mode changes are refused while the writer is busy, and a
//! busy reader can only be reconfigured by the Scan → OnDemand handoff, which
//! stops the worker first.
//!
//! # Scan worker lifecycle
//!
//! ```text
//! Created ──start_scan──► Running ──stop_scan──► Created
//!                            │
//!                            └──read error──► Faulted ──take_scan_fault──► Created
//! ```
//!
//! # Example
//!
//! ```no_run
//! use usrp_io::{ComplexSample, FileHandler, ReadMode, SamplesFile, Scanning, StreamMode};
//!
//! # fn main() -> usrp_io::Result<()> {
//! let handler = FileHandler::new("rx_spool", StreamMode::Write)?;
//! handler.write_file(
//!     &SamplesFile::new("a.txt")
//!         .with_header("fs", "1000000")
//!         .with_samples([ComplexSample::new(1.0, 2.0)]),
//! )?;
//!
//! handler.change_mode(StreamMode::Read, Some(ReadMode::OnDemand))?;
//! handler.change_read_mode_with(ReadMode::Scan, Scanning::Start, r"^RX_\d+\.txt$")?;
//! // ... files are ingested into handler.results() ...
//! handler.stop_scan()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::complex::ComplexSample;
use crate::config::FileHandlerConfig;
use crate::directory::{self, NameGlob};
use crate::error::{BusyResource, FileHandlerError, Result};
use crate::results::ResultsLog;
use crate::samples::{format, Header, SamplesFile};
use crate::scan::Scanner;

/// Direction of intended I/O.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMode {
    /// Persist samples files
    #[default]
    Write,
    /// Ingest samples files
    Read,
}

/// Read strategy, meaningful only in [`StreamMode::Read`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// Background worker polls the directory
    Scan,
    /// Files are read individually by name
    #[default]
    OnDemand,
}

/// Whether entering scan mode also starts the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scanning {
    /// Start scanning immediately
    Start,
    /// Only switch the read mode
    Stop,
}

/// Lifecycle of the scan worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTaskState {
    /// Ready for a new worker
    Created,
    /// Worker is polling
    Running,
    /// Worker returned without being cancelled
    RanToCompletion,
    /// Worker observed cancellation and returned
    Cancelled,
    /// Worker stopped on an error; reap it with [`FileHandler::take_scan_fault`]
    Faulted,
}

#[derive(Debug)]
struct HandlerState {
    mode: StreamMode,
    read_mode: ReadMode,
    writer_busy: bool,
    reader_busy: bool,
    file_pattern: Option<String>,
}

impl HandlerState {
    fn wrong_mode(&self, operation: &'static str) -> FileHandlerError {
        FileHandlerError::WrongMode {
            operation,
            mode: self.mode,
            read_mode: self.read_mode,
        }
    }

    fn ensure_writer_idle(&self) -> Result<()> {
        if self.writer_busy {
            return Err(FileHandlerError::Busy {
                resource: BusyResource::Writer,
            });
        }
        Ok(())
    }

    fn ensure_reader_idle(&self) -> Result<()> {
        if self.reader_busy {
            return Err(FileHandlerError::Busy {
                resource: BusyResource::Reader,
            });
        }
        Ok(())
    }

    fn busy_flag(&mut self, resource: BusyResource) -> &mut bool {
        match resource {
            BusyResource::Writer => &mut self.writer_busy,
            BusyResource::Reader => &mut self.reader_busy,
        }
    }
}

struct ScanWorker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<()>>,
}

struct Inner {
    directory: PathBuf,
    glob: NameGlob,
    poll_interval: Duration,
    startup_timeout: Duration,
    delete_consumed: bool,
    state: Mutex<HandlerState>,
    scan_state: Arc<Mutex<ScanTaskState>>,
    worker: Mutex<Option<ScanWorker>>,
    watermark: Arc<Mutex<Option<DateTime<Utc>>>>,
    results: Arc<ResultsLog>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.store(true, Ordering::SeqCst);
            if worker.handle.join().is_err() {
                error!("Scan worker panicked during shutdown");
            }
        }
    }
}

/// Clears a busy flag when dropped.
struct BusyGuard<'a> {
    inner: &'a Inner,
    resource: BusyResource,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *self.inner.state.lock().busy_flag(self.resource) = false;
    }
}

/// Returns the scan slot to `Created` and clears `reader_busy` when dropped.
struct ScanRelease<'a> {
    inner: &'a Inner,
}

impl Drop for ScanRelease<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        *self.inner.scan_state.lock() = ScanTaskState::Created;
        state.reader_busy = false;
    }
}

/// Reader/writer of a samples directory. Cloning yields another handle to the
/// same handler.
#[derive(Clone)]
pub struct FileHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FileHandler")
            .field("directory", &self.inner.directory)
            .field("mode", &state.mode)
            .field("read_mode", &state.read_mode)
            .field("writer_busy", &state.writer_busy)
            .field("reader_busy", &state.reader_busy)
            .field("scan_state", &*self.inner.scan_state.lock())
            .finish()
    }
}

impl FileHandler {
    /// Create a handler over `directory` in `mode`, creating the directory if
    /// needed. An empty path selects `Temp` under the working directory.
    pub fn new(directory: impl Into<PathBuf>, mode: StreamMode) -> Result<Self> {
        Self::from_config(&FileHandlerConfig::new(directory, mode))
    }

    /// Create a handler from a full configuration.
    pub fn from_config(config: &FileHandlerConfig) -> Result<Self> {
        config.validate()?;

        let directory = config.resolved_directory();
        directory::ensure_directory(&directory)
            .map_err(|e| FileHandlerError::io(&directory, e))?;

        let handler = Self {
            inner: Arc::new(Inner {
                glob: NameGlob::new(&config.scan_glob)?,
                poll_interval: config.poll_interval(),
                startup_timeout: config.startup_timeout(),
                delete_consumed: config.deletes_consumed(),
                state: Mutex::new(HandlerState {
                    mode: config.mode,
                    read_mode: ReadMode::OnDemand,
                    writer_busy: false,
                    reader_busy: false,
                    file_pattern: None,
                }),
                scan_state: Arc::new(Mutex::new(ScanTaskState::Created)),
                worker: Mutex::new(None),
                watermark: Arc::new(Mutex::new(None)),
                results: Arc::new(ResultsLog::new(config.notify_capacity)),
                directory,
            }),
        };

        info!(
            directory = %handler.inner.directory.display(),
            mode = ?config.mode,
            delete_consumed = handler.inner.delete_consumed,
            "File handler created"
        );
        Ok(handler)
    }

    // ----- accessors -------------------------------------------------------

    /// Samples directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Current stream mode.
    #[must_use]
    pub fn mode(&self) -> StreamMode {
        self.inner.state.lock().mode
    }

    /// Current read mode.
    #[must_use]
    pub fn read_mode(&self) -> ReadMode {
        self.inner.state.lock().read_mode
    }

    /// Whether a write is in flight.
    #[must_use]
    pub fn is_writer_busy(&self) -> bool {
        self.inner.state.lock().writer_busy
    }

    /// Whether an on-demand read or a scan is in flight.
    #[must_use]
    pub fn is_reader_busy(&self) -> bool {
        self.inner.state.lock().reader_busy
    }

    /// Lifecycle state of the scan worker slot.
    #[must_use]
    pub fn scan_state(&self) -> ScanTaskState {
        *self.inner.scan_state.lock()
    }

    /// Pattern passed to the most recent successful [`FileHandler::start_scan`].
    #[must_use]
    pub fn file_pattern(&self) -> Option<String> {
        self.inner.state.lock().file_pattern.clone()
    }

    /// Modification-time watermark of the current or last scan.
    #[must_use]
    pub fn last_modification(&self) -> Option<DateTime<Utc>> {
        *self.inner.watermark.lock()
    }

    /// Shared log of every file read so far.
    #[must_use]
    pub fn results(&self) -> Arc<ResultsLog> {
        Arc::clone(&self.inner.results)
    }

    // ----- mode transitions ------------------------------------------------

    /// Switch stream mode. Entering [`StreamMode::Read`] without a read mode
    /// selects [`ReadMode::OnDemand`]; leaving it stops a running scan.
    pub fn change_mode(&self, mode: StreamMode, read_mode: Option<ReadMode>) -> Result<()> {
        let (current_mode, current_read_mode) = {
            let state = self.inner.state.lock();
            state.ensure_writer_idle()?;
            (state.mode, state.read_mode)
        };

        let target_read_mode = match mode {
            StreamMode::Write => ReadMode::OnDemand,
            StreamMode::Read => read_mode.unwrap_or_default(),
        };
        let skip_read_mode = current_mode == mode && current_read_mode == target_read_mode;
        if !skip_read_mode {
            self.change_read_mode(target_read_mode)?;
        }

        // Another handle may have started a write or changed the read mode
        // since the checks above
        let mut state = self.inner.state.lock();
        state.ensure_writer_idle()?;
        if state.read_mode != target_read_mode {
            state.ensure_reader_idle()?;
            state.read_mode = target_read_mode;
        }
        if mode == StreamMode::Write {
            state.ensure_reader_idle()?;
        }

        info!(from = ?state.mode, to = ?mode, "Changing stream mode");
        state.mode = mode;
        Ok(())
    }

    /// Switch read mode. Leaving [`ReadMode::Scan`] while a scan runs stops it
    /// first; any other change while the reader is busy is refused.
    pub fn change_read_mode(&self, read_mode: ReadMode) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            state.ensure_writer_idle()?;
            let handoff = state.reader_busy
                && state.read_mode == ReadMode::Scan
                && read_mode == ReadMode::OnDemand;
            if !handoff {
                state.ensure_reader_idle()?;
                debug!(read_mode = ?read_mode, "Changing read mode");
                state.read_mode = read_mode;
                return Ok(());
            }
        }

        self.release_scan_for_handoff()?;

        // The read mode is still Scan here, so a new scan may have started
        let mut state = self.inner.state.lock();
        state.ensure_writer_idle()?;
        state.ensure_reader_idle()?;
        debug!(read_mode = ?read_mode, "Changing read mode");
        state.read_mode = read_mode;
        Ok(())
    }

    /// Switch read mode and optionally start scanning for files whose names
    /// match `file_pattern`.
    pub fn change_read_mode_with(
        &self,
        read_mode: ReadMode,
        scanning: Scanning,
        file_pattern: &str,
    ) -> Result<()> {
        if read_mode == ReadMode::OnDemand || scanning == Scanning::Stop {
            return self.change_read_mode(read_mode);
        }

        {
            let mut state = self.inner.state.lock();
            state.ensure_writer_idle()?;
            state.ensure_reader_idle()?;
            debug!(read_mode = ?read_mode, "Changing read mode");
            state.read_mode = read_mode;
        }

        self.start_scan(file_pattern)
    }

    fn release_scan_for_handoff(&self) -> Result<()> {
        let outcome = match self.scan_state() {
            ScanTaskState::Faulted => self.take_scan_fault().map_or(Ok(()), Err),
            _ => self.stop_scan(),
        };

        match outcome {
            Err(e @ (FileHandlerError::Io { .. } | FileHandlerError::ScanFault { .. })) => {
                warn!(error = %e, "Scan worker had faulted; continuing read mode change");
                Ok(())
            }
            other => other,
        }
    }

    // ----- scanning --------------------------------------------------------

    /// Start the background scan for files whose names match `file_pattern`.
    ///
    /// Requires [`StreamMode::Read`] with [`ReadMode::Scan`] and a fresh worker
    /// slot. Returns once the worker has started.
    pub fn start_scan(&self, file_pattern: &str) -> Result<()> {
        let started = {
            let mut state = self.inner.state.lock();
            let mut scan_state = self.inner.scan_state.lock();

            if *scan_state == ScanTaskState::Running {
                return Err(FileHandlerError::TaskState {
                    message: "Scan task is already running",
                    state: *scan_state,
                });
            }
            if state.mode != StreamMode::Read || state.read_mode != ReadMode::Scan {
                return Err(state.wrong_mode("start scanning; change read mode to Scan first"));
            }
            if !matches!(
                *scan_state,
                ScanTaskState::Created | ScanTaskState::RanToCompletion
            ) {
                return Err(FileHandlerError::TaskState {
                    message: "Scan task malfunction; reap the previous worker before restarting",
                    state: *scan_state,
                });
            }
            if state.reader_busy {
                return Err(FileHandlerError::Busy {
                    resource: BusyResource::Reader,
                });
            }

            let pattern = Regex::new(file_pattern).map_err(|source| {
                FileHandlerError::InvalidPattern {
                    pattern: file_pattern.to_string(),
                    source,
                }
            })?;

            let cancel = Arc::new(AtomicBool::new(false));
            let scanner = Scanner {
                directory: self.inner.directory.clone(),
                glob: self.inner.glob.clone(),
                pattern,
                poll_interval: self.inner.poll_interval,
                delete_consumed: self.inner.delete_consumed,
                results: Arc::clone(&self.inner.results),
                watermark: Arc::clone(&self.inner.watermark),
                cancel: Arc::clone(&cancel),
            };

            let (started_tx, started_rx) = mpsc::channel();
            let worker_state = Arc::clone(&self.inner.scan_state);
            let handle = thread::Builder::new()
                .name("usrp-io-scan".to_string())
                .spawn(move || {
                    let _ = started_tx.send(());
                    let result = scanner.run();
                    let terminal = match &result {
                        Ok(()) if scanner.is_cancelled() => ScanTaskState::Cancelled,
                        Ok(()) => ScanTaskState::RanToCompletion,
                        Err(e) => {
                            error!(error = %e, "Scan task faulted");
                            ScanTaskState::Faulted
                        }
                    };
                    *worker_state.lock() = terminal;
                    result
                })
                .map_err(|e| FileHandlerError::ScanFault {
                    message: format!("failed to spawn scan worker: {e}"),
                })?;

            *scan_state = ScanTaskState::Running;
            state.reader_busy = true;
            state.file_pattern = Some(file_pattern.to_string());
            *self.inner.worker.lock() = Some(ScanWorker { cancel, handle });
            started_rx
        };

        match started.recv_timeout(self.inner.startup_timeout) {
            Ok(()) => info!(pattern = file_pattern, "Scan task has started"),
            Err(_) => warn!(
                pattern = file_pattern,
                timeout = ?self.inner.startup_timeout,
                "Scan task did not report startup in time"
            ),
        }
        Ok(())
    }

    /// Stop the background scan and wait for the worker to exit.
    ///
    /// The reader flag is cleared and the worker slot reset even when the
    /// worker ended with an error, which is then returned.
    pub fn stop_scan(&self) -> Result<()> {
        let worker = {
            let state = self.inner.state.lock();
            if state.mode != StreamMode::Read || state.read_mode != ReadMode::Scan {
                return Err(state.wrong_mode("stop scanning"));
            }
            let scan_state = *self.inner.scan_state.lock();
            if scan_state != ScanTaskState::Running {
                return Err(FileHandlerError::TaskState {
                    message: "Cannot stop scan task, it is not running",
                    state: scan_state,
                });
            }
            self.inner.worker.lock().take()
        };

        // Another handle is already stopping this worker
        let Some(worker) = worker else {
            return Err(FileHandlerError::TaskState {
                message: "Scan task is already being stopped",
                state: ScanTaskState::Running,
            });
        };
        let _release = ScanRelease { inner: &self.inner };

        debug!("Sending cancellation request to the scan task");
        worker.cancel.store(true, Ordering::SeqCst);
        let outcome = join_worker(worker.handle);
        info!(ok = outcome.is_ok(), "Scan task stopped");
        outcome
    }

    /// Reap a faulted scan worker, returning its error.
    ///
    /// Returns `None` unless the worker slot is [`ScanTaskState::Faulted`].
    pub fn take_scan_fault(&self) -> Option<FileHandlerError> {
        if self.scan_state() != ScanTaskState::Faulted {
            return None;
        }
        let worker = self.inner.worker.lock().take()?;
        let _release = ScanRelease { inner: &self.inner };

        join_worker(worker.handle).err()
    }

    // ----- on-demand I/O ---------------------------------------------------

    fn acquire(
        &self,
        resource: BusyResource,
        operation: &'static str,
        allowed: impl FnOnce(&HandlerState) -> bool,
    ) -> Result<BusyGuard<'_>> {
        let mut state = self.inner.state.lock();
        if !allowed(&state) {
            return Err(state.wrong_mode(operation));
        }
        let busy = state.busy_flag(resource);
        if *busy {
            return Err(FileHandlerError::Busy { resource });
        }
        *busy = true;
        Ok(BusyGuard {
            inner: &self.inner,
            resource,
        })
    }

    /// Read `name` (relative to the samples directory, or absolute) and append
    /// it to [`FileHandler::results`].
    pub fn read_file(&self, name: impl AsRef<Path>) -> Result<Arc<SamplesFile>> {
        let _guard = self.acquire(BusyResource::Reader, "read a samples file on demand", |s| {
            s.mode == StreamMode::Read && s.read_mode == ReadMode::OnDemand
        })?;

        let path = self.inner.directory.join(name.as_ref());
        self.inner.results.ingest(&path)
    }

    /// Write `file` into the samples directory under its `file_name`,
    /// replacing any existing file.
    pub fn write_file(&self, file: &SamplesFile) -> Result<()> {
        self.write_parts(&file.header, &file.samples, &file.file_name)
    }

    /// Write a header and samples to `file_name` in the samples directory.
    pub fn write_parts(
        &self,
        header: &Header,
        samples: &[ComplexSample],
        file_name: &str,
    ) -> Result<()> {
        let _guard = self.acquire(BusyResource::Writer, "write a samples file", |s| {
            s.mode == StreamMode::Write
        })?;

        let path = self.inner.directory.join(file_name);
        format::write_path(&path, header, samples).map_err(|e| FileHandlerError::io(&path, e))?;
        debug!(path = %path.display(), samples = samples.len(), "Wrote samples file");
        Ok(())
    }

    /// [`FileHandler::read_file`] on Tokio's blocking pool.
    pub async fn read_file_async(&self, name: impl Into<PathBuf>) -> Result<Arc<SamplesFile>> {
        let handler = self.clone();
        let name = name.into();
        tokio::task::spawn_blocking(move || handler.read_file(name)).await?
    }

    /// [`FileHandler::write_file`] on Tokio's blocking pool.
    pub async fn write_file_async(&self, file: SamplesFile) -> Result<()> {
        let handler = self.clone();
        tokio::task::spawn_blocking(move || handler.write_file(&file)).await?
    }
}

fn join_worker(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "scan worker panicked".to_string());
            Err(FileHandlerError::ScanFault { message })
        }
    }
}
