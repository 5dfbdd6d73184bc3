//! # USRP I/O Library
//!
//! This crate moves complex-valued signal samples between a software-defined-radio
//! pipeline and a directory of plain-text files. A producer process drops sample
//! files into the directory; a [`FileHandler`] in read mode picks them up, or, in
//! write mode, persists captured samples for someone else to consume.
//!
//! ## Crate Structure
//!
//! - **`complex`**: The [`ComplexSample`] value type and its `"<re> <im>"` text form.
//! - **`samples`**: The [`SamplesFile`] record (header plus samples) and, in
//!   `samples::format`, the on-disk reader and writer.
//! - **`directory`**: Listing, lock probing, and deletion helpers for the samples
//!   directory.
//! - **`handler`**: The [`FileHandler`] state machine: stream and read modes, busy
//!   flags, on-demand reads and writes, and the scan worker lifecycle.
//! - **`results`**: The shared [`ResultsLog`] every successful read is appended to.
//! - **`error`**: The [`FileHandlerError`] enum used across the crate.
//! - **`config`**: [`FileHandlerConfig`] loaded from TOML and environment variables.
//!
//! The crate emits `tracing` events but never installs a subscriber; that is
//! left to the embedding application.
//!
//! ## File Format
//!
//! ```text
//! $
//! fs=1000000
//! $
//! 1 2;
//! -0.5 0.25;
//! ```

pub mod complex;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod results;
pub mod samples;
mod scan;

pub use complex::ComplexSample;
pub use config::FileHandlerConfig;
pub use error::{BusyResource, ErrorKind, FileHandlerError, Result};
pub use handler::{FileHandler, ReadMode, ScanTaskState, Scanning, StreamMode};
pub use results::ResultsLog;
pub use samples::{Header, SamplesFile};
