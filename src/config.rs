//! Handler configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `USRP_IO_`
//!
//! # Example
//! ```no_run
//! use usrp_io::config::FileHandlerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FileHandlerConfig::load_from("config/usrp_io.toml")?;
//! config.validate()?;
//! println!("Samples directory: {}", config.resolved_directory().display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{FileHandlerError, Result};
use crate::handler::StreamMode;

/// Directory used when no samples directory is configured.
pub const DEFAULT_DIRECTORY: &str = "Temp";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "USRP_IO_";

/// File handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHandlerConfig {
    /// Samples directory; empty means [`DEFAULT_DIRECTORY`] under the working directory
    #[serde(default)]
    pub directory: PathBuf,
    /// Initial stream mode
    #[serde(default)]
    pub mode: StreamMode,
    /// Glob selecting candidate files during scans
    #[serde(default = "default_scan_glob")]
    pub scan_glob: String,
    /// Sleep between directory polls when nothing is queued
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long `start_scan` waits for the worker to report in
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
    /// Delete files once consumed (unset = only in release builds)
    #[serde(default)]
    pub delete_consumed: Option<bool>,
    /// Buffered notifications per results subscriber
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
}

// Default value functions
fn default_scan_glob() -> String {
    "*.txt".to_string()
}

fn default_poll_interval() -> u64 {
    50
}

fn default_startup_timeout() -> u64 {
    1000
}

fn default_notify_capacity() -> usize {
    64
}

impl Default for FileHandlerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            mode: StreamMode::default(),
            scan_glob: default_scan_glob(),
            poll_interval_ms: default_poll_interval(),
            startup_timeout_ms: default_startup_timeout(),
            delete_consumed: None,
            notify_capacity: default_notify_capacity(),
        }
    }
}

impl FileHandlerConfig {
    /// Config for `directory` and `mode` with every other setting defaulted.
    pub fn new(directory: impl Into<PathBuf>, mode: StreamMode) -> Self {
        Self {
            directory: directory.into(),
            mode,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file and `USRP_IO_` environment variables
    ///
    /// A missing file is not an error; defaults and environment still apply.
    /// Example override: `USRP_IO_POLL_INTERVAL_MS=10`
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        if self.scan_glob.is_empty() || self.scan_glob.contains(['/', '\\']) {
            return Err(FileHandlerError::Config(format!(
                "Invalid scan_glob '{}'. Must be a non-empty file name pattern",
                self.scan_glob
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(FileHandlerError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.notify_capacity == 0 {
            return Err(FileHandlerError::Config(
                "notify_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Samples directory with the empty-path default applied
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        if self.directory.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_DIRECTORY)
        } else {
            self.directory.clone()
        }
    }

    /// Whether consumed files are deleted by the scan loop
    #[must_use]
    pub fn deletes_consumed(&self) -> bool {
        self.delete_consumed.unwrap_or(!cfg!(debug_assertions))
    }

    /// Poll interval as a [`Duration`]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Worker startup timeout as a [`Duration`]
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}
