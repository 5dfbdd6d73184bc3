//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use usrp_io::samples::format;
use usrp_io::{ComplexSample, FileHandler, FileHandlerConfig, Header, StreamMode};

/// Handler over `dir` with a fast poll loop.
pub fn handler(dir: &Path, mode: StreamMode, delete_consumed: bool) -> FileHandler {
    let config = FileHandlerConfig {
        poll_interval_ms: 5,
        delete_consumed: Some(delete_consumed),
        ..FileHandlerConfig::new(dir, mode)
    };
    FileHandler::from_config(&config).expect("Failed to create handler")
}

/// Place a samples file in `dir` with its modification time `age` in the past.
///
/// The file is written under a name outside the scan glob and renamed into
/// place, so a running scan never sees it half written.
pub fn drop_file(dir: &Path, name: &str, age: Duration, samples: &[ComplexSample]) {
    let staging = dir.join(format!("{name}.part"));
    let header: Header = [("source", name)].into_iter().collect();
    format::write_path(&staging, &header, samples).expect("Failed to write samples");
    File::options()
        .write(true)
        .open(&staging)
        .and_then(|f| f.set_modified(SystemTime::now() - age))
        .expect("Failed to set modification time");
    fs::rename(&staging, dir.join(name)).expect("Failed to move samples file into place");
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Names of every file read so far, in ingestion order.
pub fn ingested_names(handler: &FileHandler) -> Vec<String> {
    handler
        .results()
        .snapshot()
        .iter()
        .map(|f| f.file_name.clone())
        .collect()
}
