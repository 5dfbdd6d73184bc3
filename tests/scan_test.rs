//! Integration tests for the background directory scan.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{drop_file, handler, ingested_names, wait_until};
use usrp_io::{
    ComplexSample, ErrorKind, FileHandler, FileHandlerError, ReadMode, ScanTaskState, Scanning,
    StreamMode,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn sample() -> [ComplexSample; 1] {
    [ComplexSample::new(1.0, -1.0)]
}

fn scanning(dir: &std::path::Path, pattern: &str, delete_consumed: bool) -> FileHandler {
    let handler = handler(dir, StreamMode::Read, delete_consumed);
    handler
        .change_read_mode_with(ReadMode::Scan, Scanning::Start, pattern)
        .expect("failed to start scan");
    handler
}

#[test]
fn test_reads_oldest_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    drop_file(dir.path(), "b.txt", Duration::from_secs(20), &sample());
    drop_file(dir.path(), "c.txt", Duration::from_secs(30), &sample());
    drop_file(dir.path(), "a.txt", Duration::from_secs(10), &sample());

    let handler = scanning(dir.path(), ".*", false);
    assert_eq!(handler.scan_state(), ScanTaskState::Running);
    assert!(handler.is_reader_busy());
    assert_eq!(handler.file_pattern().as_deref(), Some(".*"));

    assert!(wait_until(TIMEOUT, || handler.results().len() == 3));
    assert_eq!(ingested_names(&handler), ["c.txt", "b.txt", "a.txt"]);

    handler.stop_scan().expect("stop failed");
}

#[test]
fn test_pattern_filters_and_files_are_read_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    drop_file(dir.path(), "RX_1.txt", Duration::from_secs(20), &sample());
    drop_file(dir.path(), "noise.txt", Duration::from_secs(15), &sample());
    drop_file(dir.path(), "RX_2.log", Duration::from_secs(10), &sample());

    let handler = scanning(dir.path(), r"^RX_\d+\.txt$", false);
    assert!(wait_until(TIMEOUT, || handler.results().len() == 1));

    // Files stay on disk, but the watermark keeps them from being re-read
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(ingested_names(&handler), ["RX_1.txt"]);
    assert!(dir.path().join("noise.txt").exists());

    drop_file(dir.path(), "RX_3.txt", Duration::ZERO, &sample());
    assert!(wait_until(TIMEOUT, || handler.results().len() == 2));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(ingested_names(&handler), ["RX_1.txt", "RX_3.txt"]);

    let watermark = handler.last_modification().expect("watermark not published");
    assert!(watermark > chrono::Utc::now() - chrono::Duration::seconds(5));

    handler.stop_scan().expect("stop failed");
}

#[test]
fn test_consumed_files_are_deleted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = handler(dir.path(), StreamMode::Write, true);
    writer
        .write_file(
            &usrp_io::SamplesFile::new("a.txt")
                .with_header("fs", "1000000")
                .with_samples([ComplexSample::new(1.0, 2.0), ComplexSample::new(-0.5, 0.25)]),
        )
        .expect("write failed");
    drop_file(dir.path(), "skip.txt", Duration::from_secs(5), &sample());

    writer
        .change_mode(StreamMode::Read, None)
        .expect("mode change failed");
    writer
        .change_read_mode_with(ReadMode::Scan, Scanning::Start, r"^a\.txt$")
        .expect("failed to start scan");

    assert!(wait_until(TIMEOUT, || {
        !dir.path().join("a.txt").exists() && !dir.path().join("skip.txt").exists()
    }));
    let files = writer.results().snapshot();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].header.get("fs"), Some("1000000"));
    assert_eq!(
        files[0].samples,
        vec![ComplexSample::new(1.0, 2.0), ComplexSample::new(-0.5, 0.25)]
    );

    writer.stop_scan().expect("stop failed");
}

#[test]
fn test_stop_and_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = scanning(dir.path(), ".*", false);

    let err = handler.start_scan(".*").unwrap_err();
    assert!(matches!(
        err,
        FileHandlerError::TaskState {
            state: ScanTaskState::Running,
            ..
        }
    ));

    let started = Instant::now();
    handler.stop_scan().expect("stop failed");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!handler.is_reader_busy());
    assert_eq!(handler.scan_state(), ScanTaskState::Created);
    assert_eq!(handler.read_mode(), ReadMode::Scan);

    assert_eq!(handler.stop_scan().unwrap_err().kind(), ErrorKind::TaskState);

    handler.start_scan(".*").expect("restart failed");
    drop_file(dir.path(), "late.txt", Duration::ZERO, &sample());
    assert!(wait_until(TIMEOUT, || handler.results().len() == 1));
    handler.stop_scan().expect("stop failed");
}

#[test]
fn test_leaving_scan_mode_stops_worker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = scanning(dir.path(), ".*", false);

    handler
        .change_read_mode(ReadMode::OnDemand)
        .expect("handoff failed");
    assert_eq!(handler.read_mode(), ReadMode::OnDemand);
    assert_eq!(handler.scan_state(), ScanTaskState::Created);
    assert!(!handler.is_reader_busy());

    handler
        .change_read_mode_with(ReadMode::Scan, Scanning::Start, ".*")
        .expect("restart failed");
    handler
        .change_mode(StreamMode::Write, None)
        .expect("mode change failed");
    assert_eq!(handler.mode(), StreamMode::Write);
    assert_eq!(handler.scan_state(), ScanTaskState::Created);
    assert!(!handler.is_reader_busy());
}

#[test]
fn test_busy_reader_rejects_other_read_mode_changes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = scanning(dir.path(), ".*", false);

    assert!(handler.change_read_mode(ReadMode::Scan).unwrap_err().is_busy());
    assert!(handler
        .change_read_mode_with(ReadMode::Scan, Scanning::Start, ".*")
        .unwrap_err()
        .is_busy());

    handler.stop_scan().expect("stop failed");
}

#[test]
fn test_invalid_file_faults_worker() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, b'\n']).expect("write failed");

    let handler = scanning(dir.path(), ".*", false);
    assert!(wait_until(TIMEOUT, || {
        handler.scan_state() == ScanTaskState::Faulted
    }));

    // The worker slot is stuck until the fault is reaped
    assert!(handler.is_reader_busy());
    let err = handler.start_scan(".*").unwrap_err();
    assert!(matches!(
        err,
        FileHandlerError::TaskState {
            state: ScanTaskState::Faulted,
            ..
        }
    ));
    assert!(handler.stop_scan().unwrap_err().is_task_state());

    let fault = handler.take_scan_fault().expect("no fault recorded");
    assert_eq!(fault.kind(), ErrorKind::Io);
    assert!(handler.take_scan_fault().is_none());
    assert!(!handler.is_reader_busy());
    assert_eq!(handler.scan_state(), ScanTaskState::Created);

    std::fs::remove_file(dir.path().join("bad.txt")).expect("remove failed");
    handler.start_scan(".*").expect("restart failed");
    handler.stop_scan().expect("stop failed");
}

#[test]
fn test_handoff_reaps_faulted_worker() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("bad.txt"), [0xc3, 0x28]).expect("write failed");

    let handler = scanning(dir.path(), ".*", false);
    assert!(wait_until(TIMEOUT, || {
        handler.scan_state() == ScanTaskState::Faulted
    }));

    handler
        .change_read_mode(ReadMode::OnDemand)
        .expect("handoff failed");
    assert_eq!(handler.read_mode(), ReadMode::OnDemand);
    assert_eq!(handler.scan_state(), ScanTaskState::Created);
    assert!(!handler.is_reader_busy());
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = handler(dir.path(), StreamMode::Read, false);

    let err = handler
        .change_read_mode_with(ReadMode::Scan, Scanning::Start, "(")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pattern);
    assert_eq!(handler.read_mode(), ReadMode::Scan);
    assert!(!handler.is_reader_busy());
    assert_eq!(handler.scan_state(), ScanTaskState::Created);
}

#[tokio::test]
async fn test_subscribers_are_notified() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = scanning(dir.path(), ".*", false);
    let mut rx = handler.results().subscribe();

    drop_file(dir.path(), "live.txt", Duration::ZERO, &sample());
    let file = tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("no notification")
        .expect("channel closed");
    assert_eq!(file.file_name, "live.txt");
    assert_eq!(file.samples, sample());

    handler.stop_scan().expect("stop failed");
}

#[test]
fn test_read_mode_toggling_races_start_scan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let handler = handler(dir.path(), StreamMode::Read, false);
    let done = Arc::new(AtomicBool::new(false));

    let toggler = {
        let handler = handler.clone();
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let _ = handler.change_read_mode(ReadMode::Scan);
                let _ = handler.change_read_mode(ReadMode::OnDemand);
            }
        })
    };

    for i in 0..300 {
        let _ = handler.start_scan(".*");
        if i % 3 == 0 {
            let _ = handler.stop_scan();
        }
        // A running worker always sits under Scan read mode
        let snapshot = format!("{handler:?}");
        assert!(
            !(snapshot.contains("read_mode: OnDemand") && snapshot.contains("scan_state: Running")),
            "inconsistent handler: {snapshot}"
        );
    }
    done.store(true, Ordering::SeqCst);
    toggler.join().expect("toggler panicked");

    // Whatever state the race left, the handler can always be wound down
    handler
        .change_read_mode(ReadMode::OnDemand)
        .expect("handler stuck in a busy state");
    assert!(!handler.is_reader_busy());
    assert_eq!(handler.scan_state(), ScanTaskState::Created);
    handler
        .change_mode(StreamMode::Write, None)
        .expect("mode change failed");
}

#[test]
fn test_rewritten_file_below_watermark_is_not_reread() {
    let dir = tempfile::tempdir().expect("tempdir");
    drop_file(dir.path(), "RX_1.txt", Duration::from_secs(20), &sample());
    drop_file(dir.path(), "RX_2.txt", Duration::from_secs(10), &sample());

    let handler = scanning(dir.path(), ".*", false);
    assert!(wait_until(TIMEOUT, || handler.results().len() == 2));

    // New content, but an mtime older than the newest file already seen
    drop_file(
        dir.path(),
        "RX_1.txt",
        Duration::from_secs(15),
        &[ComplexSample::new(9.0, 9.0), ComplexSample::new(8.0, 8.0)],
    );
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(ingested_names(&handler), ["RX_1.txt", "RX_2.txt"]);
    assert!(handler
        .results()
        .snapshot()
        .iter()
        .all(|f| f.samples.len() == 1));

    handler.stop_scan().expect("stop failed");
}
