//! Tests for `src/logging.rs`.

use dapi::logging::{LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn log_file_prefix_names_the_crate() {
    assert!(LOG_FILE_PREFIX.starts_with("dapi"));
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber can be installed per process, so the
    // result may be an error; the directory is created either way.
    let _result = dapi::logging::init_production(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_tolerates_repeated_calls() {
    dapi::logging::init_cli();
    dapi::logging::init_cli();
    assert!(tracing::dispatcher::has_been_set());
}
