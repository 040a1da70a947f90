//! Shared helpers for integration tests.
#![allow(dead_code)]

pub use sidflow_common::test_utils::{
    MockBackend, expected_samples, mock_tune, mock_tune_with_length,
};
use std::path::PathBuf;

/// Install a test logger (safe to call from every test).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write a mock tune into `dir` and return its path.
pub fn write_tune(dir: &tempfile::TempDir, songs: u8, length_tenths: u16) -> PathBuf {
    let path = dir.path().join("tune.sid");
    std::fs::write(&path, mock_tune_with_length(songs, length_tenths)).expect("write tune");
    path
}
