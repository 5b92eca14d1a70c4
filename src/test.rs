// src/test.rs

//! Shared test helpers, in the spirit of the upstream `monitoring-rs::test` module this
//! crate grew from.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};

use tempfile::TempDir;

/// A convenient alias to use `?` in tests.
pub type Result = std::result::Result<(), Box<dyn std::error::Error>>;

fn cwd_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// A temporary directory set as the process's current directory for the lifetime of
/// the returned guard, for tests that rely on `remember_curdir` or plain relative
/// paths.
///
/// The process current directory is global state, so constructing this takes a
/// process-wide lock for the guard's lifetime - tests using it cannot run
/// concurrently with each other, only with tests that don't.
///
/// # Panics
///
/// Panics if the current directory cannot be read or changed - acceptable in test
/// code, where such a failure means the test environment itself is broken.
pub struct TempCwd {
    _dir: TempDir,
    _lock: MutexGuard<'static, ()>,
    original: PathBuf,
}

impl TempCwd {
    #[must_use]
    pub fn new() -> Self {
        let lock = cwd_lock().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dir = tempfile::tempdir().expect("create temp dir");
        let original = std::env::current_dir().expect("read current dir");
        std::env::set_current_dir(dir.path()).expect("change to temp dir");
        TempCwd {
            _dir: dir,
            _lock: lock,
            original,
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        std::env::current_dir().expect("read current dir")
    }
}

impl Drop for TempCwd {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

/// Create an empty file at `path`, relative to the current directory.
pub fn touch(path: &str) {
    fs::write(path, b"").expect("create test file");
}
