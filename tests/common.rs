use std::path::PathBuf;

use lowkeydb::{DbConfig, Database};
use tempfile::TempDir;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a database inside a fresh temp directory and hands back the
/// directory alongside it so the caller can reopen the same files later
/// (the `TempDir` must stay alive for the duration of the test, or the
/// directory is deleted out from under the open file handles).
pub fn fresh_db() -> (TempDir, Database) {
    init_log();
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let db = Database::create(&path, DbConfig::default()).unwrap();
    (dir, db)
}

pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("lowkey.db")
}
