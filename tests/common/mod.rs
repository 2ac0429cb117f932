//! Shared setup for integration tests: each test gets its own queue database
//! in a temp directory, exercising the same connect-and-migrate path real
//! processes use.

use queuectl::SqliteJobQueue;
use std::sync::Arc;
use tempfile::TempDir;

pub async fn setup_queue() -> (Arc<SqliteJobQueue>, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let queue = SqliteJobQueue::connect(dir.path().join("queue.db"))
        .await
        .expect("open queue database");
    (Arc::new(queue), dir)
}
