#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::watch;

use readalong::SyncSnapshot;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wait until a published snapshot matches, failing the test after two seconds
pub async fn wait_for_snapshot(
    rx: &mut watch::Receiver<SyncSnapshot>,
    predicate: impl FnMut(&SyncSnapshot) -> bool,
) -> SyncSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for sync snapshot")
        .expect("sync service stopped")
        .clone()
}
