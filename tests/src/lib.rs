//! Shared fixtures for the end-to-end scheduler tests: an on-disk SQLite store
//! in a temporary directory, catalog seeding and a stop helper that retries
//! through the termination grace period.

use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use foghorn::scheduler::Scheduler;
use foghorn::storage::SqliteStore;

/// Opens a fresh store backed by a database file inside `dir`
pub async fn store_in(dir: &TempDir) -> Arc<SqliteStore> {
    let path = dir.path().join("foghorn.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    Arc::new(SqliteStore::connect(&url).await.expect("open sqlite store"))
}

/// Builds a scheduler over a shared store so the test can keep querying it
pub fn scheduler_over(store: Arc<SqliteStore>) -> Scheduler {
    Scheduler::builder().store(store).build()
}

/// Seeds one process catalog entry
pub async fn seed_process(store: &SqliteStore, name: &str, argv: &[&str]) {
    sqlx::query("INSERT INTO scheduled_processes (name, script) VALUES (?, ?)")
        .bind(name)
        .bind(serde_json::to_string(argv).expect("encode argv"))
        .execute(store.pool())
        .await
        .expect("seed process");
}

/// Every task row as `(state, exit_code)`, oldest first
pub async fn task_states(store: &SqliteStore) -> Vec<(i16, Option<i32>)> {
    sqlx::query("SELECT state, exit_code FROM tasks ORDER BY start_time, id")
        .fetch_all(store.pool())
        .await
        .expect("query tasks")
        .iter()
        .map(|row| (row.get("state"), row.get("exit_code")))
        .collect()
}

/// Stops the scheduler, retrying while children drain out of the grace period
pub async fn stop_with_retry(scheduler: &Scheduler) {
    for _ in 0..20 {
        if scheduler.stop().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("scheduler did not stop within the retry budget");
}

/// Installs the fmt subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
