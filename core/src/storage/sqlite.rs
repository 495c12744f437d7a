use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::schedule::{Schedule, ScheduleKind, ScheduleType};
use crate::storage::{SchedulerStore, StoreError};
use crate::task::{TaskRecord, TaskState};

/// [`SqliteStore`] is the [`SchedulerStore`] implementation over an embedded SQLite
/// database, the storage flavor the appliance ships with. Connecting runs the
/// embedded migrations, so a fresh database file is usable immediately
///
/// # Constructor(s)
/// - [`SqliteStore::connect`] Opens (or creates) a database from a sqlx URL
/// - [`SqliteStore::connect_with_options`] Same, with an explicit pool size
/// - [`SqliteStore::in_memory`] A private in-memory database, for tests
/// - [`SqliteStore::from_pool`] Wraps an externally managed pool (no migrations)
///
/// # See Also
/// - [`SchedulerStore`]
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the database at ``database_url`` and runs the embedded migrations
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with_options(database_url, 5).await
    }

    /// Opens the database at ``database_url`` with a pool of ``max_connections``
    /// connections and runs the embedded migrations
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// A private in-memory database. The pool is capped at a single connection so
    /// every query sees the same memory database
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect_with_options("sqlite::memory:", 1).await
    }

    /// Wraps an externally managed pool. Migrations are the owner's responsibility
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Convenience constructor returning the store pre-wrapped for sharing
    pub async fn shared(database_url: &str) -> Result<Arc<Self>, StoreError> {
        Ok(Arc::new(Self::connect(database_url).await?))
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the four tables of the scheduler schema when absent.
    /// ``omf_created_objects`` belongs to the north-bound export tasks; it is part of
    /// the appliance schema but the core never reads or writes it
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_processes (
                name TEXT PRIMARY KEY,
                script TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                schedule_name TEXT NOT NULL,
                process_name TEXT NOT NULL,
                schedule_type INTEGER NOT NULL,
                schedule_time TEXT,
                schedule_day INTEGER,
                schedule_interval INTEGER,
                exclusive INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                process_name TEXT NOT NULL,
                state INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                pid INTEGER NOT NULL,
                exit_code INTEGER,
                reason TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS omf_created_objects (
                configuration_key TEXT NOT NULL,
                type_id INTEGER NOT NULL,
                asset_code TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_end_time ON tasks(end_time)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    fn parse_schedule_row(row: &SqliteRow) -> Result<Schedule, StoreError> {
        let id_str: String = row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?;
        let id = Uuid::parse_str(&id_str).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let name: String = row
            .try_get("schedule_name")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let process_name: String = row
            .try_get("process_name")
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let schedule_type: i16 = row
            .try_get("schedule_type")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let schedule_type = ScheduleType::try_from(schedule_type)
            .map_err(|v| StoreError::Serialization(format!("unknown schedule_type {v}")))?;

        let kind = match schedule_type {
            ScheduleType::Startup => ScheduleKind::Startup,
            ScheduleType::Interval => ScheduleKind::Interval,
            ScheduleType::Manual => ScheduleKind::Manual,
            ScheduleType::Timed => {
                let time: Option<String> = row
                    .try_get("schedule_time")
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                let time = time.ok_or_else(|| {
                    StoreError::Serialization(format!(
                        "timed schedule `{name}` has no schedule_time"
                    ))
                })?;
                let time = NaiveTime::parse_from_str(&time, "%H:%M:%S")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;

                let day: Option<i16> = row
                    .try_get("schedule_day")
                    .map_err(|e| StoreError::Query(e.to_string()))?;
                ScheduleKind::Timed {
                    time,
                    day: day.map(|d| d as u8),
                }
            }
        };

        let interval: Option<i64> = row
            .try_get("schedule_interval")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let repeat = interval.map(|secs| Duration::from_secs(secs.max(0) as u64));

        let exclusive: bool = row
            .try_get("exclusive")
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(Schedule {
            id,
            name,
            process_name,
            kind,
            repeat,
            exclusive,
        })
    }

    fn timed_columns(schedule: &Schedule) -> (Option<String>, Option<i16>) {
        match schedule.kind {
            ScheduleKind::Timed { time, day } => (
                Some(time.format("%H:%M:%S").to_string()),
                day.map(|d| d as i16),
            ),
            _ => (None, None),
        }
    }
}

#[async_trait]
impl SchedulerStore for SqliteStore {
    async fn load_processes(&self) -> Result<HashMap<String, Vec<String>>, StoreError> {
        let rows = sqlx::query("SELECT name, script FROM scheduled_processes")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut processes = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name").map_err(|e| StoreError::Query(e.to_string()))?;
            let script: String = row
                .try_get("script")
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let argv: Vec<String> = serde_json::from_str(&script)
                .map_err(|e| StoreError::Serialization(format!("script of `{name}`: {e}")))?;
            processes.insert(name, argv);
        }
        Ok(processes)
    }

    async fn load_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, schedule_name, process_name, schedule_type, schedule_time, \
             schedule_day, schedule_interval, exclusive FROM schedules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter().map(Self::parse_schedule_row).collect()
    }

    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, process_name, state, start_time, end_time, pid, exit_code, reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.process_name)
        .bind(record.state as i16)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.pid)
        .bind(record.exit_code)
        .bind(&record.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn update_task_on_exit(
        &self,
        id: Uuid,
        exit_code: Option<i32>,
        end_time: DateTime<Utc>,
        state: TaskState,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE tasks SET state = ?, end_time = ?, exit_code = ? WHERE id = ?")
            .bind(state as i16)
            .bind(end_time)
            .bind(exit_code)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn mark_orphans_interrupted(&self, end_time: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE tasks SET state = ?, end_time = ? WHERE end_time IS NULL")
            .bind(TaskState::Interrupted as i16)
            .bind(end_time)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        let (time, day) = Self::timed_columns(schedule);
        sqlx::query(
            "INSERT INTO schedules (id, schedule_name, process_name, schedule_type, \
             schedule_time, schedule_day, schedule_interval, exclusive) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.name)
        .bind(&schedule.process_name)
        .bind(schedule.kind.schedule_type() as i16)
        .bind(time)
        .bind(day)
        .bind(schedule.repeat.map(|r| r.as_secs() as i64))
        .bind(schedule.exclusive)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<u64, StoreError> {
        let (time, day) = Self::timed_columns(schedule);
        let result = sqlx::query(
            "UPDATE schedules SET schedule_name = ?, process_name = ?, schedule_type = ?, \
             schedule_time = ?, schedule_day = ?, schedule_interval = ?, exclusive = ? \
             WHERE id = ?",
        )
        .bind(&schedule.name)
        .bind(&schedule.process_name)
        .bind(schedule.kind.schedule_type() as i16)
        .bind(time)
        .bind(day)
        .bind(schedule.repeat.map(|r| r.as_secs() as i64))
        .bind(schedule.exclusive)
        .bind(schedule.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn reset_for_testing(&self) -> Result<(), StoreError> {
        for table in ["tasks", "schedules", "scheduled_processes"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        for (name, script) in [("sleep1", r#"["sleep", "1"]"#), ("sleep10", r#"["sleep", "10"]"#)] {
            sqlx::query("INSERT INTO scheduled_processes (name, script) VALUES (?, ?)")
                .bind(name)
                .bind(script)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(())
    }
}
