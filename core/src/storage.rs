#[allow(missing_docs)]
pub mod sqlite; // skipcq: RS-D1001

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::schedule::Schedule;
use crate::task::{TaskRecord, TaskState};

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`StoreError`] covers everything that can go wrong between the scheduler and its
/// relational store: failing to reach it, a query it rejects, or a stored value that
/// does not decode into the in-memory model. All store operations are idempotent at
/// the protocol level; whether to retry is the caller's choice
#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage backend could not be reached or a connection could not be acquired
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// The storage backend rejected or failed a query
    #[error("storage query failed: {0}")]
    Query(String),

    /// A persisted value could not be decoded into its in-memory representation
    #[error("stored value could not be decoded: {0}")]
    Serialization(String),
}

/// [`SchedulerStore`] is the narrow data-access façade the scheduler core sees of the
/// relational store. It covers four tables: ``scheduled_processes`` (the process
/// catalog), ``schedules`` (durable schedule definitions), ``tasks`` (historical task
/// rows) and ``omf_created_objects`` (owned by the north-bound export tasks; the core
/// creates it with the schema and never touches it otherwise)
///
/// # Required Method(s)
/// When one plans to implement [`SchedulerStore`], they have to supply implementations
/// for the methods:
/// - [`SchedulerStore::load_processes`] Loads the process catalog
/// - [`SchedulerStore::load_schedules`] Loads every schedule definition
/// - [`SchedulerStore::insert_task`] Records a freshly started task
/// - [`SchedulerStore::update_task_on_exit`] Finalizes a task row on child exit
/// - [`SchedulerStore::mark_orphans_interrupted`] Crash recovery for dangling rows
/// - [`SchedulerStore::insert_schedule`] Persists a new schedule
/// - [`SchedulerStore::update_schedule`] Replaces a persisted schedule
/// - [`SchedulerStore::reset_for_testing`] Wipes scheduler state and seeds test fixtures
///
/// # Write Amplification
/// One row per non-startup task (an insert at spawn and an update at exit); a
/// main-loop wake writes nothing
///
/// # Object Safety
/// [`SchedulerStore`] is object safe; the scheduler holds it as ``Arc<dyn SchedulerStore>``
///
/// # See Also
/// - [`SqliteStore`]
/// - [`Scheduler`]
#[async_trait]
pub trait SchedulerStore: Debug + Send + Sync {
    /// Loads the process catalog
    ///
    /// # Returns
    /// A mapping of process name to its command vector (argv). The catalog is owned by
    /// the store; the scheduler treats it as immutable
    async fn load_processes(&self) -> Result<HashMap<String, Vec<String>>, StoreError>;

    /// Loads every schedule definition in the ``schedules`` table
    async fn load_schedules(&self) -> Result<Vec<Schedule>, StoreError>;

    /// Records a freshly started task. The scheduler inserts the row with
    /// [`TaskState::Running`] *before* installing the completion waiter, so the waiter's
    /// later update always targets an existing row (absent external interference)
    ///
    /// # See Also
    /// - [`TaskRecord`]
    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Finalizes the task row for a reaped child
    ///
    /// # Returns
    /// The number of rows updated. Zero is not fatal: the row may have been cleaned
    /// externally, the caller logs a warning and continues
    async fn update_task_on_exit(
        &self,
        id: Uuid,
        exit_code: Option<i32>,
        end_time: DateTime<Utc>,
        state: TaskState,
    ) -> Result<u64, StoreError>;

    /// Marks every task row with no ``end_time`` as [`TaskState::Interrupted`] with
    /// ``end_time`` set to the supplied instant. Ran at startup, this recovers the
    /// rows orphaned by an earlier crash
    ///
    /// # Returns
    /// The number of rows recovered
    async fn mark_orphans_interrupted(&self, end_time: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Persists a new schedule row
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError>;

    /// Replaces the persisted row for an existing schedule
    ///
    /// # Returns
    /// The number of rows updated; zero tells the caller the row vanished and an
    /// insert should be attempted instead
    async fn update_schedule(&self, schedule: &Schedule) -> Result<u64, StoreError>;

    /// Deletes all schedule-related rows and seeds the ``sleep1`` / ``sleep10``
    /// catalog entries. Strictly a test fixture helper
    async fn reset_for_testing(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SchedulerStore + 'static> SchedulerStore for Arc<S> {
    async fn load_processes(&self) -> Result<HashMap<String, Vec<String>>, StoreError> {
        self.as_ref().load_processes().await
    }

    async fn load_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        self.as_ref().load_schedules().await
    }

    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.as_ref().insert_task(record).await
    }

    async fn update_task_on_exit(
        &self,
        id: Uuid,
        exit_code: Option<i32>,
        end_time: DateTime<Utc>,
        state: TaskState,
    ) -> Result<u64, StoreError> {
        self.as_ref().update_task_on_exit(id, exit_code, end_time, state).await
    }

    async fn mark_orphans_interrupted(&self, end_time: DateTime<Utc>) -> Result<u64, StoreError> {
        self.as_ref().mark_orphans_interrupted(end_time).await
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        self.as_ref().insert_schedule(schedule).await
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<u64, StoreError> {
        self.as_ref().update_schedule(schedule).await
    }

    async fn reset_for_testing(&self) -> Result<(), StoreError> {
        self.as_ref().reset_for_testing().await
    }
}
