use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

use crate::process::ProcessHandle;

#[allow(unused_imports)]
use crate::schedule::Schedule;

/// Wire-level discriminant persisted in the ``tasks.state`` column.
/// The integer values are part of the storage contract and must not change
///
/// # Variants
/// - [`TaskState::Running`] the child process is live
/// - [`TaskState::Complete`] the child process exited and was reaped
/// - [`TaskState::Canceled`] the task was canceled by an operator
/// - [`TaskState::Interrupted`] the scheduler died while the task was running; set
///   during crash recovery on the next start
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running = 1,
    Complete = 2,
    Canceled = 3,
    Interrupted = 4,
}

impl TryFrom<i16> for TaskState {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskState::Running),
            2 => Ok(TaskState::Complete),
            3 => Ok(TaskState::Canceled),
            4 => Ok(TaskState::Interrupted),
            other => Err(other),
        }
    }
}

/// [`TaskRecord`] is one row of the ``tasks`` table: a single invocation of a catalog
/// process under a schedule. Startup tasks are intentionally never recorded, they are
/// infrastructure rather than jobs
///
/// # See Also
/// - [`TaskState`]
/// - [`Schedule`]
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub process_name: String,
    pub state: TaskState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

/// [`TaskHandle`] tracks one live child process from spawn to reap. It lives inside the
/// owning schedule's execution entry; the supervisor handle is shared with the completion
/// waiter that reaps the child
///
/// # See Also
/// - [`ProcessHandle`]
#[derive(Debug)]
pub struct TaskHandle {
    pub id: Uuid,
    pub pid: u32,
    pub process: Arc<ProcessHandle>,
    pub started_at: SystemTime,
}
