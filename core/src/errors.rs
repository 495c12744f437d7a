use std::fmt::Debug;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StoreError;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

#[allow(unused_imports)]
use crate::process::ProcessSupervisor;

/// [`FoghornErrors`] is the main enum that contains all the errors which can be surfaced by
/// the scheduler core, it uses under the hood [`thiserror`] to make it as smooth sailing to
/// add more errors in the future as possible. Lifecycle errors (paused, already started,
/// task queued/running, stop timeout) are expected states a caller branches on; the rest
/// indicate a bad schedule definition, a process that would not spawn or a storage failure
#[derive(Error, Debug)]
pub enum FoghornErrors {
    /// This error is meant to happen when [`Scheduler::start`] is invoked
    /// while the scheduler is already running
    #[error("The scheduler is already running")]
    AlreadyStarted,

    /// This error is meant to happen when a task is asked to start while the
    /// scheduler is paused (pausing happens during [`Scheduler::stop`])
    #[error("The scheduler is paused, no new task may start")]
    Paused,

    /// This error is meant to happen when [`Scheduler::stop`] still observes live
    /// tasks after the termination grace period. The caller is expected to retry
    #[error("`{0}` task(s) were still live after the termination grace period")]
    StopTimeout(usize),

    /// This error is meant to happen when an operation references a schedule id
    /// that is not present in the schedule registry
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    /// This error is meant to happen when a task is manually started for an
    /// exclusive schedule that already has a live task
    #[error(
        "Unable to start a task because schedule `{0}` is marked exclusive \
        and a task is already running for it"
    )]
    TaskRunning(Uuid),

    /// This error is meant to happen when a task is manually started for a
    /// schedule that already has a manual start queued
    #[error("A task has already been queued for execution on schedule `{0}`")]
    TaskQueued(Uuid),

    /// This error is meant to happen when an interval schedule is saved
    /// without a repeat interval
    #[error("Interval schedule `{0}` requires a repeat interval")]
    IntervalRequiresRepeat(String),

    /// This error is meant to happen when a timed schedule carries a day
    /// outside of 1 (Monday) to 7 (Sunday)
    #[error("Timed schedule `{0}` has day `{1}`, outside of 1 (Monday) to 7 (Sunday)")]
    InvalidWeekday(String, u8),

    /// This error is meant to happen when a process catalog entry holds an
    /// empty command vector, there is nothing to execute
    #[error("Process `{0}` has an empty command vector")]
    EmptyCommand(String),

    /// This error is meant to happen when a schedule references a process name
    /// with no entry in the process catalog
    #[error("No catalog entry exists for process `{0}`")]
    UnknownProcess(String),

    /// This error originates in [`ProcessSupervisor`] when the operating system
    /// refuses to spawn the child process; it carries the offending command vector
    #[error("Unable to spawn `{argv:?}` for process `{process_name}`")]
    Spawn {
        process_name: String,
        argv: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    /// A storage failure bubbling up from the store gateway
    #[error(transparent)]
    Store(#[from] StoreError),
}
