pub(crate) mod engine;

#[allow(missing_docs)]
pub mod time_wheel; // skipcq: RS-D1001

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::clock::{SchedulerClock, SystemClock};
use crate::errors::FoghornErrors;
use crate::process::{ProcessHandle, ProcessSupervisor};
use crate::schedule::{Schedule, ScheduleKind};
use crate::scheduler::engine::{STOP_GRACE, SchedulerInner};
use crate::storage::SchedulerStore;
use crate::task::TaskHandle;
use crate::utils::system_time_to_date_time;

/// [`ScheduleExecution`] tracks the mutable runtime state of one schedule: when it fires
/// next, the tasks currently live for it, and whether a manual start has been queued.
/// Entries are keyed by schedule id in the scheduler's execution registry; they are
/// created when a schedule is first considered and dropped once the schedule has no
/// live task and no future fire
///
/// # See Also
/// - [`Schedule`]
/// - [`TaskHandle`]
#[derive(Debug, Default)]
pub struct ScheduleExecution {
    /// The next instant a task auto-starts; absent means no future auto-fire
    pub next_fire_at: Option<SystemTime>,

    /// Every live task of the schedule, keyed by task id
    pub live_tasks: HashMap<Uuid, TaskHandle>,

    /// Set by [`Scheduler::start_task`], cleared by the main loop on dispatch
    pub manual_pending: bool,
}

/// This is the builder configs to use for building a [`Scheduler`] instance.
/// By itself it should not be used, and it resides in [`Scheduler::builder`]
#[derive(TypedBuilder)]
#[builder(build_method(into = Scheduler))]
pub struct SchedulerConfig {
    /// The [`SchedulerStore`] holding the durable schedule definitions, the process
    /// catalog and the historical task rows. The store is an external collaborator,
    /// as such it has no default and must always be supplied
    ///
    /// # See Also
    /// - [`SchedulerStore`]
    /// - [`Scheduler`]
    #[builder(
        setter(transform = |store: impl SchedulerStore + 'static| Arc::new(store) as Arc<dyn SchedulerStore>),
    )]
    store: Arc<dyn SchedulerStore>,

    /// The [`SchedulerClock`] for reading wall-clock time and idling between fires.
    ///
    /// # Default Value
    /// Every scheduler uses as default value [`SystemClock`]. While for most cases this
    /// is fine, when it comes to unit testing, [`VirtualClock`](crate::clock::VirtualClock)
    /// should be preferred as it allows explicit advancing of time
    ///
    /// # See Also
    /// - [`SystemClock`]
    /// - [`SchedulerClock`]
    /// - [`Scheduler`]
    #[builder(
        default = Arc::new(SystemClock),
        setter(transform = |clock: impl SchedulerClock + 'static| Arc::new(clock) as Arc<dyn SchedulerClock>),
    )]
    clock: Arc<dyn SchedulerClock>,
}

impl From<SchedulerConfig> for Scheduler {
    fn from(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store: config.store,
                clock: config.clock,
                supervisor: ProcessSupervisor::new(),
                processes: DashMap::new(),
                schedules: DashMap::new(),
                executions: DashMap::new(),
                active_tasks: AtomicUsize::new(0),
                paused: AtomicBool::new(false),
                started_at: Mutex::new(None),
                wake: Notify::new(),
            }),
            handle: Mutex::new(None),
        }
    }
}

/// [`Scheduler`] starts and tracks *tasks*: operating-system processes launched
/// according to durable [`Schedule`] definitions held in the relational store.
/// Schedules specify when to start and restart tasks; catalog entries in
/// ``scheduled_processes`` specify the command vector to execute.
///
/// One cooperative main loop drives all registry mutations. Each iteration it:
/// 1. Scans the schedule executions in ascending id order.
/// 2. Starts every task that is due (its fire instant passed, or a manual start
///    is queued), recording non-startup tasks in the ``tasks`` table.
/// 3. Installs a completion waiter per started task that reaps the child,
///    finalizes its task row and re-arms exclusive schedules.
/// 4. Sleeps until the earliest upcoming fire; saving a schedule, queueing a
///    manual start and stopping all cancel the sleep.
///
/// # Constructor(s)
/// If one wishes to construct a [`Scheduler`], they may do so via [`Scheduler::builder`],
/// supplying at minimum the store
///
/// # Example
/// ```ignore
/// use foghorn::scheduler::Scheduler;
/// use foghorn::storage::SqliteStore;
///
/// let store = SqliteStore::connect("sqlite://foghorn.db?mode=rwc").await?;
/// let scheduler = Scheduler::builder().store(store).build();
///
/// scheduler.start().await?;
/// // ... appliance runs ...
/// scheduler.stop().await?;
/// ```
///
/// # See Also
/// - [`Schedule`]
/// - [`SchedulerStore`]
/// - [`SchedulerClock`]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("store", &self.inner.store)
            .field("clock", &self.inner.clock)
            .field("schedules", &self.inner.schedules.len())
            .field("active_tasks", &self.inner.active_tasks)
            .finish()
    }
}

impl Scheduler {
    /// Constructs a scheduler builder, which is used for supplying the store and
    /// optionally a clock to then construct a [`Scheduler`]
    ///
    /// # Returns
    /// The [`SchedulerConfigBuilder`] builder for constructing the [`Scheduler`]
    ///
    /// # See Also
    /// - [`Scheduler`]
    /// - [`SchedulerConfig`]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfig::builder()
    }

    /// Starts the scheduler.
    ///
    /// Task rows orphaned by an earlier crash are closed out first, then the process
    /// catalog and schedule definitions are loaded, every schedule is seeded with its
    /// first fire instant (anchored at the start time) and the main loop is launched.
    /// When this method returns the loop is running; this type never spawns threads
    /// of its own, tasks run as child processes
    ///
    /// # Returns
    /// [`FoghornErrors::AlreadyStarted`] when the scheduler is already running, a
    /// [`FoghornErrors::Store`] when the initial load fails (the scheduler is then
    /// left stopped)
    ///
    /// # See Also
    /// - [`Scheduler::stop`]
    pub async fn start(&self) -> Result<(), FoghornErrors> {
        let start_time = self.inner.clock.now().await;
        {
            let mut started_at = self.inner.started_at.lock().await;
            if started_at.is_some() {
                return Err(FoghornErrors::AlreadyStarted);
            }
            *started_at = Some(start_time);
        }
        self.inner.paused.store(false, Ordering::SeqCst);
        info!("Starting");

        if let Err(err) = self.load_initial_state(start_time).await {
            *self.inner.started_at.lock().await = None;
            return Err(err);
        }

        *self.handle.lock().await = Some(tokio::spawn(self.inner.clone().main_loop()));
        Ok(())
    }

    async fn load_initial_state(&self, start_time: SystemTime) -> Result<(), FoghornErrors> {
        // A restart reloads everything from the store
        self.inner.processes.clear();
        self.inner.schedules.clear();
        self.inner.executions.clear();

        let recovered = self
            .inner
            .store
            .mark_orphans_interrupted(DateTime::<Utc>::from(start_time))
            .await?;
        if recovered > 0 {
            warn!("Marked {} orphaned task row(s) as interrupted", recovered);
        }

        for (name, argv) in self.inner.store.load_processes().await? {
            self.inner.processes.insert(name, argv);
        }

        for schedule in self.inner.store.load_schedules().await? {
            let next_fire_at = time_wheel::first_fire(&schedule, start_time, start_time);
            if let Some(at) = next_fire_at {
                info!("Scheduled '{}' for {}", schedule.name, system_time_to_date_time(at));
            }
            self.inner.executions.insert(
                schedule.id,
                ScheduleExecution {
                    next_fire_at,
                    ..Default::default()
                },
            );
            self.inner.schedules.insert(schedule.id, schedule);
        }
        Ok(())
    }

    /// Attempts to stop the scheduler.
    ///
    /// Prevents any new task from starting, cancels the main-loop sleep and delivers
    /// the graceful-termination signal to every live task (best effort, a task that
    /// is already gone is not an error). Children get a short grace period to quit;
    /// tasks are never awaited here
    ///
    /// # Returns
    /// [`FoghornErrors::StopTimeout`] when tasks are still live after the grace
    /// period; the caller waits and tries again. On success the start time is
    /// cleared and the live-task count is zero
    ///
    /// # See Also
    /// - [`Scheduler::start`]
    pub async fn stop(&self) -> Result<(), FoghornErrors> {
        info!("Stop requested");
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();

        // Snapshot both levels, the maps can change mid-iteration
        let schedule_ids: Vec<Uuid> = self.inner.executions.iter().map(|entry| *entry.key()).collect();
        for schedule_id in schedule_ids {
            let live: Vec<(Uuid, u32, Arc<ProcessHandle>)> = match self.inner.executions.get(&schedule_id) {
                Some(execution) => execution
                    .live_tasks
                    .values()
                    .map(|task| (task.id, task.pid, task.process.clone()))
                    .collect(),
                None => continue,
            };
            let name = self
                .inner
                .schedules
                .get(&schedule_id)
                .map(|schedule| schedule.value().name.clone())
                .unwrap_or_else(|| schedule_id.to_string());
            for (task_id, pid, process) in live {
                info!("Terminating: schedule '{}' task {} pid {}", name, task_id, pid);
                process.terminate();
            }
        }

        // A zero-length sleep gives the children no time to quit
        tokio::time::sleep(STOP_GRACE).await;

        let live = self.inner.active_tasks.load(Ordering::SeqCst);
        if live > 0 {
            return Err(FoghornErrors::StopTimeout(live));
        }

        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        *self.inner.started_at.lock().await = None;
        info!("Stopped");
        Ok(())
    }

    /// Creates or updates a schedule.
    ///
    /// The definition is validated, persisted (an update whose row vanished falls
    /// back to an insert, which tolerates racing deletions) and the in-memory record
    /// is replaced wholesale. When the save introduces a new auto-firing schedule or
    /// changes a timing-relevant field (`repeat`, time of day, day, `exclusive`), the
    /// next fire instant is recomputed and the main loop re-evaluates immediately.
    /// Startup and manual schedules are never re-seeded by a save: the former fire
    /// at boot only and the latter not at all
    ///
    /// # Returns
    /// A validation error ([`FoghornErrors::IntervalRequiresRepeat`] /
    /// [`FoghornErrors::InvalidWeekday`]) or a [`FoghornErrors::Store`] failure
    ///
    /// # See Also
    /// - [`Schedule`]
    /// - [`Scheduler::start_task`]
    pub async fn save_schedule(&self, schedule: Schedule) -> Result<(), FoghornErrors> {
        schedule.validate()?;

        let previous = self.inner.schedules.get(&schedule.id).map(|s| s.value().clone());
        match &previous {
            None => self.inner.store.insert_schedule(&schedule).await?,
            Some(_) => {
                // A zero-row update means the row vanished underneath us
                if self.inner.store.update_schedule(&schedule).await? == 0 {
                    self.inner.store.insert_schedule(&schedule).await?;
                }
            }
        }

        self.inner.schedules.insert(schedule.id, schedule.clone());

        let auto_firing = matches!(
            schedule.kind,
            ScheduleKind::Interval | ScheduleKind::Timed { .. }
        );
        let timing_changed = previous
            .map(|prev| !prev.timing_eq(&schedule))
            .unwrap_or(true);
        if auto_firing && timing_changed {
            let anchor = *self.inner.started_at.lock().await;
            if let Some(anchor) = anchor {
                let now = self.inner.clock.now().await;
                let next_fire_at = time_wheel::first_fire(&schedule, anchor, now);
                let mut execution = self.inner.executions.entry(schedule.id).or_default();
                execution.next_fire_at = next_fire_at;
                drop(execution);
                if let Some(at) = next_fire_at {
                    info!("Scheduled '{}' for {}", schedule.name, system_time_to_date_time(at));
                }
                self.inner.wake.notify_one();
            }
        }
        Ok(())
    }

    /// Queues a task of the given schedule to start on the next loop wake
    /// (which this method triggers), regardless of the schedule's own timing
    ///
    /// # Returns
    /// - [`FoghornErrors::Paused`] while the scheduler is stopping or stopped
    /// - [`FoghornErrors::ScheduleNotFound`] for an unknown id
    /// - [`FoghornErrors::TaskQueued`] when a manual start is already pending
    /// - [`FoghornErrors::TaskRunning`] when the schedule is exclusive and a task
    ///   is live (even one about to finish)
    ///
    /// # See Also
    /// - [`Scheduler::save_schedule`]
    pub async fn start_task(&self, schedule_id: Uuid) -> Result<(), FoghornErrors> {
        if self.inner.is_paused() {
            return Err(FoghornErrors::Paused);
        }

        let schedule = self
            .inner
            .schedules
            .get(&schedule_id)
            .map(|s| s.value().clone())
            .ok_or(FoghornErrors::ScheduleNotFound(schedule_id))?;

        {
            let mut execution = self.inner.executions.entry(schedule_id).or_default();
            if execution.manual_pending {
                return Err(FoghornErrors::TaskQueued(schedule_id));
            }
            if schedule.exclusive && !execution.live_tasks.is_empty() {
                return Err(FoghornErrors::TaskRunning(schedule_id));
            }
            execution.manual_pending = true;
        }

        info!("Queued schedule '{}' for execution", schedule.name);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Checks if the [`Scheduler`] has started
    ///
    /// # Returns
    /// The boolean value indicating if the scheduler has started or not
    ///
    /// # See Also
    /// - [`Scheduler::start`]
    /// - [`Scheduler::stop`]
    pub async fn has_started(&self) -> bool {
        self.inner.started_at.lock().await.is_some()
    }

    /// The next instant a task of the given schedule auto-starts, if any.
    /// Mostly useful for introspection and tests
    pub fn next_fire_at(&self, schedule_id: Uuid) -> Option<SystemTime> {
        self.inner
            .executions
            .get(&schedule_id)
            .and_then(|execution| execution.next_fire_at)
    }

    /// The number of tasks currently live across all schedules
    pub fn live_task_count(&self) -> usize {
        self.inner.active_tasks.load(Ordering::SeqCst)
    }
}
