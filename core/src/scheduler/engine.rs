use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::SchedulerClock;
use crate::errors::FoghornErrors;
use crate::process::ProcessSupervisor;
use crate::schedule::{Schedule, ScheduleKind};
use crate::scheduler::ScheduleExecution;
use crate::scheduler::time_wheel;
use crate::storage::SchedulerStore;
use crate::task::{TaskHandle, TaskRecord, TaskState};
use crate::utils::system_time_to_date_time;

/// When there is nothing to do, sleep for this long (effectively forever)
const MAX_SLEEP: Duration = Duration::from_secs(9_999_999);

/// How long `stop` lets children react to the termination signal
pub(crate) const STOP_GRACE: Duration = Duration::from_millis(100);

/// The shared state behind a `Scheduler`: the injected collaborators plus the two
/// id-keyed registries. Cross-references between schedules, executions and tasks are
/// ids, never pointers, so removal is always an id-keyed operation.
///
/// All registry mutation happens either on the main loop or inside a completion
/// waiter; both confine their suspension points to store I/O, process waits and the
/// loop sleep, and never suspend while holding a registry entry.
pub(crate) struct SchedulerInner {
    pub(crate) store: Arc<dyn SchedulerStore>,
    pub(crate) clock: Arc<dyn SchedulerClock>,
    pub(crate) supervisor: ProcessSupervisor,
    pub(crate) processes: DashMap<String, Vec<String>>,
    pub(crate) schedules: DashMap<Uuid, Schedule>,
    pub(crate) executions: DashMap<Uuid, ScheduleExecution>,
    pub(crate) active_tasks: AtomicUsize,
    pub(crate) paused: AtomicBool,
    pub(crate) started_at: Mutex<Option<SystemTime>>,
    pub(crate) wake: Notify,
}

enum Decision {
    Skip,
    Track(SystemTime),
    Dispatch(Option<SystemTime>),
}

impl SchedulerInner {
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Endlessly evaluates the schedules and sleeps until the earliest upcoming fire.
    /// The sleep is cancelable: `save_schedule`, `start_task`, `stop` and exclusive
    /// re-arms nudge the wake notifier to force a re-evaluation
    pub(crate) async fn main_loop(self: Arc<Self>) {
        loop {
            let earliest = self.clone().check_schedules().await;
            if self.is_paused() {
                debug!("Main loop exiting, scheduler paused");
                break;
            }

            let now = self.clock.now().await;
            let wake_at = earliest.unwrap_or(now + MAX_SLEEP);
            if let Ok(sleep) = wake_at.duration_since(now) {
                debug!("Sleeping for {:?}", sleep);
            }

            tokio::select! {
                _ = self.clock.idle_to(wake_at) => {}
                _ = self.wake.notified() => {
                    debug!("Main loop awakened");
                }
            }
        }
    }

    /// Starts tasks according to schedules based on the current time
    ///
    /// # Returns
    /// The earliest upcoming fire instant across all executions, or ``None`` when
    /// nothing is scheduled (or the scheduler paused mid-scan)
    async fn check_schedules(self: Arc<Self>) -> Option<SystemTime> {
        let mut earliest: Option<SystemTime> = None;

        // Snapshot the key set, the map can change mid-iteration. Sorting makes
        // schedules firing at the same instant dispatch in ascending id order.
        let mut keys: Vec<Uuid> = self.executions.iter().map(|entry| *entry.key()).collect();
        keys.sort_unstable();

        for key in keys {
            if self.is_paused() {
                return None;
            }

            // Tolerate a schedule deleted mid-iteration
            let Some(schedule) = self.schedules.get(&key).map(|s| s.value().clone()) else {
                continue;
            };

            let now = self.clock.now().await;

            // Everything under the entry runs without suspending; the fire is
            // advanced before the spawn so a slow spawn cannot steal the next slot
            let decision = {
                let Some(mut execution) = self.executions.get_mut(&key) else {
                    continue;
                };
                if schedule.exclusive && !execution.live_tasks.is_empty() {
                    // Its next fire is irrelevant until completion re-arms it
                    Decision::Skip
                } else {
                    let next = execution.next_fire_at;
                    let right_time = next.is_some_and(|at| now >= at);
                    if right_time || execution.manual_pending {
                        // A queued manual start rides along with a due fire; the
                        // task does not start twice even when nonexclusive
                        execution.manual_pending = false;
                        if right_time {
                            execution.next_fire_at = if schedule.exclusive {
                                // Exclusive tasks do not start again until they
                                // terminate; completion re-arms the fire
                                None
                            } else {
                                next.and_then(|previous| {
                                    time_wheel::next_fire_after(&schedule, previous, now)
                                })
                            };
                        }
                        Decision::Dispatch(execution.next_fire_at)
                    } else if let Some(at) = next {
                        Decision::Track(at)
                    } else {
                        Decision::Skip
                    }
                }
            };

            let upcoming = match decision {
                Decision::Skip => None,
                Decision::Track(at) => Some(at),
                Decision::Dispatch(next) => {
                    match self.clone().dispatch_task(&schedule).await {
                        Ok(_) => {}
                        Err(FoghornErrors::Paused) => return None,
                        Err(err) => {
                            error!(
                                "Unable to start schedule '{}' process '{}': {}",
                                schedule.name, schedule.process_name, err
                            );
                            // Avoid running into the same spawn failure on a hot loop
                            if self
                                .executions
                                .remove_if(&key, |_, execution| execution.live_tasks.is_empty())
                                .is_some()
                            {
                                continue;
                            }
                        }
                    }
                    next
                }
            };

            if let Some(at) = upcoming {
                earliest = Some(match earliest {
                    Some(soonest) if soonest <= at => soonest,
                    _ => at,
                });
            }
        }

        earliest
    }

    /// Starts a task process for a schedule and installs its completion waiter.
    /// Non-startup tasks get their RUNNING row inserted before the waiter exists,
    /// so the waiter's later update always targets a row
    pub(crate) async fn dispatch_task(self: Arc<Self>, schedule: &Schedule) -> Result<Uuid, FoghornErrors> {
        if self.is_paused() {
            return Err(FoghornErrors::Paused);
        }

        let task_id = Uuid::new_v4();
        let argv = self
            .processes
            .get(&schedule.process_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FoghornErrors::UnknownProcess(schedule.process_name.clone()))?;

        info!(
            "Starting: schedule '{}' process '{}' task {} {:?}",
            schedule.name, schedule.process_name, task_id, argv
        );

        // Counted before anything can suspend: a concurrent stop() must not return
        // between the spawn and the task becoming tracked
        self.active_tasks.fetch_add(1, Ordering::SeqCst);

        let handle = match self.supervisor.spawn(&schedule.process_name, &argv) {
            Ok(handle) => handle,
            Err(err) => {
                self.active_tasks.fetch_sub(1, Ordering::SeqCst);
                return Err(err);
            }
        };

        // Recorded for the task row and logs; signalling always goes through the
        // handle, which knows whether the pid is still valid
        let pid = handle.pid().unwrap_or_default();
        let started_at = self.clock.now().await;
        let process = Arc::new(handle);
        self.executions
            .entry(schedule.id)
            .or_default()
            .live_tasks
            .insert(
                task_id,
                TaskHandle {
                    id: task_id,
                    pid,
                    process: process.clone(),
                    started_at,
                },
            );

        info!(
            "Started: schedule '{}' process '{}' task {} pid {}",
            schedule.name, schedule.process_name, task_id, pid
        );

        if !matches!(schedule.kind, ScheduleKind::Startup) {
            let record = TaskRecord {
                id: task_id,
                process_name: schedule.process_name.clone(),
                state: TaskState::Running,
                start_time: DateTime::<Utc>::from(started_at),
                end_time: None,
                pid,
                exit_code: None,
                reason: None,
            };
            if let Err(err) = self.store.insert_task(&record).await {
                warn!("Unable to record task {} as running: {}", task_id, err);
            }
        }

        let inner = self.clone();
        let schedule_id = schedule.id;
        tokio::spawn(async move {
            let exit_code = process.wait().await;
            inner.on_task_completion(schedule_id, task_id, exit_code).await;
        });

        Ok(task_id)
    }

    /// Runs when a task's child process has been reaped: untracks the task,
    /// finalizes its row, re-arms an exclusive schedule and drops the execution
    /// entry once the schedule has nothing left to do
    async fn on_task_completion(&self, schedule_id: Uuid, task_id: Uuid, exit_code: Option<i32>) {
        // The schedule may have been deleted while the task ran
        let schedule = self.schedules.get(&schedule_id).map(|s| s.value().clone());

        if let Some(ref schedule) = schedule {
            info!(
                "Exited: schedule '{}' process '{}' task {} exit {:?}",
                schedule.name, schedule.process_name, task_id, exit_code
            );
        }

        let mut decremented = false;
        let _ = self
            .active_tasks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                decremented = count > 0;
                count.checked_sub(1)
            });
        if !decremented {
            error!("Active task count would be negative");
        }

        let started_at = self
            .executions
            .get_mut(&schedule_id)
            .and_then(|mut execution| execution.live_tasks.remove(&task_id))
            .map(|task| task.started_at);

        let is_startup = schedule
            .as_ref()
            .is_some_and(|s| matches!(s.kind, ScheduleKind::Startup));
        if !is_startup {
            let end_time = DateTime::<Utc>::from(self.clock.now().await);
            match self
                .store
                .update_task_on_exit(task_id, exit_code, end_time, TaskState::Complete)
                .await
            {
                Ok(0) => warn!("Task {} not found, unable to update its status", task_id),
                Ok(_) => {}
                Err(err) => warn!("Unable to update status of task {}: {}", task_id, err),
            }
        }

        let paused = self.is_paused();
        let now = self.clock.now().await;
        let mut rearmed = false;

        if let Some(ref schedule) = schedule {
            if schedule.exclusive && schedule.repeat.is_some() && !paused {
                if let Some(mut execution) = self.executions.get_mut(&schedule_id) {
                    // A future fire instant means the task was started manually
                    // ahead of schedule; leave the schedule's own slot alone
                    let manual_ahead = execution.next_fire_at.is_some_and(|at| now < at);
                    if !manual_ahead {
                        let anchor = started_at.unwrap_or(now);
                        execution.next_fire_at =
                            time_wheel::next_fire_after(schedule, anchor, now);
                        if let Some(at) = execution.next_fire_at {
                            info!(
                                "Scheduled '{}' for {}",
                                schedule.name,
                                system_time_to_date_time(at)
                            );
                            rearmed = true;
                        }
                    }
                }
            }
        }

        let repeating = schedule.as_ref().is_some_and(|s| s.repeat.is_some());
        if paused || !repeating {
            let removed = self.executions.remove_if(&schedule_id, |_, execution| {
                execution.live_tasks.is_empty() && !execution.manual_pending
            });
            if removed.is_some() {
                if let Some(ref schedule) = schedule {
                    info!("Tasks will no longer execute for schedule '{}'", schedule.name);
                }
            }
        }

        if rearmed {
            self.wake.notify_one();
        }
    }
}
