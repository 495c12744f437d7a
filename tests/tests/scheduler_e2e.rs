use std::time::Duration;
use uuid::Uuid;

use chrono::Utc;
use foghorn::errors::FoghornErrors;
use foghorn::schedule::{Schedule, ScheduleKind};
use foghorn::storage::SchedulerStore;
use foghorn::task::{TaskRecord, TaskState};

use tests::{init_tracing, scheduler_over, seed_process, stop_with_retry, store_in, task_states};

const RUNNING: i16 = TaskState::Running as i16;
const COMPLETE: i16 = TaskState::Complete as i16;
const INTERRUPTED: i16 = TaskState::Interrupted as i16;

#[tokio::test]
async fn startup_schedule_spawns_without_task_row() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    let marker = dir.path().join("booted");
    seed_process(&store, "mark", &["touch", marker.to_str().unwrap()]).await;
    store
        .insert_schedule(
            &Schedule::builder()
                .name("bootstrap")
                .process_name("mark")
                .kind(ScheduleKind::Startup)
                .build(),
        )
        .await
        .unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();

    let mut spawned = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if marker.exists() {
            spawned = true;
            break;
        }
    }
    assert!(spawned, "startup task did not run within 2s");

    // Startup tasks are infrastructure, they never produce a task row
    assert!(task_states(&store).await.is_empty());

    stop_with_retry(&scheduler).await;
}

#[tokio::test]
async fn interval_schedule_completes_three_times() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    seed_process(&store, "noop", &["true"]).await;
    store
        .insert_schedule(
            &Schedule::builder()
                .name("tick")
                .process_name("noop")
                .kind(ScheduleKind::Interval)
                .repeat(Some(Duration::from_secs(1)))
                .exclusive(true)
                .build(),
        )
        .await
        .unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3600)).await;
    stop_with_retry(&scheduler).await;

    let rows = task_states(&store).await;
    assert!(
        (3..=4).contains(&rows.len()),
        "expected about 3 fires, saw {}",
        rows.len()
    );
    for (state, exit_code) in rows {
        assert_eq!(state, COMPLETE);
        assert_eq!(exit_code, Some(0));
    }
}

#[tokio::test]
async fn exclusive_schedule_keeps_a_single_running_task() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    seed_process(&store, "slow", &["sleep", "5"]).await;
    let schedule = Schedule::builder()
        .name("drain")
        .process_name("slow")
        .kind(ScheduleKind::Interval)
        .repeat(Some(Duration::from_secs(1)))
        .exclusive(true)
        .build();
    let schedule_id = schedule.id;
    store.insert_schedule(&schedule).await.unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let rows = task_states(&store).await;
    assert_eq!(rows.len(), 1, "exclusive schedule must not stack tasks");
    assert_eq!(rows[0].0, RUNNING);

    // Manual starts respect exclusivity while a task is live
    let err = scheduler.start_task(schedule_id).await.unwrap_err();
    assert!(matches!(err, FoghornErrors::TaskRunning(id) if id == schedule_id));

    stop_with_retry(&scheduler).await;
}

#[tokio::test]
async fn manual_start_runs_once_and_queues_at_most_one() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    seed_process(&store, "noop", &["true"]).await;
    let schedule = Schedule::builder()
        .name("on-demand")
        .process_name("noop")
        .kind(ScheduleKind::Manual)
        .build();
    let schedule_id = schedule.id;
    store.insert_schedule(&schedule).await.unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();

    scheduler.start_task(schedule_id).await.unwrap();
    // Queued again before the loop dispatches: rejected as already queued
    let err = scheduler.start_task(schedule_id).await.unwrap_err();
    assert!(matches!(err, FoghornErrors::TaskQueued(id) if id == schedule_id));

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let rows = task_states(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], (COMPLETE, Some(0)));

    // The queue slot frees up once the task has dispatched
    scheduler.start_task(schedule_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(task_states(&store).await.len(), 2);

    stop_with_retry(&scheduler).await;
}

#[tokio::test]
async fn crash_recovery_interrupts_orphaned_rows() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    let orphan = TaskRecord {
        id: Uuid::new_v4(),
        process_name: "sleep1".to_string(),
        state: TaskState::Running,
        start_time: Utc::now(),
        end_time: None,
        pid: 12345,
        exit_code: None,
        reason: None,
    };
    store.insert_task(&orphan).await.unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();

    let rows = task_states(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, INTERRUPTED);

    let end_time: Option<String> = sqlx::query_scalar("SELECT end_time FROM tasks WHERE id = ?")
        .bind(orphan.id.to_string())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert!(end_time.is_some(), "recovery must populate end_time");

    stop_with_retry(&scheduler).await;
}

#[tokio::test]
async fn stop_terminates_children_within_grace() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    seed_process(&store, "hang", &["sleep", "60"]).await;
    store
        .insert_schedule(
            &Schedule::builder()
                .name("hang")
                .process_name("hang")
                .kind(ScheduleKind::Interval)
                .repeat(Some(Duration::from_secs(1)))
                .exclusive(true)
                .build(),
        )
        .await
        .unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(scheduler.live_task_count(), 1);

    stop_with_retry(&scheduler).await;
    assert_eq!(scheduler.live_task_count(), 0);
    assert!(!scheduler.has_started().await);

    // The completion waiter records the terminated child; no exit code, it died
    // to a signal
    tokio::time::sleep(Duration::from_millis(300)).await;
    let rows = task_states(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], (COMPLETE, None));
}

#[tokio::test]
async fn interval_fire_rate_is_bounded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    seed_process(&store, "noop", &["true"]).await;
    store
        .insert_schedule(
            &Schedule::builder()
                .name("metronome")
                .process_name("noop")
                .kind(ScheduleKind::Interval)
                .repeat(Some(Duration::from_secs(1)))
                .build(),
        )
        .await
        .unwrap();

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10_200)).await;
    stop_with_retry(&scheduler).await;

    let fired = task_states(&store).await.len();
    assert!(
        (9..=11).contains(&fired),
        "one-second repeat across ten seconds fired {fired} times"
    );
}

#[tokio::test]
async fn lifecycle_errors_surface_to_callers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();
    assert!(matches!(
        scheduler.start().await.unwrap_err(),
        FoghornErrors::AlreadyStarted
    ));

    let unknown = Uuid::new_v4();
    assert!(matches!(
        scheduler.start_task(unknown).await.unwrap_err(),
        FoghornErrors::ScheduleNotFound(id) if id == unknown
    ));

    stop_with_retry(&scheduler).await;
    assert!(matches!(
        scheduler.start_task(unknown).await.unwrap_err(),
        FoghornErrors::Paused
    ));
}

#[tokio::test]
async fn save_schedule_validates_definitions() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;
    let scheduler = scheduler_over(store.clone());

    let no_repeat = Schedule::builder()
        .name("broken-interval")
        .process_name("noop")
        .kind(ScheduleKind::Interval)
        .build();
    assert!(matches!(
        scheduler.save_schedule(no_repeat).await.unwrap_err(),
        FoghornErrors::IntervalRequiresRepeat(_)
    ));

    let bad_day = Schedule::builder()
        .name("broken-timed")
        .process_name("noop")
        .kind(ScheduleKind::Timed {
            time: chrono::NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            day: Some(8),
        })
        .build();
    assert!(matches!(
        scheduler.save_schedule(bad_day).await.unwrap_err(),
        FoghornErrors::InvalidWeekday(_, 8)
    ));

    // Nothing invalid may reach the store
    assert!(store.load_schedules().await.unwrap().is_empty());
}

#[tokio::test]
async fn save_schedule_round_trips_and_keeps_timing_stable() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir).await;

    let scheduler = scheduler_over(store.clone());
    scheduler.start().await.unwrap();

    let schedule = Schedule::builder()
        .name("hourly-sync")
        .process_name("noop")
        .kind(ScheduleKind::Interval)
        .repeat(Some(Duration::from_secs(3600)))
        .build();
    let schedule_id = schedule.id;

    scheduler.save_schedule(schedule.clone()).await.unwrap();
    let loaded = store.load_schedules().await.unwrap();
    assert_eq!(loaded, vec![schedule.clone()]);

    let first = scheduler.next_fire_at(schedule_id).expect("seeded fire");

    // Renaming does not touch any timing field, the fire instant must hold
    let mut renamed = schedule.clone();
    renamed.name = "hourly-sync-renamed".to_string();
    scheduler.save_schedule(renamed).await.unwrap();
    assert_eq!(scheduler.next_fire_at(schedule_id), Some(first));

    // Changing the repeat re-seeds the fire instant
    let mut slower = schedule.clone();
    slower.repeat = Some(Duration::from_secs(7200));
    scheduler.save_schedule(slower).await.unwrap();
    assert_ne!(scheduler.next_fire_at(schedule_id), Some(first));

    stop_with_retry(&scheduler).await;
}
