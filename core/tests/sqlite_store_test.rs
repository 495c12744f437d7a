use chrono::{NaiveTime, TimeDelta, Utc};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use foghorn::schedule::{Schedule, ScheduleKind};
use foghorn::storage::{SchedulerStore, SqliteStore};
use foghorn::task::{TaskRecord, TaskState};

fn running_record(process_name: &str) -> TaskRecord {
    TaskRecord {
        id: Uuid::new_v4(),
        process_name: process_name.to_string(),
        state: TaskState::Running,
        start_time: Utc::now(),
        end_time: None,
        pid: 4242,
        exit_code: None,
        reason: None,
    }
}

#[tokio::test]
async fn schedules_round_trip_field_wise() {
    let store = SqliteStore::in_memory().await.unwrap();

    let schedules = vec![
        Schedule::builder()
            .name("boot")
            .process_name("sleep1")
            .kind(ScheduleKind::Startup)
            .build(),
        Schedule::builder()
            .name("poll")
            .process_name("sleep1")
            .kind(ScheduleKind::Interval)
            .repeat(Some(Duration::from_secs(15)))
            .exclusive(true)
            .build(),
        Schedule::builder()
            .name("nightly")
            .process_name("sleep10")
            .kind(ScheduleKind::Timed {
                time: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
                day: Some(7),
            })
            .repeat(Some(Duration::from_secs(7 * 24 * 3600)))
            .build(),
        Schedule::builder()
            .name("backup")
            .process_name("sleep10")
            .kind(ScheduleKind::Manual)
            .build(),
    ];

    for schedule in &schedules {
        store.insert_schedule(schedule).await.unwrap();
    }

    let mut loaded = store.load_schedules().await.unwrap();
    loaded.sort_by(|a, b| a.name.cmp(&b.name));
    let mut expected = schedules.clone();
    expected.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(loaded, expected);
}

#[tokio::test]
async fn update_schedule_reports_missing_rows() {
    let store = SqliteStore::in_memory().await.unwrap();

    let schedule = Schedule::builder()
        .name("poll")
        .process_name("sleep1")
        .kind(ScheduleKind::Interval)
        .repeat(Some(Duration::from_secs(15)))
        .build();

    assert_eq!(store.update_schedule(&schedule).await.unwrap(), 0);

    store.insert_schedule(&schedule).await.unwrap();
    let mut renamed = schedule.clone();
    renamed.name = "poll-renamed".to_string();
    assert_eq!(store.update_schedule(&renamed).await.unwrap(), 1);

    let loaded = store.load_schedules().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, "poll-renamed");
}

#[tokio::test]
async fn task_rows_insert_and_finalize() {
    let store = SqliteStore::in_memory().await.unwrap();

    let record = running_record("sleep1");
    store.insert_task(&record).await.unwrap();

    let end_time = record.start_time + TimeDelta::seconds(1);
    let updated = store
        .update_task_on_exit(record.id, Some(0), end_time, TaskState::Complete)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let row = sqlx::query("SELECT state, exit_code, end_time FROM tasks WHERE id = ?")
        .bind(record.id.to_string())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i16, _>("state"), TaskState::Complete as i16);
    assert_eq!(row.get::<Option<i32>, _>("exit_code"), Some(0));
    assert!(row.get::<Option<String>, _>("end_time").is_some());

    let missing = store
        .update_task_on_exit(Uuid::new_v4(), Some(0), end_time, TaskState::Complete)
        .await
        .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn orphan_recovery_touches_only_dangling_rows() {
    let store = SqliteStore::in_memory().await.unwrap();

    let orphan = running_record("sleep1");
    store.insert_task(&orphan).await.unwrap();

    let finished = running_record("sleep1");
    store.insert_task(&finished).await.unwrap();
    store
        .update_task_on_exit(finished.id, Some(0), Utc::now(), TaskState::Complete)
        .await
        .unwrap();

    let recovered = store.mark_orphans_interrupted(Utc::now()).await.unwrap();
    assert_eq!(recovered, 1);

    let row = sqlx::query("SELECT state, end_time FROM tasks WHERE id = ?")
        .bind(orphan.id.to_string())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i16, _>("state"), TaskState::Interrupted as i16);
    assert!(row.get::<Option<String>, _>("end_time").is_some());

    let row = sqlx::query("SELECT state FROM tasks WHERE id = ?")
        .bind(finished.id.to_string())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i16, _>("state"), TaskState::Complete as i16);
}

#[tokio::test]
async fn process_catalog_decodes_command_vectors() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.reset_for_testing().await.unwrap();

    let processes = store.load_processes().await.unwrap();
    assert_eq!(
        processes.get("sleep1"),
        Some(&vec!["sleep".to_string(), "1".to_string()])
    );
    assert_eq!(
        processes.get("sleep10"),
        Some(&vec!["sleep".to_string(), "10".to_string()])
    );
}

#[tokio::test]
async fn reset_for_testing_wipes_scheduler_tables() {
    let store = SqliteStore::in_memory().await.unwrap();

    store.insert_task(&running_record("sleep1")).await.unwrap();
    store
        .insert_schedule(
            &Schedule::builder()
                .name("poll")
                .process_name("sleep1")
                .kind(ScheduleKind::Interval)
                .repeat(Some(Duration::from_secs(15)))
                .build(),
        )
        .await
        .unwrap();

    store.reset_for_testing().await.unwrap();

    assert!(store.load_schedules().await.unwrap().is_empty());
    let tasks: i64 = sqlx::query("SELECT COUNT(*) AS n FROM tasks")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("n");
    assert_eq!(tasks, 0);
}
