use chrono::NaiveTime;
use std::time::Duration;

use foghorn::schedule::{Schedule, ScheduleKind, ScheduleType};
use foghorn::task::TaskState;

#[test]
fn schedule_type_wire_codes_are_stable() {
    assert_eq!(ScheduleType::Startup as i16, 1);
    assert_eq!(ScheduleType::Timed as i16, 2);
    assert_eq!(ScheduleType::Interval as i16, 3);
    assert_eq!(ScheduleType::Manual as i16, 4);

    for code in 1..=4i16 {
        let parsed = ScheduleType::try_from(code).unwrap();
        assert_eq!(parsed as i16, code);
    }
    assert!(ScheduleType::try_from(0).is_err());
    assert!(ScheduleType::try_from(5).is_err());
}

#[test]
fn task_state_wire_codes_are_stable() {
    assert_eq!(TaskState::Running as i16, 1);
    assert_eq!(TaskState::Complete as i16, 2);
    assert_eq!(TaskState::Canceled as i16, 3);
    assert_eq!(TaskState::Interrupted as i16, 4);

    for code in 1..=4i16 {
        let parsed = TaskState::try_from(code).unwrap();
        assert_eq!(parsed as i16, code);
    }
    assert!(TaskState::try_from(7).is_err());
}

#[test]
fn kind_maps_to_wire_discriminant() {
    let timed = ScheduleKind::Timed {
        time: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
        day: Some(1),
    };
    assert_eq!(ScheduleKind::Startup.schedule_type(), ScheduleType::Startup);
    assert_eq!(timed.schedule_type(), ScheduleType::Timed);
    assert_eq!(ScheduleKind::Interval.schedule_type(), ScheduleType::Interval);
    assert_eq!(ScheduleKind::Manual.schedule_type(), ScheduleType::Manual);
}

#[test]
fn builder_defaults_leave_schedule_manual_friendly() {
    let schedule = Schedule::builder()
        .name("backup")
        .process_name("backup")
        .kind(ScheduleKind::Manual)
        .build();

    assert!(schedule.repeat.is_none());
    assert!(!schedule.exclusive);
    assert_eq!(schedule.name, "backup");
}

#[test]
fn builder_generates_distinct_ids() {
    let a = Schedule::builder()
        .name("a")
        .process_name("noop")
        .kind(ScheduleKind::Manual)
        .build();
    let b = Schedule::builder()
        .name("b")
        .process_name("noop")
        .kind(ScheduleKind::Manual)
        .build();
    assert_ne!(a.id, b.id);
}

#[test]
fn interval_schedule_carries_repeat() {
    let schedule = Schedule::builder()
        .name("poll")
        .process_name("poll")
        .kind(ScheduleKind::Interval)
        .repeat(Some(Duration::from_secs(15)))
        .exclusive(true)
        .build();

    assert_eq!(schedule.repeat, Some(Duration::from_secs(15)));
    assert!(schedule.exclusive);
}
