use chrono::{Datelike, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use std::time::{Duration, SystemTime};

use crate::schedule::{Schedule, ScheduleKind};
use crate::utils::{date_time_to_system_time, resolve_local, system_time_to_date_time};

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

const DAY_SECONDS: u64 = 3600 * 24;

/// Computes the first fire instant of a schedule, used when seeding the schedule at
/// scheduler start and when a save changes a schedule's timing
///
/// # Argument(s)
/// The ``anchor`` is the instant interval arithmetic counts from (the scheduler's start
/// time at boot, the current time on a timing-relevant save); ``now`` is the current
/// wall-clock instant
///
/// # Returns
/// The instant of the first fire, or ``None`` for schedules with no future auto-fire
/// (manual schedules always, interval schedules missing their repeat)
///
/// # See Also
/// - [`next_fire_after`]
/// - [`Scheduler`]
pub fn first_fire(schedule: &Schedule, anchor: SystemTime, now: SystemTime) -> Option<SystemTime> {
    match &schedule.kind {
        ScheduleKind::Startup => Some(now),
        ScheduleKind::Manual => None,
        ScheduleKind::Interval => {
            let repeat = schedule.repeat?;
            Some(advance_instant(anchor, repeat, now))
        }
        ScheduleKind::Timed { time, day } => Some(next_timed(*time, *day, schedule.repeat, now)),
    }
}

/// Computes the fire instant that follows ``previous`` for a repeating schedule.
/// The advance is a whole multiple of the repeat interval chosen to land strictly
/// after a long pause, so catching up never produces a burst of back-to-back fires
///
/// # Returns
/// The next instant, or ``None`` when the schedule does not repeat
///
/// # See Also
/// - [`first_fire`]
pub fn next_fire_after(
    schedule: &Schedule,
    previous: SystemTime,
    now: SystemTime,
) -> Option<SystemTime> {
    let repeat = schedule.repeat?;
    match &schedule.kind {
        ScheduleKind::Manual => None,
        ScheduleKind::Timed { time, day } => Some(advance_timed(*time, *day, repeat, previous, now)),
        ScheduleKind::Startup | ScheduleKind::Interval => {
            Some(advance_instant(previous, repeat, now))
        }
    }
}

/// The whole multiple of ``repeat`` that carries ``from`` past ``now``, at least one
fn advance_amount(from: SystemTime, repeat: Duration, now: SystemTime) -> Duration {
    let elapsed = now.duration_since(from).unwrap_or(Duration::ZERO);
    let steps = (elapsed.as_secs_f64() / repeat.as_secs_f64()).ceil().max(1.0);
    Duration::from_secs_f64(repeat.as_secs_f64() * steps)
}

/// Advances ``from`` past ``now`` in whole multiples of ``repeat``, always at least one
fn advance_instant(from: SystemTime, repeat: Duration, now: SystemTime) -> SystemTime {
    if repeat.is_zero() {
        return now;
    }
    from + advance_amount(from, repeat, now)
}

/// Builds the next fire instant of a timed schedule out of broken-down local wall time.
/// Defining the instant in local calendar terms rather than elapsed seconds is what
/// carries the schedule correctly across daylight-saving transitions.
///
/// With a repeat below one day the schedule runs in sub-day mode: the candidate keeps
/// the current hour and takes only minute and second from the schedule's time of day,
/// and a candidate already past rolls forward one hour instead of one day
fn next_timed(
    time: NaiveTime,
    day: Option<u8>,
    repeat: Option<Duration>,
    now: SystemTime,
) -> SystemTime {
    let current = system_time_to_date_time(now);
    let sub_day = repeat.is_some_and(|r| r.as_secs() < DAY_SECONDS && !r.is_zero());

    let time_of_day = if sub_day {
        NaiveTime::from_hms_opt(current.hour(), time.minute(), time.second()).unwrap()
    } else {
        time
    };
    let mut candidate = NaiveDateTime::new(current.date_naive(), time_of_day);

    if candidate < current.naive_local() {
        candidate += if sub_day {
            TimeDelta::hours(1)
        } else {
            TimeDelta::days(1)
        };
    }

    if let Some(day) = day {
        while weekday_number(&candidate) != day {
            candidate += TimeDelta::days(1);
        }
    }

    date_time_to_system_time(resolve_local(candidate))
}

/// Advances a timed schedule past ``now``. The size of the advance is interval
/// arithmetic, but it is applied to the previous fire's broken-down local wall time
/// and the result resolved back to an instant, so the time of day survives a
/// daylight-saving transition. When the advance lands on the wrong weekday the
/// instant is rebuilt from that day's midnight instead
fn advance_timed(
    time: NaiveTime,
    day: Option<u8>,
    repeat: Duration,
    previous: SystemTime,
    now: SystemTime,
) -> SystemTime {
    if repeat.is_zero() {
        return now;
    }
    let advance = TimeDelta::from_std(advance_amount(previous, repeat, now)).unwrap();
    let naive = system_time_to_date_time(previous).naive_local() + advance;
    match day {
        Some(day) if weekday_number(&naive) != day => {
            let midnight = naive.date().and_time(NaiveTime::MIN);
            next_timed(
                time,
                Some(day),
                Some(repeat),
                date_time_to_system_time(resolve_local(midnight)),
            )
        }
        _ => date_time_to_system_time(resolve_local(naive)),
    }
}

/// ISO weekday number, 1 = Monday through 7 = Sunday
fn weekday_number(dt: &NaiveDateTime) -> u8 {
    dt.weekday().number_from_monday() as u8
}
