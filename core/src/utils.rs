use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeDelta, TimeZone};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simply converts the ``SystemTime`` to a ``DateTime<Local>``, it is a private
/// method used internally by Foghorn, as such why it lives in utils module
pub(crate) fn system_time_to_date_time(t: SystemTime) -> DateTime<Local> {
    let (sec, nsec) = match t.duration_since(UNIX_EPOCH) {
        Ok(dur) => (dur.as_secs() as i64, dur.subsec_nanos()),
        Err(e) => {
            let dur = e.duration();
            let (sec, nsec) = (dur.as_secs() as i64, dur.subsec_nanos());
            if nsec == 0 {
                (-sec, 0)
            } else {
                (-sec - 1, 1_000_000_000 - nsec)
            }
        }
    };
    Local.timestamp_opt(sec, nsec).unwrap()
}

/// Simply converts the ``DateTime<Local>`` to a ``SystemTime``, it is a private
/// method used internally by Foghorn, as such why it lives in utils module
pub(crate) fn date_time_to_system_time(dt: DateTime<impl TimeZone>) -> SystemTime {
    let duration_since_epoch = dt.timestamp_nanos_opt().unwrap();
    if duration_since_epoch >= 0 {
        UNIX_EPOCH + Duration::from_nanos(duration_since_epoch as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos((-duration_since_epoch) as u64)
    }
}

/// Resolves a broken-down local datetime to an instant. A wall-clock time that
/// does not exist because a spring-forward transition skipped it rolls one hour
/// ahead; an ambiguous fall-back time resolves to the earlier of the two instants
pub(crate) fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    let mut probe = naive;
    loop {
        match Local.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => probe += TimeDelta::hours(1),
        }
    }
}
