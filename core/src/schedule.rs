use chrono::NaiveTime;
use std::time::Duration;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::errors::FoghornErrors;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// Wire-level discriminant persisted in the ``schedules.schedule_type`` column.
/// The integer values are part of the storage contract and must not change
///
/// # See Also
/// - [`ScheduleKind`]
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScheduleType {
    Startup = 1,
    Timed = 2,
    Interval = 3,
    Manual = 4,
}

impl TryFrom<i16> for ScheduleType {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ScheduleType::Startup),
            2 => Ok(ScheduleType::Timed),
            3 => Ok(ScheduleType::Interval),
            4 => Ok(ScheduleType::Manual),
            other => Err(other),
        }
    }
}

/// [`ScheduleKind`] describes *when* a schedule fires, it is a tagged variant rather than
/// a family of schedule subtypes so the next-fire computation can be an exhaustive case
/// analysis
///
/// # Variants
/// The [`ScheduleKind`] enum includes:
/// - [`ScheduleKind::Startup`] fires once when the scheduler boots (again after ``repeat``
///   if one is set); startup tasks are considered infrastructure and are never recorded in
///   the tasks table
/// - [`ScheduleKind::Timed`] fires at a wall-clock time of day, optionally pinned to a
///   day of the week (1 = Monday .. 7 = Sunday)
/// - [`ScheduleKind::Interval`] fires every ``repeat`` (which is required)
/// - [`ScheduleKind::Manual`] never auto-fires, tasks start only via
///   [`Scheduler::start_task`]
///
/// # See Also
/// - [`Schedule`]
/// - [`ScheduleType`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleKind {
    Startup,
    Timed {
        time: NaiveTime,
        day: Option<u8>,
    },
    Interval,
    Manual,
}

impl ScheduleKind {
    /// The wire-level discriminant for this kind
    ///
    /// # See Also
    /// - [`ScheduleType`]
    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            ScheduleKind::Startup => ScheduleType::Startup,
            ScheduleKind::Timed { .. } => ScheduleType::Timed,
            ScheduleKind::Interval => ScheduleType::Interval,
            ScheduleKind::Manual => ScheduleType::Manual,
        }
    }
}

/// [`Schedule`] is the declarative "when and what" record the scheduler acts on. It is
/// immutable once loaded into the registry; updates replace the record wholesale via
/// [`Scheduler::save_schedule`]
///
/// # Constructor(s)
/// [`Schedule`] is constructed through [`Schedule::builder`]; the id defaults to a fresh
/// v4 UUID so a caller only supplies one when resaving an existing schedule
///
/// # Example
/// ```ignore
/// use std::time::Duration;
/// use foghorn::schedule::{Schedule, ScheduleKind};
///
/// let schedule = Schedule::builder()
///     .name("purge readings")
///     .process_name("purge")
///     .kind(ScheduleKind::Interval)
///     .repeat(Some(Duration::from_secs(3600)))
///     .exclusive(true)
///     .build();
/// ```
///
/// # See Also
/// - [`ScheduleKind`]
/// - [`Scheduler::save_schedule`]
#[derive(TypedBuilder, Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Opaque unique identifier of the schedule
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    /// Short human label; unique by convention, not enforced by the core
    #[builder(setter(into))]
    pub name: String,

    /// Key into the process catalog naming what to execute
    #[builder(setter(into))]
    pub process_name: String,

    /// When the schedule fires
    pub kind: ScheduleKind,

    /// Fire again after this interval; absent means one-shot (or manual-only)
    #[builder(default)]
    pub repeat: Option<Duration>,

    /// When true, at most one task of this schedule may be live at a time
    #[builder(default = false)]
    pub exclusive: bool,
}

impl Schedule {
    /// Checks the cross-field invariants that the variant structure alone cannot express:
    /// an interval schedule must repeat and a timed day must be a weekday number
    pub(crate) fn validate(&self) -> Result<(), FoghornErrors> {
        match self.kind {
            ScheduleKind::Interval if self.repeat.is_none() => {
                Err(FoghornErrors::IntervalRequiresRepeat(self.name.clone()))
            }
            ScheduleKind::Timed { day: Some(day), .. } if !(1..=7).contains(&day) => {
                Err(FoghornErrors::InvalidWeekday(self.name.clone(), day))
            }
            _ => Ok(()),
        }
    }

    /// Whether `other` agrees with this schedule on every field that influences task
    /// timing (`repeat`, `exclusive` and the timed time/day). Saving a schedule whose
    /// timing fields are unchanged must not disturb its next fire instant
    pub(crate) fn timing_eq(&self, other: &Schedule) -> bool {
        self.repeat == other.repeat && self.exclusive == other.exclusive && self.kind == other.kind
    }
}
