use crate::clock::SchedulerClock;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::SystemTime;

#[allow(unused_imports)]
use crate::clock::VirtualClock;

/// [`SystemClock`] is an implementation of the [`SchedulerClock`] trait, it is the default
/// option for scheduling, unlike [`VirtualClock`], it moves forward no matter what and cannot
/// be advanced at any arbitrary point (due to its design)
///
/// Idling converts the wall-clock target into a duration once and then sleeps it out on the
/// runtime's monotonic timer; a target in the past or present returns immediately
///
/// # See Also
/// - [`VirtualClock`]
/// - [`SchedulerClock`]
pub struct SystemClock;

impl Debug for SystemClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SystemClock").field(&SystemTime::now()).finish()
    }
}

#[async_trait]
impl SchedulerClock for SystemClock {
    async fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn idle_to(&self, to: SystemTime) {
        let now = SystemTime::now();
        let Ok(duration) = to.duration_since(now) else {
            return;
        };
        tokio::time::sleep(duration).await;
    }
}
