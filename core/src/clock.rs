pub mod system_clock;
pub mod virtual_clock;

use std::fmt::Debug;
use std::ops::Deref;
pub use system_clock::SystemClock;
pub use virtual_clock::VirtualClock;

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// [`SchedulerClock`] is a trait for implementing a custom scheduler clock, typical operations
/// include getting the current wall-clock time and idling until a specific instant is reached.
///
/// # Required Methods
/// When implementing the [`SchedulerClock`], one must provide implementations for two methods,
/// those being [`SchedulerClock::now`] and [`SchedulerClock::idle_to`], the former is used to
/// get the current wall-clock time (next-fire instants are *computed* against it) while the
/// latter is used to idle until an instant of interest (the *sleep between* fires is a
/// monotonic duration, which keeps the scheduler honest across clock jumps and DST shifts)
///
/// # Trait Implementation(s)
/// Specifically, there are 2 noteworthy implementations to list, those being:
///
/// - [`VirtualClock`] used to simulate time (for unit-tests, debugging and so on), it doesn't
///   go forward without explicit advancing and implements the [`AdvanceableSchedulerClock`]
///   extension trait
///
/// - [`SystemClock`] the default go-to clock, it automatically goes forward and doesn't wait
///   around, it doesn't implement the [`AdvanceableSchedulerClock`] trait due to its nature
///
/// # IMPORTANT Note(s)
/// The precision of [`SchedulerClock`] can depend on the underlying OS-specific time format
/// due to the fact it uses `SystemTime` under the hood; the scheduler itself never relies on
/// sub-second precision
///
/// # See Also
/// - [`VirtualClock`]
/// - [`SystemClock`]
/// - [`AdvanceableSchedulerClock`]
#[async_trait]
pub trait SchedulerClock: Debug + Send + Sync {
    /// Gets the current time of the clock
    ///
    /// # Returns
    /// The current time of the clock represented as [`SystemTime`] (to avoid any timezone
    /// issues and let the user convert it to the timezone representation of their choice)
    ///
    /// # See Also
    /// - [`SystemTime`]
    /// - [`SchedulerClock`]
    async fn now(&self) -> SystemTime;

    /// Idle until this specified time is reached (if it is in the past or present, it
    /// doesn't idle)
    ///
    /// # Arguments
    /// It accepts a ``to`` parameter, it specifies the point in time to reach by simply
    /// idling around, with type [`SystemTime`]
    ///
    /// # See Also
    /// - [`SystemTime`]
    /// - [`SchedulerClock`]
    async fn idle_to(&self, to: SystemTime);
}

#[async_trait]
impl<T> SchedulerClock for T
where
    T: Deref + Send + Sync + Debug,
    T::Target: SchedulerClock,
{
    async fn now(&self) -> SystemTime {
        self.deref().now().await
    }

    async fn idle_to(&self, to: SystemTime) {
        self.deref().idle_to(to).await
    }
}

/// [`AdvanceableSchedulerClock`] is an optional extension to [`SchedulerClock`] which, as the
/// name suggests, allows for arbitrary advancement of time, specific clocks might not support
/// arbitrary advancement (such as [`SystemClock`]), as such why it is an optional trait
///
/// # Required Methods
/// When implementing the [`AdvanceableSchedulerClock`], one has to fully implement one method
/// being [`AdvanceableSchedulerClock::advance_to`] which is used for advancing the time to
/// a specific point of interest
///
/// # See Also
/// - [`SchedulerClock`]
/// - [`VirtualClock`]
#[async_trait]
pub trait AdvanceableSchedulerClock: SchedulerClock {
    /// Advance the time by a specified duration forward
    ///
    /// # Arguments
    /// It accepts a ``duration`` parameter of type [`Duration`], used to advance the
    /// time by that specific duration, it acts similar in spirit to
    /// [`AdvanceableSchedulerClock::advance_to`] (in fact it uses this method under the
    /// hood), but for durations
    ///
    /// # See Also
    /// - [`Duration`]
    /// - [`SchedulerClock`]
    /// - [`AdvanceableSchedulerClock`]
    async fn advance(&self, duration: Duration) {
        let now = self.now().await;
        self.advance_to(now + duration).await
    }

    /// Advance the time to a specified desired future point of time
    ///
    /// # Arguments
    /// It accepts a ``to`` parameter of type [`SystemTime`]. It is used to advance the
    /// time to that point of time. It acts similarly to [`AdvanceableSchedulerClock::advance`]
    /// but for time points, this method is required to specify an implementation
    ///
    /// # See Also
    /// - [`SystemTime`]
    /// - [`SchedulerClock`]
    /// - [`AdvanceableSchedulerClock`]
    async fn advance_to(&self, to: SystemTime);
}

#[async_trait]
impl<T> AdvanceableSchedulerClock for T
where
    T: Deref + Send + Sync + Debug,
    T::Target: AdvanceableSchedulerClock,
{
    async fn advance(&self, duration: Duration) {
        self.deref().advance(duration).await
    }

    async fn advance_to(&self, to: SystemTime) {
        self.deref().advance_to(to).await
    }
}
