//! Pacing between requests on the shared bus and the network.

use core::time::Duration;

/// Default pause after every channel read.
pub const CHANNEL_GAP: Duration = Duration::from_millis(50);

/// Default pause after each slave has been handled.
pub const SLAVE_GAP: Duration = Duration::from_millis(200);

/// Asynchronous delay source.
///
/// Firmware backs this with `embassy_time::Timer`; host tooling usually
/// records the requested pauses instead of sleeping.
#[allow(async_fn_in_trait)]
pub trait Delay {
    async fn delay(&mut self, duration: Duration);
}

impl<T: Delay + ?Sized> Delay for &mut T {
    async fn delay(&mut self, duration: Duration) {
        (**self).delay(duration).await;
    }
}

/// Delay that completes immediately.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDelay;

impl Delay for NoopDelay {
    async fn delay(&mut self, _duration: Duration) {}
}

/// Inter-request spacing applied by the poller and the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pacing {
    pub channel_gap: Duration,
    pub slave_gap: Duration,
}

impl Pacing {
    pub const DEFAULT: Self = Self::new(CHANNEL_GAP, SLAVE_GAP);

    #[must_use]
    pub const fn new(channel_gap: Duration, slave_gap: Duration) -> Self {
        Self {
            channel_gap,
            slave_gap,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::DEFAULT
    }
}
