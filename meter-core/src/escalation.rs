//! Escalation from a threshold breach to a process restart.
//!
//! Escalating sends exactly one error report and then hands a
//! [`RestartNotice`] back to the caller. The report may fail or never leave
//! the device; the restart happens regardless.

use core::fmt::{self, Write};

use heapless::String;

use crate::failure::{Breach, FailureState};
use crate::upload::{NetworkLink, ReportUploader, Transport, UploadOutcome};

/// Capacity of the error reason text.
pub const REASON_CAPACITY: usize = 48;

/// Prefix of every reason sent on escalation.
pub const RESTART_REASON: &str = "Rebooting...";

/// Snapshot sent to the collector before restarting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorEvent {
    pub reason: String<REASON_CAPACITY>,
    pub counters: FailureState,
    pub rssi: Option<i8>,
}

impl ErrorEvent {
    /// Builds an event, truncating `reason` on a character boundary.
    #[must_use]
    pub fn new(reason: &str, counters: FailureState, rssi: Option<i8>) -> Self {
        let mut text = String::new();
        for ch in reason.chars() {
            if text.push(ch).is_err() {
                break;
            }
        }
        Self {
            reason: text,
            counters,
            rssi,
        }
    }
}

/// Returned once the agent must restart.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RestartNotice {
    pub breach: Breach,
    /// Counters when the breach was detected.
    pub counters: FailureState,
    /// What became of the error report.
    pub report: UploadOutcome,
}

impl fmt::Display for RestartNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "restart ({}) [{}] report {}",
            self.breach, self.counters, self.report
        )
    }
}

/// Formats the reason text for `breach`, e.g. `Rebooting... bus+upload`.
#[must_use]
pub fn restart_reason(breach: Breach) -> String<REASON_CAPACITY> {
    let mut reason = String::new();
    // Three domain labels plus the prefix fit in REASON_CAPACITY.
    let _ = write!(reason, "{RESTART_REASON} {breach}");
    reason
}

/// Turns a breach into one error report and a restart.
#[derive(Copy, Clone, Debug, Default)]
pub struct Escalator;

impl Escalator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Reports the breach once and returns the restart notice.
    pub async fn escalate<L, T>(
        &self,
        breach: Breach,
        uploader: &mut ReportUploader<'_, L, T>,
        state: &mut FailureState,
    ) -> RestartNotice
    where
        L: NetworkLink,
        T: Transport,
    {
        let counters = *state;
        let event = ErrorEvent::new(
            restart_reason(breach).as_str(),
            counters,
            uploader.link().rssi(),
        );
        let report = uploader.report_error(&event, state).await;

        RestartNotice {
            breach,
            counters,
            report,
        }
    }
}
