//! Agent event history kept in a fixed-size ring.
//!
//! The recorder is a [`CycleObserver`]: attach it to the scheduler and it
//! captures cycle boundaries, poll results, report outcomes and the final
//! escalation, stamped with the base tick they happened on. Older entries are
//! overwritten once the ring is full.

use core::fmt;

use heapless::HistoryBuf;

use crate::cycle::{CycleObserver, CycleSummary};
use crate::escalation::RestartNotice;
use crate::meter::{MeterReading, PollError, SlaveId};
use crate::upload::{ReportKind, UploadOutcome};

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Events captured by the recorder.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEvent {
    CycleStarted {
        cycle: u32,
    },
    SlavePolled {
        slave: SlaveId,
        result: Result<(), PollError>,
    },
    Report {
        kind: ReportKind,
        outcome: UploadOutcome,
    },
    CycleFinished(CycleSummary),
    Restart(RestartNotice),
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::CycleStarted { cycle } => write!(f, "cycle-start {cycle}"),
            TelemetryEvent::SlavePolled {
                slave,
                result: Ok(()),
            } => write!(f, "poll {slave} ok"),
            TelemetryEvent::SlavePolled {
                slave,
                result: Err(err),
            } => write!(f, "poll {slave} invalid: {err}"),
            TelemetryEvent::Report {
                kind: ReportKind::Data,
                outcome,
            } => write!(f, "data report {outcome}"),
            TelemetryEvent::Report {
                kind: ReportKind::Error,
                outcome,
            } => write!(f, "error report {outcome}"),
            TelemetryEvent::CycleFinished(summary) => write!(f, "cycle-end {summary}"),
            TelemetryEvent::Restart(notice) => write!(f, "{notice}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub id: EventId,
    /// Base tick the event was recorded on.
    pub tick: u32,
    pub event: TelemetryEvent,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records agent events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    tick: u32,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            tick: 0,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an event against the most recently observed tick.
    pub fn record(&mut self, event: TelemetryEvent) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            tick: self.tick,
            event,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> CycleObserver for TelemetryRecorder<CAPACITY> {
    fn on_tick(&mut self, tick: u32) {
        self.tick = tick;
    }

    fn on_cycle_start(&mut self, cycle: u32) {
        self.record(TelemetryEvent::CycleStarted { cycle });
    }

    fn on_slave_polled(&mut self, slave: SlaveId, result: &Result<MeterReading, PollError>) {
        self.record(TelemetryEvent::SlavePolled {
            slave,
            result: result.map(|_| ()),
        });
    }

    fn on_report(&mut self, kind: ReportKind, outcome: UploadOutcome) {
        self.record(TelemetryEvent::Report { kind, outcome });
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        self.record(TelemetryEvent::CycleFinished(*summary));
    }

    fn on_escalation(&mut self, notice: &RestartNotice) {
        self.record(TelemetryEvent::Restart(*notice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureState;
    use crate::upload::StatusCode;

    #[test]
    fn stamps_events_with_latest_tick() {
        let mut recorder = TelemetryRecorder::<8>::new();
        recorder.on_tick(10);
        recorder.on_cycle_start(10);
        recorder.on_report(ReportKind::Data, UploadOutcome::Delivered(StatusCode::OK));

        let latest = recorder.latest().copied().unwrap();
        assert_eq!(latest.id, 1);
        assert_eq!(latest.tick, 10);
        assert_eq!(
            latest.event,
            TelemetryEvent::Report {
                kind: ReportKind::Data,
                outcome: UploadOutcome::Delivered(StatusCode::OK)
            }
        );
    }

    #[test]
    fn ring_keeps_most_recent_entries() {
        let mut recorder = TelemetryRecorder::<2>::new();
        for cycle in 1..=3 {
            recorder.on_tick(cycle);
            recorder.on_cycle_finished(&CycleSummary {
                cycle,
                polled: 1,
                success_count: 1,
                counters: FailureState::new(),
            });
        }

        let ticks: heapless::Vec<u32, 2> = recorder.oldest_first().map(|record| record.tick).collect();
        assert_eq!(ticks.as_slice(), &[2, 3]);
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn poll_results_drop_reading_values() {
        let mut recorder = TelemetryRecorder::<4>::new();
        let failed: Result<MeterReading, PollError> = Err(PollError::Invalid {
            voltage_missing: false,
            current_missing: true,
        });
        recorder.on_slave_polled(SlaveId::new(0x66), &failed);

        let record = recorder.latest().unwrap();
        assert!(matches!(
            record.event,
            TelemetryEvent::SlavePolled {
                result: Err(PollError::Invalid {
                    current_missing: true,
                    ..
                }),
                ..
            }
        ));
    }
}
