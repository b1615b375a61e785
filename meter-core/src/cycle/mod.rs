//! Fixed-period sampling loop.
//!
//! The scheduler is driven by a one-second base tick. Every `cycle_ticks`
//! ticks it polls each configured slave in order, uploads valid readings,
//! updates the bus counter and checks the restart thresholds once. A breach
//! escalates to a [`RestartNotice`], after which the scheduler is latched and
//! only ever returns [`Outcome::Restart`].
//!
//! Side effects that are not part of the counting rules (indicator, logging,
//! telemetry) hang off [`CycleObserver`].

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::config::{AgentConfig, MAX_SLAVES};
use crate::escalation::{Escalator, RestartNotice};
use crate::failure::{FailureState, FailureTracker};
use crate::meter::{MeterDriver, MeterPoller, MeterReading, PollError, SlaveId};
use crate::timing::Delay;
use crate::upload::{NetworkLink, ReportKind, ReportUploader, Transport, UploadOutcome};

/// The tick counter restarts from 1 after reaching this value.
pub const TICK_WRAP: u32 = 99_999;

/// Period of the base tick driving [`CycleScheduler::tick`].
pub const BASE_TICK: Duration = Duration::from_secs(1);

/// Base tick counter. Its value doubles as the cycle number in data reports.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickCounter {
    value: u32,
}

impl TickCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    #[must_use]
    pub const fn starting_at(value: u32) -> Self {
        Self { value }
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }

    /// Advances one tick and returns the new value.
    pub fn advance(&mut self) -> u32 {
        self.value = if self.value >= TICK_WRAP {
            1
        } else {
            self.value + 1
        };
        self.value
    }
}

/// Aggregate of one activation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleSummary {
    pub cycle: u32,
    pub polled: usize,
    pub success_count: usize,
    /// Counters after the bus rule has been applied.
    pub counters: FailureState,
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} ok {}/{} [{}]",
            self.cycle, self.success_count, self.polled, self.counters
        )
    }
}

/// Result of one base tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Not an activation tick.
    Idle,
    Completed(CycleSummary),
    /// Terminal. The caller must restart the process.
    Restart(RestartNotice),
}

/// Notification hooks invoked by the scheduler.
pub trait CycleObserver {
    fn on_tick(&mut self, _tick: u32) {}

    fn on_cycle_start(&mut self, _cycle: u32) {}

    fn on_slave_polled(&mut self, _slave: SlaveId, _result: &Result<MeterReading, PollError>) {}

    fn on_report(&mut self, _kind: ReportKind, _outcome: UploadOutcome) {}

    fn on_cycle_finished(&mut self, _summary: &CycleSummary) {}

    fn on_escalation(&mut self, _notice: &RestartNotice) {}
}

/// Observer that ignores every notification.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopObserver;

impl CycleObserver for NoopObserver {}

impl<T: CycleObserver + ?Sized> CycleObserver for &mut T {
    fn on_tick(&mut self, tick: u32) {
        (**self).on_tick(tick);
    }

    fn on_cycle_start(&mut self, cycle: u32) {
        (**self).on_cycle_start(cycle);
    }

    fn on_slave_polled(&mut self, slave: SlaveId, result: &Result<MeterReading, PollError>) {
        (**self).on_slave_polled(slave, result);
    }

    fn on_report(&mut self, kind: ReportKind, outcome: UploadOutcome) {
        (**self).on_report(kind, outcome);
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        (**self).on_cycle_finished(summary);
    }

    fn on_escalation(&mut self, notice: &RestartNotice) {
        (**self).on_escalation(notice);
    }
}

/// Fans notifications out to two observers, first then second.
impl<A: CycleObserver, B: CycleObserver> CycleObserver for (A, B) {
    fn on_tick(&mut self, tick: u32) {
        self.0.on_tick(tick);
        self.1.on_tick(tick);
    }

    fn on_cycle_start(&mut self, cycle: u32) {
        self.0.on_cycle_start(cycle);
        self.1.on_cycle_start(cycle);
    }

    fn on_slave_polled(&mut self, slave: SlaveId, result: &Result<MeterReading, PollError>) {
        self.0.on_slave_polled(slave, result);
        self.1.on_slave_polled(slave, result);
    }

    fn on_report(&mut self, kind: ReportKind, outcome: UploadOutcome) {
        self.0.on_report(kind, outcome);
        self.1.on_report(kind, outcome);
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        self.0.on_cycle_finished(summary);
        self.1.on_cycle_finished(summary);
    }

    fn on_escalation(&mut self, notice: &RestartNotice) {
        self.0.on_escalation(notice);
        self.1.on_escalation(notice);
    }
}

/// Owns the failure state and every collaborator of the sampling loop.
pub struct CycleScheduler<'a, D, L, T, P> {
    poller: MeterPoller<D>,
    uploader: ReportUploader<'a, L, T>,
    delay: P,
    tracker: FailureTracker,
    escalator: Escalator,
    state: FailureState,
    ticks: TickCounter,
    cycle_ticks: u32,
    slaves: Vec<SlaveId, MAX_SLAVES>,
    slave_gap: Duration,
    restart: Option<RestartNotice>,
}

impl<'a, D, L, T, P> CycleScheduler<'a, D, L, T, P>
where
    D: MeterDriver,
    L: NetworkLink,
    T: Transport,
    P: Delay,
{
    /// Builds a scheduler with fresh counters.
    ///
    /// `config` is expected to have passed [`AgentConfig::validate`]; a zero
    /// cycle period is treated as one.
    pub fn new(config: &AgentConfig<'a>, driver: D, link: L, transport: T, delay: P) -> Self {
        Self {
            poller: MeterPoller::new(driver, config.pacing.channel_gap),
            uploader: ReportUploader::new(
                link,
                transport,
                config.collector.data_path,
                config.collector.error_path,
            ),
            delay,
            tracker: FailureTracker::new(config.thresholds),
            escalator: Escalator::new(),
            state: FailureState::new(),
            ticks: TickCounter::new(),
            cycle_ticks: config.cycle_ticks.max(1),
            slaves: config.slaves.clone(),
            slave_gap: config.pacing.slave_gap,
            restart: None,
        }
    }

    /// Replaces the starting counters. Intended for host tooling and tests.
    #[must_use]
    pub fn with_state(mut self, state: FailureState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_ticks(mut self, ticks: TickCounter) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn state(&self) -> &FailureState {
        &self.state
    }

    pub fn ticks(&self) -> TickCounter {
        self.ticks
    }

    pub fn slaves(&self) -> &[SlaveId] {
        &self.slaves
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// The latched restart, if escalation already happened.
    pub fn pending_restart(&self) -> Option<&RestartNotice> {
        self.restart.as_ref()
    }

    pub fn driver(&self) -> &D {
        self.poller.driver()
    }

    pub fn driver_mut(&mut self) -> &mut D {
        self.poller.driver_mut()
    }

    pub fn uploader(&self) -> &ReportUploader<'a, L, T> {
        &self.uploader
    }

    pub fn uploader_mut(&mut self) -> &mut ReportUploader<'a, L, T> {
        &mut self.uploader
    }

    pub fn delay_mut(&mut self) -> &mut P {
        &mut self.delay
    }

    /// Handles one base tick.
    pub async fn tick<O>(&mut self, observer: &mut O) -> Outcome
    where
        O: CycleObserver,
    {
        if let Some(notice) = self.restart {
            return Outcome::Restart(notice);
        }

        let tick = self.ticks.advance();
        observer.on_tick(tick);
        if tick % self.cycle_ticks != 0 {
            return Outcome::Idle;
        }

        self.run_cycle(observer).await
    }

    /// Runs an activation immediately, numbered with the current tick value.
    pub async fn run_cycle<O>(&mut self, observer: &mut O) -> Outcome
    where
        O: CycleObserver,
    {
        if let Some(notice) = self.restart {
            return Outcome::Restart(notice);
        }

        let cycle = self.ticks.value();
        observer.on_cycle_start(cycle);

        let mut success_count = 0;
        for &slave in &self.slaves {
            let result = self.poller.poll(slave, &mut self.delay).await;
            observer.on_slave_polled(slave, &result);

            if let Ok(reading) = &result {
                success_count += 1;
                let outcome = self
                    .uploader
                    .upload_reading(reading, cycle, &mut self.state)
                    .await;
                observer.on_report(ReportKind::Data, outcome);
            }

            self.delay.delay(self.slave_gap).await;
        }

        self.tracker.record_cycle(&mut self.state, success_count);
        let summary = CycleSummary {
            cycle,
            polled: self.slaves.len(),
            success_count,
            counters: self.state,
        };
        observer.on_cycle_finished(&summary);

        let Some(breach) = self.tracker.check(&self.state) else {
            return Outcome::Completed(summary);
        };

        let notice = self
            .escalator
            .escalate(breach, &mut self.uploader, &mut self.state)
            .await;
        observer.on_report(ReportKind::Error, notice.report);
        observer.on_escalation(&notice);
        self.restart = Some(notice);
        Outcome::Restart(notice)
    }
}
