//! Cycle side effects: the status LED and the defmt log.

use defmt::{error, info, warn};
use esp_hal::gpio::Output;
use meter_core::cycle::{CycleObserver, CycleSummary};
use meter_core::escalation::RestartNotice;
use meter_core::meter::{MeterReading, PollError, SlaveId};
use meter_core::upload::{ReportKind, UploadOutcome};

/// Active-low status LED.
///
/// Blinks on at the start of every cycle and stays on after a cycle in which
/// no meter answered.
pub struct StatusLed<'d> {
    led: Output<'d>,
    blinking: bool,
}

impl<'d> StatusLed<'d> {
    pub fn new(mut led: Output<'d>) -> Self {
        led.set_high();
        Self {
            led,
            blinking: false,
        }
    }
}

impl CycleObserver for StatusLed<'_> {
    fn on_cycle_start(&mut self, _cycle: u32) {
        self.led.set_low();
        self.blinking = true;
    }

    fn on_slave_polled(&mut self, _slave: SlaveId, _result: &Result<MeterReading, PollError>) {
        if self.blinking {
            self.led.set_high();
            self.blinking = false;
        }
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        self.blinking = false;
        if summary.success_count == 0 {
            self.led.set_low();
        } else {
            self.led.set_high();
        }
    }
}

/// Mirrors scheduler events to defmt.
pub struct LogObserver;

impl CycleObserver for LogObserver {
    fn on_cycle_start(&mut self, cycle: u32) {
        info!("cycle {}: start", cycle);
    }

    fn on_slave_polled(&mut self, slave: SlaveId, result: &Result<MeterReading, PollError>) {
        match result {
            Ok(reading) => info!(
                "slave {}: {} V {} A {} W",
                slave.address(),
                reading.voltage,
                reading.current,
                reading.active_power
            ),
            Err(err) => warn!("slave {}: {}", slave.address(), err),
        }
    }

    fn on_report(&mut self, kind: ReportKind, outcome: UploadOutcome) {
        if outcome.is_delivered() {
            info!("{} report: {}", kind, outcome);
        } else {
            warn!("{} report: {}", kind, outcome);
        }
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        info!(
            "cycle {}: {}/{} ok, {}",
            summary.cycle, summary.success_count, summary.polled, summary.counters
        );
    }

    fn on_escalation(&mut self, notice: &RestartNotice) {
        error!("escalating: {}", notice);
    }
}
