#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use meter_core::cycle::{CycleObserver, CycleSummary};
use meter_core::escalation::RestartNotice;
use meter_core::meter::{Channel, MeterDriver, MeterReading, PollError, SlaveId};
use meter_core::timing::Delay;
use meter_core::upload::{
    NetworkLink, ReportKind, Request, Response, StatusCode, Transport, TransportError,
    UploadOutcome,
};

/// How a simulated meter answers.
#[derive(Copy, Clone, Debug)]
pub enum MeterBehavior {
    Healthy { voltage: f32, current: f32 },
    NoCurrent,
    Offline,
}

#[derive(Default)]
pub struct MockBus {
    meters: HashMap<u8, MeterBehavior>,
    pub reads: Vec<(SlaveId, Channel)>,
}

impl MockBus {
    pub fn with(mut self, slave: u8, behavior: MeterBehavior) -> Self {
        self.meters.insert(slave, behavior);
        self
    }

    pub fn reads_for(&self, slave: u8) -> Vec<Channel> {
        self.reads
            .iter()
            .filter(|(id, _)| id.address() == slave)
            .map(|(_, channel)| *channel)
            .collect()
    }
}

impl MeterDriver for MockBus {
    async fn read_channel(&mut self, channel: Channel, slave: SlaveId) -> f32 {
        self.reads.push((slave, channel));
        match self.meters.get(&slave.address()) {
            Some(MeterBehavior::Healthy { voltage, current }) => match channel {
                Channel::Voltage => *voltage,
                Channel::Current => *current,
                Channel::Frequency => 50.0,
                Channel::PowerFactor => 0.97,
                _ => voltage * current,
            },
            Some(MeterBehavior::NoCurrent) => match channel {
                Channel::Voltage => 230.0,
                _ => f32::NAN,
            },
            Some(MeterBehavior::Offline) | None => f32::NAN,
        }
    }
}

pub struct MockLink {
    pub connected: bool,
    pub rssi: Option<i8>,
}

impl MockLink {
    pub fn up() -> Self {
        Self {
            connected: true,
            rssi: Some(-58),
        }
    }

    pub fn down() -> Self {
        Self {
            connected: false,
            rssi: None,
        }
    }
}

impl NetworkLink for MockLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn device_id(&self) -> &str {
        "EM-0A1B2C3D"
    }

    fn rssi(&self) -> Option<i8> {
        self.rssi
    }
}

/// Replies from a queue, falling back to a default once it runs dry.
pub struct MockCollector {
    queued: VecDeque<Result<Response, TransportError>>,
    fallback: Result<Response, TransportError>,
    pub targets: Vec<String>,
}

impl MockCollector {
    pub fn answering(code: u16) -> Self {
        Self::failing_with(Ok(Response {
            status: StatusCode::new(code),
        }))
    }

    pub fn failing_with(result: Result<Response, TransportError>) -> Self {
        Self {
            queued: VecDeque::new(),
            fallback: result,
            targets: Vec::new(),
        }
    }

    pub fn then(mut self, result: Result<Response, TransportError>) -> Self {
        self.queued.push_back(result);
        self
    }

    pub fn data_requests(&self) -> usize {
        self.targets
            .iter()
            .filter(|target| target.starts_with("/v1/gdb/payload/"))
            .count()
    }

    pub fn error_requests(&self) -> usize {
        self.targets
            .iter()
            .filter(|target| target.starts_with("/v1/gdb/errors/"))
            .count()
    }
}

impl Transport for MockCollector {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        self.targets.push(request.target.to_owned());
        self.queued.pop_front().unwrap_or(self.fallback)
    }
}

#[derive(Default)]
pub struct RecordingDelay {
    pub pauses: Vec<Duration>,
}

impl Delay for RecordingDelay {
    async fn delay(&mut self, duration: Duration) {
        self.pauses.push(duration);
    }
}

#[derive(Debug, PartialEq)]
pub enum Seen {
    CycleStart(u32),
    Polled(SlaveId, bool),
    Report(ReportKind, UploadOutcome),
    CycleEnd(CycleSummary),
    Escalated(RestartNotice),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub ticks: Vec<u32>,
    pub seen: Vec<Seen>,
}

impl RecordingObserver {
    pub fn reports(&self, kind: ReportKind) -> Vec<UploadOutcome> {
        self.seen
            .iter()
            .filter_map(|event| match event {
                Seen::Report(k, outcome) if *k == kind => Some(*outcome),
                _ => None,
            })
            .collect()
    }
}

impl CycleObserver for RecordingObserver {
    fn on_tick(&mut self, tick: u32) {
        self.ticks.push(tick);
    }

    fn on_cycle_start(&mut self, cycle: u32) {
        self.seen.push(Seen::CycleStart(cycle));
    }

    fn on_slave_polled(&mut self, slave: SlaveId, result: &Result<MeterReading, PollError>) {
        self.seen.push(Seen::Polled(slave, result.is_ok()));
    }

    fn on_report(&mut self, kind: ReportKind, outcome: UploadOutcome) {
        self.seen.push(Seen::Report(kind, outcome));
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        self.seen.push(Seen::CycleEnd(*summary));
    }

    fn on_escalation(&mut self, notice: &RestartNotice) {
        self.seen.push(Seen::Escalated(*notice));
    }
}
