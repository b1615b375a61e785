use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use embassy_futures::block_on;
use meter_core::config::AgentConfig;
use meter_core::cycle::{BASE_TICK, CycleObserver, CycleScheduler, CycleSummary, Outcome};
use meter_core::escalation::RestartNotice;
use meter_core::meter::{Channel, MeterDriver, MeterReading, PollError, SlaveId};
use meter_core::telemetry::TelemetryRecorder;
use meter_core::timing::Delay;
use meter_core::upload::{
    NetworkLink, ReportKind, Request, Response, StatusCode, Transport, TransportError,
    UploadOutcome,
};

/// Device identifier reported by the emulated agent.
pub const EMULATED_DEVICE_ID: &str = "02:00:00:00:EE:01";

const DEFAULT_RSSI: i8 = -55;
const NOMINAL_VOLTAGE: f32 = 230.0;
const NOMINAL_FREQUENCY: f32 = 50.0;
const POWER_FACTOR: f32 = 0.95;
const MAX_TICKS_PER_COMMAND: u32 = 1_000_000;
const DEFAULT_HISTORY: usize = 10;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "tick",
        "tick [count]                               - advance the base tick (default 1)",
    ),
    (
        "cycle",
        "cycle                                      - run an activation immediately",
    ),
    (
        "link",
        "link <up|down>                             - associate or drop the wireless link",
    ),
    (
        "meter",
        "meter <addr|all> <ok|no-current|offline>   - change how a meter answers",
    ),
    (
        "collector",
        "collector <status-code|refuse|drop|timeout> - change how the collector answers",
    ),
    (
        "status",
        "status                                     - show counters, link and devices",
    ),
    (
        "history",
        "history [count]                            - show recent agent events",
    ),
    (
        "help",
        "help [topic]                               - show help for a command",
    ),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Healthy,
    BusFault,
    LinkOutage,
    UploadFailure,
}

impl TranscriptProfile {
    pub const ALL: [TranscriptProfile; 4] = [
        TranscriptProfile::Healthy,
        TranscriptProfile::BusFault,
        TranscriptProfile::LinkOutage,
        TranscriptProfile::UploadFailure,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            TranscriptProfile::Healthy => "healthy",
            TranscriptProfile::BusFault => "bus-fault",
            TranscriptProfile::LinkOutage => "link-outage",
            TranscriptProfile::UploadFailure => "upload-failure",
        }
    }

    pub fn log_path(self) -> String {
        format!("evidence/emulator-{}.log", self.tag())
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Healthy => "Meter agent emulator transcript (healthy bus)",
            TranscriptProfile::BusFault => "Meter agent emulator transcript (bus fault)",
            TranscriptProfile::LinkOutage => "Meter agent emulator transcript (link outage)",
            TranscriptProfile::UploadFailure => "Meter agent emulator transcript (upload failure)",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| format!("Unknown transcript profile `{tag}`"))
    }
}

/// How a simulated meter answers requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeterBehavior {
    Healthy,
    /// Voltage answers, every other channel times out.
    NoCurrent,
    Offline,
}

impl MeterBehavior {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "ok" | "healthy" => Some(Self::Healthy),
            "no-current" => Some(Self::NoCurrent),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MeterBehavior::Healthy => "ok",
            MeterBehavior::NoCurrent => "no-current",
            MeterBehavior::Offline => "offline",
        }
    }
}

#[derive(Clone, Debug)]
struct SimMeter {
    behavior: MeterBehavior,
    current: f32,
    energy_kwh: f32,
}

impl SimMeter {
    fn read(&mut self, channel: Channel) -> f32 {
        match (self.behavior, channel) {
            (MeterBehavior::Offline, _) => f32::NAN,
            (MeterBehavior::NoCurrent, Channel::Voltage) => NOMINAL_VOLTAGE,
            (MeterBehavior::NoCurrent, _) => f32::NAN,
            (MeterBehavior::Healthy, channel) => self.healthy_value(channel),
        }
    }

    fn power(&self) -> f32 {
        NOMINAL_VOLTAGE * self.current * POWER_FACTOR
    }

    fn healthy_value(&mut self, channel: Channel) -> f32 {
        match channel {
            Channel::Voltage => {
                // One poll per cycle; book roughly ten seconds of consumption.
                self.energy_kwh += self.power() / 360_000.0;
                NOMINAL_VOLTAGE
            }
            Channel::Current => self.current,
            Channel::ActivePower => self.power(),
            Channel::Frequency => NOMINAL_FREQUENCY,
            Channel::TotalActiveEnergy | Channel::ImportActiveEnergy => self.energy_kwh,
            Channel::ExportActiveEnergy => 0.0,
            Channel::PowerFactor => POWER_FACTOR,
        }
    }
}

/// Simulated RS-485 bus. Unknown addresses never answer.
#[derive(Clone, Debug, Default)]
pub struct SimBus {
    meters: BTreeMap<SlaveId, SimMeter>,
    requests: u64,
}

impl SimBus {
    pub fn with_meters(slaves: &[SlaveId]) -> Self {
        let mut bus = Self::default();
        for (index, slave) in slaves.iter().enumerate() {
            let step = u16::try_from(index).unwrap_or(u16::MAX);
            bus.meters.insert(
                *slave,
                SimMeter {
                    behavior: MeterBehavior::Healthy,
                    current: 0.5 + f32::from(step) * 0.25,
                    energy_kwh: 0.0,
                },
            );
        }
        bus
    }

    /// Applies `behavior` to `slave`, or to every meter when `slave` is `None`.
    /// Returns `false` when the address is not on the bus.
    pub fn set_behavior(&mut self, slave: Option<SlaveId>, behavior: MeterBehavior) -> bool {
        match slave {
            Some(slave) => match self.meters.get_mut(&slave) {
                Some(meter) => {
                    meter.behavior = behavior;
                    true
                }
                None => false,
            },
            None => {
                for meter in self.meters.values_mut() {
                    meter.behavior = behavior;
                }
                true
            }
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }
}

impl MeterDriver for SimBus {
    async fn read_channel(&mut self, channel: Channel, slave: SlaveId) -> f32 {
        self.requests += 1;
        self.meters
            .get_mut(&slave)
            .map_or(f32::NAN, |meter| meter.read(channel))
    }
}

#[derive(Clone, Debug)]
pub struct SimLink {
    connected: bool,
    rssi: i8,
}

impl SimLink {
    pub fn new() -> Self {
        Self {
            connected: true,
            rssi: DEFAULT_RSSI,
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkLink for SimLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn device_id(&self) -> &str {
        EMULATED_DEVICE_ID
    }

    fn rssi(&self) -> Option<i8> {
        self.connected.then_some(self.rssi)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollectorMode {
    Answer(StatusCode),
    /// Connection refused before anything is sent.
    Refuse,
    /// Connection dropped after the request went out.
    Drop,
    Timeout,
}

impl CollectorMode {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "refuse" => Some(Self::Refuse),
            "drop" => Some(Self::Drop),
            "timeout" => Some(Self::Timeout),
            code => code
                .parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .map(|code| Self::Answer(StatusCode::new(code))),
        }
    }

    fn describe(self) -> String {
        match self {
            CollectorMode::Answer(status) => format!("answers {status}"),
            CollectorMode::Refuse => "refuses connections".to_string(),
            CollectorMode::Drop => "drops connections".to_string(),
            CollectorMode::Timeout => "times out".to_string(),
        }
    }
}

/// Simulated collector recording every request target it sees.
#[derive(Clone, Debug)]
pub struct SimCollector {
    mode: CollectorMode,
    targets: Vec<String>,
}

impl SimCollector {
    pub fn new() -> Self {
        Self {
            mode: CollectorMode::Answer(StatusCode::OK),
            targets: Vec::new(),
        }
    }

    pub fn set_mode(&mut self, mode: CollectorMode) {
        self.mode = mode;
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl Default for SimCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimCollector {
    async fn request(&mut self, request: &Request<'_>) -> Result<Response, TransportError> {
        if self.mode == CollectorMode::Refuse {
            return Err(TransportError::Connect);
        }
        self.targets.push(request.target.to_string());
        match self.mode {
            CollectorMode::Answer(status) => Ok(Response { status }),
            CollectorMode::Drop | CollectorMode::Refuse => Err(TransportError::Io),
            CollectorMode::Timeout => Err(TransportError::Timeout),
        }
    }
}

/// Simulated time. Pauses complete immediately and are accumulated.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    elapsed: Duration,
}

impl SimClock {
    fn advance(&mut self, duration: Duration) {
        self.elapsed += duration;
    }
}

impl Delay for SimClock {
    async fn delay(&mut self, duration: Duration) {
        self.advance(duration);
    }
}

type Agent = CycleScheduler<'static, SimBus, SimLink, SimCollector, SimClock>;

/// Renders scheduler events as console lines.
#[derive(Default)]
struct Narrator {
    lines: Vec<String>,
}

impl CycleObserver for Narrator {
    fn on_cycle_start(&mut self, cycle: u32) {
        self.lines.push(format!("cycle {cycle} start"));
    }

    fn on_slave_polled(&mut self, slave: SlaveId, result: &Result<MeterReading, PollError>) {
        let line = match result {
            Ok(reading) => format!(
                "  slave {slave} ok {:.2} V {:.2} A {:.2} W",
                reading.voltage, reading.current, reading.active_power
            ),
            Err(err) => format!("  slave {slave} {err}"),
        };
        self.lines.push(line);
    }

    fn on_report(&mut self, kind: ReportKind, outcome: UploadOutcome) {
        self.lines.push(format!("  {kind} report {outcome}"));
    }

    fn on_cycle_finished(&mut self, summary: &CycleSummary) {
        self.lines.push(format!("{summary}"));
    }

    fn on_escalation(&mut self, notice: &RestartNotice) {
        self.lines.push(format!("ESCALATE {notice}"));
    }
}

pub struct Session {
    config: AgentConfig<'static>,
    agent: Agent,
    telemetry: TelemetryRecorder,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    boots: u32,
}

impl Session {
    /// Starts a session that writes its transcript to `profile.log_path()`.
    pub fn new(profile: TranscriptProfile, config: AgentConfig<'static>) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        Ok(Self::build(config, Some(transcript)))
    }

    /// Starts a session without a transcript.
    pub fn detached(config: AgentConfig<'static>) -> Self {
        Self::build(config, None)
    }

    fn build(config: AgentConfig<'static>, transcript: Option<TranscriptLogger>) -> Self {
        let agent = CycleScheduler::new(
            &config,
            SimBus::with_meters(&config.slaves),
            SimLink::new(),
            SimCollector::new(),
            SimClock::default(),
        );
        Self {
            config,
            agent,
            telemetry: TelemetryRecorder::new(),
            transcript,
            started_at: HostInstant::now(),
            boots: 1,
        }
    }

    pub fn boots(&self) -> u32 {
        self.boots
    }

    pub fn counters(&self) -> (u16, u16, u16) {
        let state = self.agent.state();
        (
            state.bus_errors(),
            state.network_errors(),
            state.upload_errors(),
        )
    }

    pub fn collector_targets(&self) -> &[String] {
        self.agent.uploader().transport().targets()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut words = trimmed.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let lines = match command.as_str() {
            "help" => handle_help(args.first().copied()),
            "tick" => self.handle_tick(&args),
            "cycle" => self.handle_cycle(),
            "link" => self.handle_link(&args),
            "meter" => self.handle_meter(&args),
            "collector" => self.handle_collector(&args),
            "status" => self.handle_status(),
            "history" => self.handle_history(&args),
            other => vec![format!("ERR unknown command `{other}` (try `help`)")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn handle_tick(&mut self, args: &[&str]) -> Vec<String> {
        let count = match args.first() {
            None => 1,
            Some(raw) => match raw.parse::<u32>() {
                Ok(count) if (1..=MAX_TICKS_PER_COMMAND).contains(&count) => count,
                _ => return vec![format!("ERR syntax tick count `{raw}`")],
            },
        };

        let mut narrator = Narrator::default();
        for _ in 0..count {
            self.agent.delay_mut().advance(BASE_TICK);
            let outcome = block_on(
                self.agent
                    .tick(&mut (&mut narrator, &mut self.telemetry)),
            );
            if matches!(outcome, Outcome::Restart(_)) {
                let line = self.reboot();
                narrator.lines.push(line);
                break;
            }
        }

        narrator.lines.push(format!(
            "OK tick={} {}",
            self.agent.ticks().value(),
            self.agent.state()
        ));
        narrator.lines
    }

    fn handle_cycle(&mut self) -> Vec<String> {
        let mut narrator = Narrator::default();
        let outcome = block_on(
            self.agent
                .run_cycle(&mut (&mut narrator, &mut self.telemetry)),
        );
        if matches!(outcome, Outcome::Restart(_)) {
            let line = self.reboot();
            narrator.lines.push(line);
        }
        narrator.lines
    }

    /// Simulates the device reset: fresh counters and tick, same surroundings.
    fn reboot(&mut self) -> String {
        let bus = self.agent.driver().clone();
        let link = self.agent.uploader().link().clone();
        let collector = self.agent.uploader().transport().clone();
        let clock = self.agent.delay_mut().clone();

        self.agent = CycleScheduler::new(&self.config, bus, link, collector, clock);
        self.boots += 1;
        format!("RESTART boot={} counters cleared", self.boots)
    }

    fn handle_link(&mut self, args: &[&str]) -> Vec<String> {
        let connected = match args.first().map(|arg| arg.to_ascii_lowercase()) {
            Some(state) if state == "up" => true,
            Some(state) if state == "down" => false,
            _ => return vec!["ERR syntax link <up|down>".to_string()],
        };
        self.agent
            .uploader_mut()
            .link_mut()
            .set_connected(connected);
        vec![format!("OK link {}", if connected { "up" } else { "down" })]
    }

    fn handle_meter(&mut self, args: &[&str]) -> Vec<String> {
        let [target, behavior] = args else {
            return vec!["ERR syntax meter <addr|all> <ok|no-current|offline>".to_string()];
        };
        let Some(behavior) = MeterBehavior::from_tag(behavior) else {
            return vec![format!("ERR syntax meter behavior `{behavior}`")];
        };
        let slave = if target.eq_ignore_ascii_case("all") {
            None
        } else {
            match parse_address(target) {
                Some(address) => Some(SlaveId::new(address)),
                None => return vec![format!("ERR syntax meter address `{target}`")],
            }
        };

        if !self.agent.driver_mut().set_behavior(slave, behavior) {
            return vec![format!("ERR meter {target} is not on the bus")];
        }
        match slave {
            Some(slave) => vec![format!("OK meter {slave} {}", behavior.label())],
            None => vec![format!("OK meter all {}", behavior.label())],
        }
    }

    fn handle_collector(&mut self, args: &[&str]) -> Vec<String> {
        let Some(mode) = args.first().and_then(|tag| CollectorMode::from_tag(tag)) else {
            return vec![
                "ERR syntax collector <status-code|refuse|drop|timeout>".to_string(),
            ];
        };
        self.agent.uploader_mut().transport_mut().set_mode(mode);
        vec![format!("OK collector {}", mode.describe())]
    }

    fn handle_status(&mut self) -> Vec<String> {
        let uptime = self.agent.delay_mut().elapsed;
        let thresholds = self.agent.tracker().thresholds();
        let link = self.agent.uploader().link();
        let collector = self.agent.uploader().transport();

        let mut lines = vec![
            format!(
                "boot={} tick={} uptime={:.1}s",
                self.boots,
                self.agent.ticks().value(),
                uptime.as_secs_f64()
            ),
            format!(
                "counters {} limits bus>{} network>={} upload>={}",
                self.agent.state(),
                thresholds.bus,
                thresholds.network,
                thresholds.upload
            ),
            match link.rssi() {
                Some(rssi) => format!("link up rssi={rssi}dBm device={}", link.device_id()),
                None => format!("link down device={}", link.device_id()),
            },
            format!(
                "collector {} requests={}",
                collector.mode.describe(),
                collector.targets().len()
            ),
        ];

        let bus = self.agent.driver();
        for (slave, meter) in &bus.meters {
            lines.push(format!(
                "meter {slave} {} energy={:.4}kWh",
                meter.behavior.label(),
                meter.energy_kwh
            ));
        }
        lines.push(format!("bus requests={}", bus.requests()));
        lines
    }

    fn handle_history(&self, args: &[&str]) -> Vec<String> {
        let count = match args.first() {
            None => DEFAULT_HISTORY,
            Some(raw) => match raw.parse::<usize>() {
                Ok(count) if count > 0 => count,
                _ => return vec![format!("ERR syntax history count `{raw}`")],
            },
        };

        if self.telemetry.is_empty() {
            return vec!["history empty".to_string()];
        }
        let skip = self.telemetry.len().saturating_sub(count);
        self.telemetry
            .oldest_first()
            .skip(skip)
            .map(|record| format!("#{} tick={} {}", record.id, record.tick, record.event))
            .collect()
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_address(text: &str) -> Option<u8> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let log_path = profile.log_path();
        let path = Path::new(&log_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
