//! Agent configuration with the defaults the deployed meters expect.
//!
//! Everything here is fixed for the lifetime of a process: firmware builds it
//! once from compile-time overrides and the emulator from command-line flags.

use core::fmt;

use heapless::Vec;
use winnow::ascii::{digit1, hex_digit1, space0};
use winnow::combinator::{alt, delimited, preceded};
use winnow::prelude::*;

use crate::cycle::TICK_WRAP;
use crate::failure::{FailureDomain, Thresholds};
use crate::meter::SlaveId;
use crate::timing::Pacing;

/// Upper bound on meters sharing one bus.
pub const MAX_SLAVES: usize = 16;

/// Meters installed on the reference board.
pub const DEFAULT_SLAVES: [SlaveId; 4] = [
    SlaveId::new(0x01),
    SlaveId::new(0x65),
    SlaveId::new(0x66),
    SlaveId::new(0x67),
];

/// Base ticks (one second each) between cycle activations.
pub const DEFAULT_CYCLE_TICKS: u32 = 10;

pub const DEFAULT_COLLECTOR_HOST: &str = "collector.local";
pub const DEFAULT_COLLECTOR_PORT: u16 = 80;
pub const DEFAULT_DATA_PATH: &str = "/v1/gdb/payload/";
pub const DEFAULT_ERROR_PATH: &str = "/v1/gdb/errors/";

/// Errors produced while building or validating an [`AgentConfig`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    EmptySlaveList,
    TooManySlaves,
    DuplicateSlave(SlaveId),
    MalformedSlaveList,
    InvalidCycleTicks(u32),
    InvalidThreshold(FailureDomain),
    EmptyHost,
    InvalidPath,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptySlaveList => f.write_str("no slaves configured"),
            ConfigError::TooManySlaves => write!(f, "more than {MAX_SLAVES} slaves configured"),
            ConfigError::DuplicateSlave(slave) => write!(f, "slave {slave} listed twice"),
            ConfigError::MalformedSlaveList => f.write_str("malformed slave list"),
            ConfigError::InvalidCycleTicks(ticks) => {
                write!(f, "cycle period {ticks} outside 1..={TICK_WRAP}")
            }
            ConfigError::InvalidThreshold(domain) => write!(f, "{domain} threshold must be > 0"),
            ConfigError::EmptyHost => f.write_str("collector host is empty"),
            ConfigError::InvalidPath => f.write_str("collector paths must start with '/'"),
        }
    }
}

/// Where reports are delivered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CollectorEndpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub data_path: &'a str,
    pub error_path: &'a str,
}

impl<'a> CollectorEndpoint<'a> {
    #[must_use]
    pub const fn new(host: &'a str, port: u16) -> Self {
        Self {
            host,
            port,
            data_path: DEFAULT_DATA_PATH,
            error_path: DEFAULT_ERROR_PATH,
        }
    }

    #[must_use]
    pub const fn with_paths(mut self, data_path: &'a str, error_path: &'a str) -> Self {
        self.data_path = data_path;
        self.error_path = error_path;
        self
    }
}

impl Default for CollectorEndpoint<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECTOR_HOST, DEFAULT_COLLECTOR_PORT)
    }
}

/// Complete runtime configuration for one agent process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgentConfig<'a> {
    pub slaves: Vec<SlaveId, MAX_SLAVES>,
    pub cycle_ticks: u32,
    pub thresholds: Thresholds,
    pub pacing: Pacing,
    pub collector: CollectorEndpoint<'a>,
}

impl<'a> AgentConfig<'a> {
    /// Builds the reference configuration.
    #[must_use]
    pub fn new() -> Self {
        let mut slaves = Vec::new();
        for slave in DEFAULT_SLAVES {
            // DEFAULT_SLAVES is shorter than MAX_SLAVES.
            let _ = slaves.push(slave);
        }
        Self {
            slaves,
            cycle_ticks: DEFAULT_CYCLE_TICKS,
            thresholds: Thresholds::DEFAULT,
            pacing: Pacing::DEFAULT,
            collector: CollectorEndpoint::default(),
        }
    }

    /// Replaces the slave list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManySlaves`] when `slaves` exceeds [`MAX_SLAVES`].
    pub fn with_slaves(mut self, slaves: &[SlaveId]) -> Result<Self, ConfigError> {
        self.slaves = Vec::from_slice(slaves).map_err(|_| ConfigError::TooManySlaves)?;
        Ok(self)
    }

    /// Replaces the slave list with one parsed from text such as `"0x01,0x65,102"`.
    ///
    /// # Errors
    ///
    /// Propagates any [`parse_slave_list`] failure.
    pub fn with_slave_list(mut self, text: &str) -> Result<Self, ConfigError> {
        self.slaves = parse_slave_list(text)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_cycle_ticks(mut self, ticks: u32) -> Self {
        self.cycle_ticks = ticks;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_collector(mut self, collector: CollectorEndpoint<'a>) -> Self {
        self.collector = collector;
        self
    }

    /// Checks the invariants the scheduler relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slaves.is_empty() {
            return Err(ConfigError::EmptySlaveList);
        }
        for (index, slave) in self.slaves.iter().enumerate() {
            if self.slaves[..index].contains(slave) {
                return Err(ConfigError::DuplicateSlave(*slave));
            }
        }
        if self.cycle_ticks == 0 || self.cycle_ticks > TICK_WRAP {
            return Err(ConfigError::InvalidCycleTicks(self.cycle_ticks));
        }
        // A zero bus threshold is legal: it restarts after the first empty cycle.
        if self.thresholds.network == 0 {
            return Err(ConfigError::InvalidThreshold(FailureDomain::Network));
        }
        if self.thresholds.upload == 0 {
            return Err(ConfigError::InvalidThreshold(FailureDomain::Upload));
        }
        if self.collector.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if !self.collector.data_path.starts_with('/') || !self.collector.error_path.starts_with('/')
        {
            return Err(ConfigError::InvalidPath);
        }
        Ok(())
    }
}

impl Default for AgentConfig<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a comma-separated slave list.
///
/// Entries are hexadecimal with a `0x` prefix or plain decimal; whitespace
/// around entries is ignored.
///
/// # Errors
///
/// Returns [`ConfigError::MalformedSlaveList`] for unparsable entries or
/// addresses above 255, [`ConfigError::DuplicateSlave`] for repeats and
/// [`ConfigError::TooManySlaves`] past [`MAX_SLAVES`].
pub fn parse_slave_list(text: &str) -> Result<Vec<SlaveId, MAX_SLAVES>, ConfigError> {
    let mut input = text;
    let mut slaves = Vec::new();

    if input.trim().is_empty() {
        return Err(ConfigError::EmptySlaveList);
    }

    loop {
        let address = slave_address
            .parse_next(&mut input)
            .map_err(|_| ConfigError::MalformedSlaveList)?;
        let slave = SlaveId::new(address);
        if slaves.contains(&slave) {
            return Err(ConfigError::DuplicateSlave(slave));
        }
        slaves
            .push(slave)
            .map_err(|_| ConfigError::TooManySlaves)?;

        if input.is_empty() {
            return Ok(slaves);
        }
        input = input
            .strip_prefix(',')
            .ok_or(ConfigError::MalformedSlaveList)?;
    }
}

fn slave_address(input: &mut &str) -> ModalResult<u8> {
    delimited(space0, alt((hex_address, decimal_address)), space0).parse_next(input)
}

fn hex_address(input: &mut &str) -> ModalResult<u8> {
    preceded(alt(("0x", "0X")), hex_digit1)
        .try_map(|digits| u8::from_str_radix(digits, 16))
        .parse_next(input)
}

fn decimal_address(input: &mut &str) -> ModalResult<u8> {
    digit1.try_map(str::parse::<u8>).parse_next(input)
}
