#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Build-time deployment settings.
//!
//! Credentials and site-specific values are baked in from environment
//! variables at compile time (`METER_WIFI_SSID`, `METER_COLLECTOR_HOST`, ...).
//! Anything left unset falls back to the `meter-core` defaults.

use core::fmt;

use meter_core::config::{
    AgentConfig, CollectorEndpoint, ConfigError, DEFAULT_COLLECTOR_HOST, DEFAULT_COLLECTOR_PORT,
};

pub const WIFI_SSID: &str = or_empty(option_env!("METER_WIFI_SSID"));
pub const WIFI_PASS: &str = or_empty(option_env!("METER_WIFI_PASS"));

/// Overrides captured from the build environment.
pub const BUILD_OVERRIDES: Overrides<'static> = Overrides {
    collector_host: option_env!("METER_COLLECTOR_HOST"),
    collector_port: option_env!("METER_COLLECTOR_PORT"),
    slaves: option_env!("METER_SLAVES"),
    cycle_ticks: option_env!("METER_CYCLE_TICKS"),
};

const fn or_empty(value: Option<&'static str>) -> &'static str {
    match value {
        Some(value) => value,
        None => "",
    }
}

/// Raw override text, parsed by [`Overrides::apply`].
#[derive(Copy, Clone, Debug, Default)]
pub struct Overrides<'a> {
    pub collector_host: Option<&'a str>,
    pub collector_port: Option<&'a str>,
    /// Comma-separated list, e.g. `0x01,0x65`.
    pub slaves: Option<&'a str>,
    pub cycle_ticks: Option<&'a str>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum BuildConfigError {
    Agent(ConfigError),
    InvalidPort,
    InvalidCycleTicks,
}

impl From<ConfigError> for BuildConfigError {
    fn from(err: ConfigError) -> Self {
        BuildConfigError::Agent(err)
    }
}

impl fmt::Display for BuildConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildConfigError::Agent(err) => write!(f, "{err}"),
            BuildConfigError::InvalidPort => f.write_str("METER_COLLECTOR_PORT is not a port"),
            BuildConfigError::InvalidCycleTicks => {
                f.write_str("METER_CYCLE_TICKS is not a number")
            }
        }
    }
}

impl<'a> Overrides<'a> {
    /// Layers the overrides on top of the defaults and validates the result.
    ///
    /// # Errors
    ///
    /// Returns the first override that fails to parse or the first rule the
    /// combined configuration violates.
    pub fn apply(&self) -> Result<AgentConfig<'a>, BuildConfigError> {
        let mut config = AgentConfig::new();

        if let Some(list) = self.slaves {
            config = config.with_slave_list(list)?;
        }
        if let Some(ticks) = self.cycle_ticks {
            let ticks = ticks
                .trim()
                .parse()
                .map_err(|_| BuildConfigError::InvalidCycleTicks)?;
            config = config.with_cycle_ticks(ticks);
        }

        let port = match self.collector_port {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| BuildConfigError::InvalidPort)?,
            None => DEFAULT_COLLECTOR_PORT,
        };
        let host = self.collector_host.unwrap_or(DEFAULT_COLLECTOR_HOST);
        config = config.with_collector(CollectorEndpoint::new(host, port));

        config.validate()?;
        Ok(config)
    }
}
