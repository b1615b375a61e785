//! Failure counting across the bus, network and upload domains.
//!
//! [`FailureState`] is plain data owned by the scheduler. Each transition
//! below corresponds to one observable event in the sampling loop; the
//! [`FailureTracker`] applies the per-cycle bus rule and evaluates the
//! restart thresholds.

use core::fmt;

/// Independent failure domains.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureDomain {
    Bus,
    Network,
    Upload,
}

impl FailureDomain {
    pub const ALL: [FailureDomain; 3] = [
        FailureDomain::Bus,
        FailureDomain::Network,
        FailureDomain::Upload,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FailureDomain::Bus => "bus",
            FailureDomain::Network => "network",
            FailureDomain::Upload => "upload",
        }
    }
}

impl fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-domain restart limits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Thresholds {
    pub bus: u16,
    pub network: u16,
    pub upload: u16,
}

impl Thresholds {
    pub const DEFAULT: Self = Self::new(30, 10, 6);

    #[must_use]
    pub const fn new(bus: u16, network: u16, upload: u16) -> Self {
        Self {
            bus,
            network,
            upload,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Consecutive-failure counters. Saturating; never persisted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FailureState {
    bus_errors: u16,
    network_errors: u16,
    upload_errors: u16,
}

impl FailureState {
    /// Fresh counters, as after a restart.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bus_errors: 0,
            network_errors: 0,
            upload_errors: 0,
        }
    }

    /// Starts from explicit counter values.
    #[must_use]
    pub const fn from_counts(bus_errors: u16, network_errors: u16, upload_errors: u16) -> Self {
        Self {
            bus_errors,
            network_errors,
            upload_errors,
        }
    }

    #[must_use]
    pub const fn bus_errors(&self) -> u16 {
        self.bus_errors
    }

    #[must_use]
    pub const fn network_errors(&self) -> u16 {
        self.network_errors
    }

    #[must_use]
    pub const fn upload_errors(&self) -> u16 {
        self.upload_errors
    }

    #[must_use]
    pub const fn count(&self, domain: FailureDomain) -> u16 {
        match domain {
            FailureDomain::Bus => self.bus_errors,
            FailureDomain::Network => self.network_errors,
            FailureDomain::Upload => self.upload_errors,
        }
    }

    /// An upload or error report is about to be attempted.
    pub fn attempt_started(&mut self) {
        self.network_errors = self.network_errors.saturating_add(1);
    }

    /// The attempt reached the collector: a response arrived, or the
    /// connection opened and failed afterwards.
    pub fn attempt_completed(&mut self) {
        self.network_errors = 0;
    }

    /// The collector accepted a report.
    pub fn delivered(&mut self) {
        self.upload_errors = 0;
    }

    /// The error-report path was entered. Counted whether or not the report
    /// can actually be sent.
    pub fn error_report_invoked(&mut self) {
        self.upload_errors = self.upload_errors.saturating_add(1);
    }
}

impl fmt::Display for FailureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus={} network={} upload={}",
            self.bus_errors, self.network_errors, self.upload_errors
        )
    }
}

/// Set of domains that crossed their threshold.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Breach {
    pub bus: bool,
    pub network: bool,
    pub upload: bool,
}

impl Breach {
    #[must_use]
    pub const fn any(self) -> bool {
        self.bus || self.network || self.upload
    }

    #[must_use]
    pub const fn contains(self, domain: FailureDomain) -> bool {
        match domain {
            FailureDomain::Bus => self.bus,
            FailureDomain::Network => self.network,
            FailureDomain::Upload => self.upload,
        }
    }

    /// Domains in the breach, in bus, network, upload order.
    pub fn domains(self) -> impl Iterator<Item = FailureDomain> {
        FailureDomain::ALL
            .into_iter()
            .filter(move |domain| self.contains(*domain))
    }
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, domain) in self.domains().enumerate() {
            if index > 0 {
                f.write_str("+")?;
            }
            f.write_str(domain.label())?;
        }
        Ok(())
    }
}

/// Applies the cycle rule and the threshold check.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FailureTracker {
    thresholds: Thresholds,
}

impl FailureTracker {
    #[must_use]
    pub const fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Updates the bus counter once every slave has been polled.
    pub fn record_cycle(&self, state: &mut FailureState, success_count: usize) {
        if success_count == 0 {
            state.bus_errors = state.bus_errors.saturating_add(1);
        } else {
            state.bus_errors = 0;
        }
    }

    /// Returns the crossed domains, if any.
    ///
    /// Network and upload trip at their threshold; the bus must exceed it.
    #[must_use]
    pub fn check(&self, state: &FailureState) -> Option<Breach> {
        let breach = Breach {
            bus: state.bus_errors > self.thresholds.bus,
            network: state.network_errors >= self.thresholds.network,
            upload: state.upload_errors >= self.thresholds.upload,
        };
        breach.any().then_some(breach)
    }
}
