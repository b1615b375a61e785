//! Meter data model and the per-slave polling sequence.
//!
//! A poll always reads voltage and current first. When either comes back as
//! NaN the meter is treated as absent and the remaining channels are skipped;
//! otherwise the six trailing channels are read in a fixed order without any
//! further validity checks.

pub mod sdm;

use core::fmt;
use core::time::Duration;

use crate::timing::Delay;

/// Modbus address of a meter on the shared bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveId(u8);

impl SlaveId {
    #[must_use]
    pub const fn new(address: u8) -> Self {
        Self(address)
    }

    #[must_use]
    pub const fn address(self) -> u8 {
        self.0
    }
}

impl From<u8> for SlaveId {
    fn from(address: u8) -> Self {
        Self(address)
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Measurement channels exposed by the meters, in poll order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Voltage,
    Current,
    ActivePower,
    Frequency,
    TotalActiveEnergy,
    ImportActiveEnergy,
    ExportActiveEnergy,
    PowerFactor,
}

impl Channel {
    /// Every channel in the order a full poll reads them.
    pub const ALL: [Channel; 8] = [
        Channel::Voltage,
        Channel::Current,
        Channel::ActivePower,
        Channel::Frequency,
        Channel::TotalActiveEnergy,
        Channel::ImportActiveEnergy,
        Channel::ExportActiveEnergy,
        Channel::PowerFactor,
    ];

    /// Channels read only after voltage and current proved numeric.
    pub const TRAILING: [Channel; 6] = [
        Channel::ActivePower,
        Channel::Frequency,
        Channel::TotalActiveEnergy,
        Channel::ImportActiveEnergy,
        Channel::ExportActiveEnergy,
        Channel::PowerFactor,
    ];

    /// SDM230 input register holding the channel's float value.
    #[must_use]
    pub const fn register(self) -> u16 {
        match self {
            Channel::Voltage => 0x0000,
            Channel::Current => 0x0006,
            Channel::ActivePower => 0x000C,
            Channel::PowerFactor => 0x001E,
            Channel::Frequency => 0x0046,
            Channel::ImportActiveEnergy => 0x0048,
            Channel::ExportActiveEnergy => 0x004A,
            Channel::TotalActiveEnergy => 0x0156,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Channel::Voltage => "voltage",
            Channel::Current => "current",
            Channel::ActivePower => "active-power",
            Channel::Frequency => "frequency",
            Channel::TotalActiveEnergy => "total-energy",
            Channel::ImportActiveEnergy => "import-energy",
            Channel::ExportActiveEnergy => "export-energy",
            Channel::PowerFactor => "power-factor",
        }
    }

    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Channel::Voltage => "V",
            Channel::Current => "A",
            Channel::ActivePower => "W",
            Channel::Frequency => "Hz",
            Channel::TotalActiveEnergy
            | Channel::ImportActiveEnergy
            | Channel::ExportActiveEnergy => "kWh",
            Channel::PowerFactor => "",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Values captured from one meter during a valid poll.
///
/// Only voltage and current are guaranteed numeric; trailing channels carry
/// whatever the driver returned, NaN included.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeterReading {
    pub slave: SlaveId,
    pub voltage: f32,
    pub current: f32,
    pub active_power: f32,
    pub frequency: f32,
    pub total_active_energy: f32,
    pub import_active_energy: f32,
    pub export_active_energy: f32,
    pub power_factor: f32,
}

impl MeterReading {
    /// Returns the value captured for `channel`.
    #[must_use]
    pub const fn value(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Current => self.current,
            Channel::ActivePower => self.active_power,
            Channel::Frequency => self.frequency,
            Channel::TotalActiveEnergy => self.total_active_energy,
            Channel::ImportActiveEnergy => self.import_active_energy,
            Channel::ExportActiveEnergy => self.export_active_energy,
            Channel::PowerFactor => self.power_factor,
        }
    }
}

/// Reasons a poll produced no reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollError {
    /// Voltage or current came back as NaN; the meter is considered absent.
    Invalid {
        voltage_missing: bool,
        current_missing: bool,
    },
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Invalid {
                voltage_missing: true,
                current_missing: true,
            } => f.write_str("voltage and current missing"),
            PollError::Invalid {
                voltage_missing: true,
                ..
            } => f.write_str("voltage missing"),
            PollError::Invalid { .. } => f.write_str("current missing"),
        }
    }
}

/// Reads single channels from a meter on the bus.
///
/// Implementations report any failure (timeout, CRC, exception) as NaN; the
/// poller decides what that means.
#[allow(async_fn_in_trait)]
pub trait MeterDriver {
    async fn read_channel(&mut self, channel: Channel, slave: SlaveId) -> f32;
}

impl<T: MeterDriver + ?Sized> MeterDriver for &mut T {
    async fn read_channel(&mut self, channel: Channel, slave: SlaveId) -> f32 {
        (**self).read_channel(channel, slave).await
    }
}

/// Runs the channel sequence for a single slave.
pub struct MeterPoller<D> {
    driver: D,
    channel_gap: Duration,
}

impl<D> MeterPoller<D>
where
    D: MeterDriver,
{
    #[must_use]
    pub const fn new(driver: D, channel_gap: Duration) -> Self {
        Self {
            driver,
            channel_gap,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Polls every channel of `slave`, pausing `channel_gap` after each read.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Invalid`] when voltage or current is NaN. No
    /// trailing channel is read in that case.
    pub async fn poll<P>(&mut self, slave: SlaveId, delay: &mut P) -> Result<MeterReading, PollError>
    where
        P: Delay,
    {
        let voltage = self.driver.read_channel(Channel::Voltage, slave).await;
        delay.delay(self.channel_gap).await;
        let current = self.driver.read_channel(Channel::Current, slave).await;

        if voltage.is_nan() || current.is_nan() {
            return Err(PollError::Invalid {
                voltage_missing: voltage.is_nan(),
                current_missing: current.is_nan(),
            });
        }
        delay.delay(self.channel_gap).await;

        let mut trailing = [f32::NAN; Channel::TRAILING.len()];
        for (slot, channel) in trailing.iter_mut().zip(Channel::TRAILING) {
            *slot = self.driver.read_channel(channel, slave).await;
            delay.delay(self.channel_gap).await;
        }
        let [
            active_power,
            frequency,
            total_active_energy,
            import_active_energy,
            export_active_energy,
            power_factor,
        ] = trailing;

        Ok(MeterReading {
            slave,
            voltage,
            current,
            active_power,
            frequency,
            total_active_energy,
            import_active_energy,
            export_active_energy,
            power_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::NoopDelay;
    use embassy_futures::block_on;
    use heapless::Vec;

    struct ScriptedDriver {
        voltage: f32,
        current: f32,
        trailing: f32,
        reads: Vec<(Channel, SlaveId), 16>,
    }

    impl ScriptedDriver {
        fn new(voltage: f32, current: f32, trailing: f32) -> Self {
            Self {
                voltage,
                current,
                trailing,
                reads: Vec::new(),
            }
        }
    }

    impl MeterDriver for ScriptedDriver {
        async fn read_channel(&mut self, channel: Channel, slave: SlaveId) -> f32 {
            self.reads.push((channel, slave)).unwrap();
            match channel {
                Channel::Voltage => self.voltage,
                Channel::Current => self.current,
                _ => self.trailing,
            }
        }
    }

    #[derive(Default)]
    struct CountingDelay {
        calls: usize,
        total: Duration,
    }

    impl Delay for CountingDelay {
        async fn delay(&mut self, duration: Duration) {
            self.calls += 1;
            self.total += duration;
        }
    }

    #[test]
    fn slave_id_displays_as_hex() {
        let mut rendered: heapless::String<8> = heapless::String::new();
        core::fmt::write(&mut rendered, format_args!("{}", SlaveId::new(0x65))).unwrap();
        assert_eq!(rendered.as_str(), "0x65");
    }

    #[test]
    fn valid_poll_reads_all_channels_in_order() {
        let mut poller = MeterPoller::new(ScriptedDriver::new(230.5, 1.2, 7.0), Duration::ZERO);
        let reading = block_on(poller.poll(SlaveId::new(1), &mut NoopDelay)).unwrap();

        assert_eq!(reading.voltage, 230.5);
        assert_eq!(reading.current, 1.2);
        assert_eq!(reading.power_factor, 7.0);

        let order: Vec<Channel, 16> = poller.driver().reads.iter().map(|(c, _)| *c).collect();
        assert_eq!(order.as_slice(), &Channel::ALL);
    }

    #[test]
    fn nan_current_short_circuits_remaining_channels() {
        let mut poller =
            MeterPoller::new(ScriptedDriver::new(230.0, f32::NAN, 1.0), Duration::ZERO);
        let err = block_on(poller.poll(SlaveId::new(0x66), &mut NoopDelay)).unwrap_err();

        assert_eq!(
            err,
            PollError::Invalid {
                voltage_missing: false,
                current_missing: true
            }
        );
        assert_eq!(poller.driver().reads.len(), 2);
    }

    #[test]
    fn nan_voltage_still_reads_current_then_stops() {
        let mut poller = MeterPoller::new(ScriptedDriver::new(f32::NAN, 0.5, 1.0), Duration::ZERO);
        let err = block_on(poller.poll(SlaveId::new(2), &mut NoopDelay)).unwrap_err();

        assert_eq!(
            err,
            PollError::Invalid {
                voltage_missing: true,
                current_missing: false
            }
        );
        let order: Vec<Channel, 16> = poller.driver().reads.iter().map(|(c, _)| *c).collect();
        assert_eq!(order.as_slice(), &[Channel::Voltage, Channel::Current]);
    }

    #[test]
    fn trailing_nan_is_carried_through() {
        let mut poller = MeterPoller::new(ScriptedDriver::new(229.0, 3.1, f32::NAN), Duration::ZERO);
        let reading = block_on(poller.poll(SlaveId::new(1), &mut NoopDelay)).unwrap();

        assert!(reading.active_power.is_nan());
        assert!(reading.value(Channel::ExportActiveEnergy).is_nan());
        assert_eq!(reading.value(Channel::Voltage), 229.0);
    }

    #[test]
    fn channel_gap_follows_every_read() {
        let gap = Duration::from_millis(50);
        let mut delay = CountingDelay::default();
        let mut poller = MeterPoller::new(ScriptedDriver::new(230.0, 1.0, 2.0), gap);
        block_on(poller.poll(SlaveId::new(1), &mut delay)).unwrap();

        assert_eq!(delay.calls, 8);
        assert_eq!(delay.total, gap * 8);

        let mut delay = CountingDelay::default();
        let mut poller = MeterPoller::new(ScriptedDriver::new(f32::NAN, 1.0, 2.0), gap);
        let _ = block_on(poller.poll(SlaveId::new(1), &mut delay));
        assert_eq!(delay.calls, 1);
    }
}
