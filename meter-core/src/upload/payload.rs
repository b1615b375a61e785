//! Query-string encoding of data and error reports.

use core::fmt::{self, Display, Write};

use crate::escalation::ErrorEvent;
use crate::meter::MeterReading;

/// One valid reading plus the context the collector files it under.
#[derive(Copy, Clone, Debug)]
pub struct DataReport<'a> {
    pub device_id: &'a str,
    pub reading: &'a MeterReading,
    pub cycle: u32,
    pub rssi: Option<i8>,
}

#[derive(Copy, Clone, Debug)]
pub struct ErrorReport<'a> {
    pub device_id: &'a str,
    pub event: &'a ErrorEvent,
}

/// Renders `path?deviceId=..&slave=..&v=..` for a data report.
///
/// # Errors
///
/// Fails only when `out` runs out of space.
pub fn write_data_target<W: Write>(out: &mut W, path: &str, report: &DataReport<'_>) -> fmt::Result {
    let reading = report.reading;
    let mut query = QueryWriter::new(out, path)?;
    query.param("deviceId", report.device_id)?;
    query.param("slave", reading.slave.address())?;
    query.param("v", Fixed2(reading.voltage))?;
    query.param("a", Fixed2(reading.current))?;
    query.param("w", Fixed2(reading.active_power))?;
    query.param("hz", Fixed2(reading.frequency))?;
    query.param("kwh", Fixed2(reading.total_active_energy))?;
    query.param("im_kwh", Fixed2(reading.import_active_energy))?;
    query.param("pf", Fixed2(reading.power_factor))?;
    query.param("ex_kwh", Fixed2(reading.export_active_energy))?;
    query.param("rssi", report.rssi.unwrap_or(0))?;
    query.param("c", report.cycle)
}

/// Renders `path?deviceId=..&error=..&rssi=..` for an error report.
///
/// # Errors
///
/// Fails only when `out` runs out of space.
pub fn write_error_target<W: Write>(
    out: &mut W,
    path: &str,
    report: &ErrorReport<'_>,
) -> fmt::Result {
    let event = report.event;
    let counters = event.counters;
    let mut query = QueryWriter::new(out, path)?;
    query.param("deviceId", report.device_id)?;
    query.param("error", event.reason.as_str())?;
    query.param("rssi", event.rssi.unwrap_or(0))?;
    query.param("wifiFailed", counters.network_errors())?;
    query.param("httpFailed", counters.upload_errors())?;
    query.param("busFailed", counters.bus_errors())
}

struct Fixed2(f32);

impl Display for Fixed2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

struct QueryWriter<'w, W> {
    out: &'w mut W,
    first: bool,
}

impl<'w, W: Write> QueryWriter<'w, W> {
    fn new(out: &'w mut W, path: &str) -> Result<Self, fmt::Error> {
        out.write_str(path)?;
        Ok(Self { out, first: true })
    }

    fn param(&mut self, key: &str, value: impl Display) -> fmt::Result {
        self.out.write_char(if self.first { '?' } else { '&' })?;
        self.first = false;
        self.out.write_str(key)?;
        self.out.write_char('=')?;
        write!(PercentEncoder(&mut *self.out), "{value}")
    }
}

/// Escapes everything outside the RFC 3986 unreserved set.
pub struct PercentEncoder<'w, W>(pub &'w mut W);

impl<W: Write> Write for PercentEncoder<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                self.0.write_char(char::from(byte))?;
            } else {
                write!(self.0, "%{byte:02X}")?;
            }
        }
        Ok(())
    }
}
