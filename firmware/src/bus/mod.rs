//! RS-485 meter bus on a half-duplex UART.
//!
//! One request is on the wire at a time. The transceiver's driver-enable line
//! is held high while the request is transmitted and dropped before listening
//! for the reply.

use defmt::{debug, warn};
use embassy_time::{Duration, with_timeout};
use esp_hal::Async;
use esp_hal::gpio::Output;
use esp_hal::uart::Uart;
use meter_core::meter::sdm::{self, FrameError, RESPONSE_LEN};
use meter_core::meter::{Channel, MeterDriver, SlaveId};

/// Time allowed for a meter to answer one request.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Copy, Clone, Debug, defmt::Format)]
enum BusError {
    Write,
    Read,
    Timeout,
    Frame(FrameError),
}

pub struct Rs485Bus<'d> {
    uart: Uart<'d, Async>,
    driver_enable: Output<'d>,
}

impl<'d> Rs485Bus<'d> {
    pub fn new(uart: Uart<'d, Async>, mut driver_enable: Output<'d>) -> Self {
        driver_enable.set_low();
        Self {
            uart,
            driver_enable,
        }
    }

    async fn exchange(&mut self, channel: Channel, slave: SlaveId) -> Result<f32, BusError> {
        let request = sdm::encode_read_request(slave, channel);

        // A reply that missed its timeout must not be taken for this one.
        self.discard_pending();

        self.driver_enable.set_high();
        let sent = self.transmit(&request).await;
        self.driver_enable.set_low();
        sent?;

        let mut frame = [0u8; RESPONSE_LEN];
        let len = with_timeout(RESPONSE_TIMEOUT, self.receive(&mut frame))
            .await
            .map_err(|_| BusError::Timeout)??;

        sdm::decode_read_response(slave, &frame[..len]).map_err(BusError::Frame)
    }

    /// Drops bytes already sitting in the receive FIFO.
    fn discard_pending(&mut self) {
        let dropped = sdm::discard_pending(|buf| self.uart.read_buffered(buf));
        if dropped > 0 {
            debug!("bus: discarded {} stale bytes", dropped);
        }
    }

    async fn transmit(&mut self, request: &[u8]) -> Result<(), BusError> {
        let mut written = 0;
        while written < request.len() {
            written += self
                .uart
                .write_async(&request[written..])
                .await
                .map_err(|_| BusError::Write)?;
        }
        self.uart.flush_async().await.map_err(|_| BusError::Write)
    }

    /// Reads until the frame length implied by the header has arrived.
    async fn receive(&mut self, frame: &mut [u8; RESPONSE_LEN]) -> Result<usize, BusError> {
        let mut filled = 0;
        loop {
            let count = self
                .uart
                .read_async(&mut frame[filled..])
                .await
                .map_err(|_| BusError::Read)?;
            filled += count;

            if let Some(expected) = sdm::expected_response_len(&frame[..filled])
                && filled >= expected
            {
                return Ok(expected);
            }
        }
    }
}

impl MeterDriver for Rs485Bus<'_> {
    async fn read_channel(&mut self, channel: Channel, slave: SlaveId) -> f32 {
        match self.exchange(channel, slave).await {
            Ok(value) => {
                debug!("bus: {} {} = {}", slave.address(), channel.label(), value);
                value
            }
            Err(err) => {
                warn!("bus: {} {} failed: {}", slave.address(), channel.label(), err);
                f32::NAN
            }
        }
    }
}
