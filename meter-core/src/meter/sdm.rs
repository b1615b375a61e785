//! Modbus RTU framing for Eastron SDM-series meters.
//!
//! Every channel is a 32-bit IEEE-754 float spread over two input registers,
//! so a read is always function 0x04 with a quantity of two.

use core::fmt;

use crc::{CRC_16_MODBUS, Crc};

use super::{Channel, SlaveId};

/// Function code for "read input registers".
pub const READ_INPUT_REGISTERS: u8 = 0x04;
/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;
/// Registers per float value.
pub const REGISTERS_PER_VALUE: u16 = 2;

pub const REQUEST_LEN: usize = 8;
pub const RESPONSE_LEN: usize = 9;
pub const EXCEPTION_LEN: usize = 5;

/// Line settings the SDM230 ships with.
pub const DEFAULT_BAUD_RATE: u32 = 2_400;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Decoding failures for a response frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    TooShort,
    Crc,
    SlaveMismatch { expected: u8, actual: u8 },
    UnexpectedFunction(u8),
    ByteCount(u8),
    Exception(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort => f.write_str("frame too short"),
            FrameError::Crc => f.write_str("crc mismatch"),
            FrameError::SlaveMismatch { expected, actual } => {
                write!(f, "reply from 0x{actual:02X}, expected 0x{expected:02X}")
            }
            FrameError::UnexpectedFunction(code) => write!(f, "unexpected function 0x{code:02X}"),
            FrameError::ByteCount(count) => write!(f, "unexpected byte count {count}"),
            FrameError::Exception(code) => write!(f, "exception 0x{code:02X}"),
        }
    }
}

/// Computes the Modbus CRC over `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    MODBUS_CRC.checksum(bytes)
}

/// Builds the request frame reading `channel` from `slave`.
#[must_use]
pub fn encode_read_request(slave: SlaveId, channel: Channel) -> [u8; REQUEST_LEN] {
    let [addr_hi, addr_lo] = channel.register().to_be_bytes();
    let [qty_hi, qty_lo] = REGISTERS_PER_VALUE.to_be_bytes();
    let mut frame = [
        slave.address(),
        READ_INPUT_REGISTERS,
        addr_hi,
        addr_lo,
        qty_hi,
        qty_lo,
        0,
        0,
    ];
    let [crc_lo, crc_hi] = checksum(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

/// Returns how many bytes the reply will have once its header is known.
///
/// `header` must contain at least the slave address and function code;
/// `None` means more bytes are needed.
#[must_use]
pub fn expected_response_len(header: &[u8]) -> Option<usize> {
    let function = *header.get(1)?;
    if function & EXCEPTION_FLAG != 0 {
        Some(EXCEPTION_LEN)
    } else {
        Some(RESPONSE_LEN)
    }
}

/// Validates a response frame and extracts its float value.
///
/// # Errors
///
/// Returns a [`FrameError`] describing the first check that failed. The CRC is
/// verified before any other field so line noise never looks like an exception.
pub fn decode_read_response(slave: SlaveId, frame: &[u8]) -> Result<f32, FrameError> {
    if frame.len() < EXCEPTION_LEN {
        return Err(FrameError::TooShort);
    }

    let function = frame[1];
    let len = if function & EXCEPTION_FLAG != 0 {
        EXCEPTION_LEN
    } else {
        RESPONSE_LEN
    };
    if frame.len() < len {
        return Err(FrameError::TooShort);
    }
    let frame = &frame[..len];

    let (body, crc) = frame.split_at(len - 2);
    if checksum(body).to_le_bytes() != [crc[0], crc[1]] {
        return Err(FrameError::Crc);
    }

    if body[0] != slave.address() {
        return Err(FrameError::SlaveMismatch {
            expected: slave.address(),
            actual: body[0],
        });
    }

    if function == READ_INPUT_REGISTERS | EXCEPTION_FLAG {
        return Err(FrameError::Exception(body[2]));
    }
    if function != READ_INPUT_REGISTERS {
        return Err(FrameError::UnexpectedFunction(function));
    }
    if body[2] != 4 {
        return Err(FrameError::ByteCount(body[2]));
    }

    Ok(f32::from_be_bytes([body[3], body[4], body[5], body[6]]))
}

/// Upper bound on reads spent draining a line that keeps talking.
pub const MAX_DRAIN_READS: usize = 32;

/// Empties a receive buffer before a new request goes out.
///
/// `read` must not block and returns how many bytes it moved, `0` once the
/// buffer is empty. Stops at the first error or after [`MAX_DRAIN_READS`]
/// reads and returns the number of bytes dropped.
#[must_use]
pub fn discard_pending<E>(mut read: impl FnMut(&mut [u8]) -> Result<usize, E>) -> usize {
    let mut scratch = [0u8; RESPONSE_LEN];
    let mut dropped = 0;
    for _ in 0..MAX_DRAIN_READS {
        match read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(count) => dropped += count,
        }
    }
    dropped
}
