//! AMS command framing: frame builders, response parsers, constants.
//!
//! Pure functions apart from [`read_frame`], which pulls one response frame
//! off any [`Connection`].
//!
//! ```text
//! command:  A5 | cmd    | len_lo len_hi | payload | checksum8(cmd..payload)
//! response: 5A | status | len_lo len_hi | payload | checksum8(status..payload)
//! ```

use crate::transport::{Connection, TransportError};
use crate::types::{DeviceInfo, Gains, GAIN_CHANNELS};

// --- Sync bytes ---
pub const SYNC_COMMAND: u8 = 0xA5;
pub const SYNC_RESPONSE: u8 = 0x5A;

// --- Command codes ---
pub const CMD_HELLO: u8 = 0x01;
pub const CMD_GET_GAIN: u8 = 0x02;
pub const CMD_SET_GAIN: u8 = 0x03;
pub const CMD_START_SCAN: u8 = 0x04;
pub const CMD_STOP_SCAN: u8 = 0x05;

// --- Status codes ---
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_DATA: u8 = 0x01;
pub const STATUS_BAD_COMMAND: u8 = 0x10;
pub const STATUS_BAD_ARG: u8 = 0x11;
pub const STATUS_BAD_GAIN: u8 = 0x12;
pub const STATUS_BUSY: u8 = 0x13;
pub const STATUS_NOT_READY: u8 = 0x14;
pub const STATUS_BAD_RATE: u8 = 0x15;
pub const STATUS_OVERRUN: u8 = 0x20;
pub const STATUS_ADC_OVERRUN: u8 = 0x21;
pub const STATUS_PACER_OVERRUN: u8 = 0x22;
pub const STATUS_UNDERRUN: u8 = 0x23;
pub const STATUS_INTERNAL: u8 = 0x7F;

// --- Payload sizes ---
pub const PAYLOAD_HELLO: usize = 12;
pub const PAYLOAD_GAIN: usize = 4 * GAIN_CHANNELS;
pub const PAYLOAD_START_SCAN: usize = 5;

/// Sync + code + two length bytes.
pub const HEADER_LEN: usize = 4;
pub const SAMPLE_WIDTH: usize = 4;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A decoded frame: command code or status, plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub payload: Vec<u8>,
}

/// Ones-complement 8-bit checksum.
pub fn checksum8(data: &[u8]) -> u8 {
    let sum: u8 = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

fn build(sync: u8, code: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    frame.push(sync);
    frame.push(code);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    let sum = checksum8(&frame[1..]);
    frame.push(sum);
    frame
}

/// Build a command frame.
pub fn build_cmd(code: u8, payload: &[u8]) -> Vec<u8> {
    build(SYNC_COMMAND, code, payload)
}

/// Build a response frame (device side; used by the mock device).
pub fn build_response(status: u8, payload: &[u8]) -> Vec<u8> {
    build(SYNC_RESPONSE, status, payload)
}

pub fn build_set_gain(gains: &Gains) -> Vec<u8> {
    build_cmd(CMD_SET_GAIN, &encode_gains(gains))
}

pub fn build_start_scan(rate_hz: u32, channels: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PAYLOAD_START_SCAN);
    payload.extend_from_slice(&rate_hz.to_le_bytes());
    payload.push(channels);
    build_cmd(CMD_START_SCAN, &payload)
}

pub fn encode_gains(gains: &Gains) -> Vec<u8> {
    gains.0.iter().flat_map(|g| g.to_le_bytes()).collect()
}

pub fn parse_gains(data: &[u8]) -> Result<Gains, TransportError> {
    if data.len() < PAYLOAD_GAIN {
        return Err(TransportError::bad_frame("Gain payload too short"));
    }
    let mut gains = [0i32; GAIN_CHANNELS];
    for (g, chunk) in gains.iter_mut().zip(data.chunks_exact(4)) {
        *g = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(Gains(gains))
}

/// Encode a HELLO reply payload.
pub fn encode_hello(info: &DeviceInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PAYLOAD_HELLO);
    buf.extend_from_slice(&info.fw_version.to_le_bytes());
    buf.extend_from_slice(&info.serial.to_le_bytes());
    buf.extend_from_slice(&info.product_id.to_le_bytes());
    buf
}

/// Parse a 12-byte HELLO reply payload.
pub fn parse_hello(data: &[u8]) -> Result<DeviceInfo, TransportError> {
    if data.len() < PAYLOAD_HELLO {
        return Err(TransportError::bad_frame("Hello payload too short"));
    }
    Ok(DeviceInfo {
        fw_version: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        serial: i32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        product_id: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
    })
}

/// Parse a START_SCAN command payload into (rate, channels).
pub fn parse_start_scan(data: &[u8]) -> Option<(u32, u8)> {
    if data.len() < PAYLOAD_START_SCAN {
        return None;
    }
    Some((
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        data[4],
    ))
}

pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode a DATA payload into samples.
pub fn decode_samples(data: &[u8]) -> Result<Vec<f64>, TransportError> {
    if data.len() % SAMPLE_WIDTH != 0 {
        return Err(TransportError::bad_frame(format!(
            "Data payload of {} bytes is not a whole number of samples",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(SAMPLE_WIDTH)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
        .collect())
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a whole frame, otherwise
/// the frame and the number of bytes it occupied.
pub fn split_frame(buf: &[u8], sync: u8) -> Result<Option<(Frame, usize)>, TransportError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    if buf[0] != sync {
        return Err(TransportError::bad_frame(format!(
            "Unexpected sync byte: {:#04x}",
            buf[0]
        )));
    }
    let len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let total = HEADER_LEN + len + 1;
    if buf.len() < total {
        return Ok(None);
    }
    let expected = checksum8(&buf[1..total - 1]);
    if buf[total - 1] != expected {
        return Err(TransportError::bad_frame(format!(
            "Checksum mismatch: got {:#04x}, expected {:#04x}",
            buf[total - 1],
            expected
        )));
    }
    let frame = Frame {
        code: buf[1],
        payload: buf[HEADER_LEN..total - 1].to_vec(),
    };
    Ok(Some((frame, total)))
}

/// Read one response frame.
///
/// Returns `Ok(None)` if nothing arrived before the connection timeout.
/// A frame that starts but does not complete is a `BadFrame` error.
pub fn read_frame(conn: &mut dyn Connection) -> Result<Option<Frame>, TransportError> {
    let mut buf = conn.read(HEADER_LEN)?;
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() < HEADER_LEN {
        return Err(TransportError::bad_frame("Truncated frame header"));
    }
    if buf[0] != SYNC_RESPONSE {
        return Err(TransportError::bad_frame(format!(
            "Unexpected sync byte: {:#04x}",
            buf[0]
        )));
    }
    let len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let rest = conn.read(len + 1)?;
    if rest.len() != len + 1 {
        return Err(TransportError::bad_frame(format!(
            "Truncated frame: expected {} payload bytes, got {}",
            len + 1,
            rest.len()
        )));
    }
    buf.extend_from_slice(&rest);
    match split_frame(&buf, SYNC_RESPONSE)? {
        Some((frame, _)) => Ok(Some(frame)),
        None => Err(TransportError::bad_frame("Truncated frame")),
    }
}
