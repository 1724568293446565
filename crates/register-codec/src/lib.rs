//! Conversions between raw Modbus register bytes and engineering units.
//!
//! Every value travels big-endian on the wire. Voltages, currents, powers and
//! temperatures are stored by the controller as hundredths of their unit.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

pub mod registers;

pub use registers::{Decoding, RegisterAddress, RegisterKind};

/// Hundredths of a volt, amp, watt, kWh or degree per unit.
pub const VALUE_DIVISOR: f32 = 100.0;

const TEMP_SIGNED_THRESHOLD: u32 = 32_768;
const TEMP_SIGNED_OFFSET: i32 = 65_536;
const CLOCK_BASE_YEAR: i32 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("insufficient data for {what}: expected {expected} bytes, got {actual}")]
    InsufficientData {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("register payload has odd length {0}")]
    OddLength(usize),
    #[error("invalid device clock: {0}")]
    InvalidClock(String),
}

fn require(data: &[u8], expected: usize, what: &'static str) -> Result<(), CodecError> {
    if data.len() < expected {
        return Err(CodecError::InsufficientData {
            what,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn word_at(data: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([data[index * 2], data[index * 2 + 1]])
}

/// Returns the bytes of `count` registers starting at register `index` of a block read.
pub fn register_slice(data: &[u8], index: usize, count: usize) -> Result<&[u8], CodecError> {
    let start = index * 2;
    let end = start + count * 2;
    require(data, end, "register slice")?;
    Ok(&data[start..end])
}

pub fn decode_scaled_float(data: &[u8]) -> Result<f32, CodecError> {
    require(data, 2, "scaled float")?;
    Ok(f32::from(word_at(data, 0)) / VALUE_DIVISOR)
}

pub fn decode_scaled_floats(data: &[u8], quantity: usize) -> Result<Vec<f32>, CodecError> {
    require(data, quantity * 2, "scaled floats")?;
    Ok((0..quantity)
        .map(|index| f32::from(word_at(data, index)) / VALUE_DIVISOR)
        .collect())
}

/// Unsigned 16-bit register widened without sign extension.
pub fn decode_int(data: &[u8]) -> Result<u32, CodecError> {
    require(data, 2, "int")?;
    Ok(u32::from(word_at(data, 0)))
}

pub fn decode_ints(data: &[u8], quantity: usize) -> Result<Vec<u32>, CodecError> {
    require(data, quantity * 2, "ints")?;
    Ok((0..quantity)
        .map(|index| u32::from(word_at(data, index)))
        .collect())
}

/// Decodes a 32-bit value stored as two registers, low word first.
pub fn decode_swapped_float32(data: &[u8]) -> Result<f32, CodecError> {
    require(data, 4, "swapped float32")?;
    let swapped = [data[2], data[3], data[0], data[1]];
    Ok(u32::from_be_bytes(swapped) as f32 / VALUE_DIVISOR)
}

/// Negative temperatures arrive on an unsigned channel: raw values at or above
/// 32768 wrap around to negative.
pub fn decode_signed_temperature(raw: u32) -> f32 {
    let mut value = raw as i32;
    if raw >= TEMP_SIGNED_THRESHOLD {
        value -= TEMP_SIGNED_OFFSET;
    }
    value as f32 / VALUE_DIVISOR
}

/// Decodes the battery and device temperature registers, in that order.
pub fn decode_temperature_pair(data: &[u8]) -> Result<(f32, f32), CodecError> {
    require(data, 4, "temperature pair")?;
    let raw = decode_ints(data, 2)?;
    Ok((
        decode_signed_temperature(raw[0]),
        decode_signed_temperature(raw[1]),
    ))
}

/// Two's-complement 16-bit register divided by 100 (temperature limit registers).
pub fn decode_signed_scaled(data: &[u8]) -> Result<f32, CodecError> {
    require(data, 2, "signed scaled")?;
    Ok(f32::from(word_at(data, 0) as i16) / VALUE_DIVISOR)
}

pub fn decode_signed_scaled_values(data: &[u8], quantity: usize) -> Result<Vec<f32>, CodecError> {
    require(data, quantity * 2, "signed scaled values")?;
    Ok((0..quantity)
        .map(|index| f32::from(word_at(data, index) as i16) / VALUE_DIVISOR)
        .collect())
}

pub fn encode_voltage(volts: f32) -> u16 {
    (volts * VALUE_DIVISOR).round() as u16
}

pub fn encode_temperature(celsius: f32) -> i16 {
    (celsius * VALUE_DIVISOR).round() as i16
}

pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

pub fn bytes_to_words(data: &[u8]) -> Result<Vec<u16>, CodecError> {
    if data.len() % 2 != 0 {
        return Err(CodecError::OddLength(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decodes the 3-register real time clock.
///
/// Byte order is minute, second, day, hour, year offset from 2000, month.
pub fn decode_clock(data: &[u8]) -> Result<NaiveDateTime, CodecError> {
    require(data, 6, "clock")?;
    let (minute, second, day, hour, year, month) =
        (data[0], data[1], data[2], data[3], data[4], data[5]);
    NaiveDate::from_ymd_opt(
        CLOCK_BASE_YEAR + i32::from(year),
        u32::from(month),
        u32::from(day),
    )
    .and_then(|date| date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)))
    .ok_or_else(|| {
        CodecError::InvalidClock(format!(
            "{}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}",
            CLOCK_BASE_YEAR + i32::from(year)
        ))
    })
}

/// Inverse of [`decode_clock`]. Years outside 2000..=2255 cannot be stored.
pub fn encode_clock(time: &NaiveDateTime) -> Result<[u8; 6], CodecError> {
    let offset = u8::try_from(time.year() - CLOCK_BASE_YEAR)
        .map_err(|_| CodecError::InvalidClock(format!("year {} out of range", time.year())))?;
    Ok([
        time.minute() as u8,
        time.second() as u8,
        time.day() as u8,
        time.hour() as u8,
        offset,
        time.month() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffers_are_rejected() {
        assert!(matches!(
            decode_scaled_float(&[0x01]),
            Err(CodecError::InsufficientData { expected: 2, actual: 1, .. })
        ));
        assert!(decode_swapped_float32(&[0, 0, 0]).is_err());
        assert!(decode_temperature_pair(&[0x09, 0xC4]).is_err());
        assert!(register_slice(&[0; 4], 1, 2).is_err());
    }

    #[test]
    fn register_slice_offsets_by_register() {
        let data = words_to_bytes(&[1, 2, 3, 4]);
        assert_eq!(register_slice(&data, 2, 2).expect("slice"), &[0, 3, 0, 4]);
    }
}
