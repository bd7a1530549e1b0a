// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Brick daemon wire format.
//!
//! Every packet starts with an 8-byte little-endian header:
//!
//! ```text
//! 0..4  uid            numeric device id, 0 = broadcast
//! 4     length         header + payload
//! 5     function id
//! 6     sequence << 4 | response_expected << 3
//! 7     error code << 6
//! ```
//!
//! Callbacks carry sequence number 0; requests use 1..=15.

use std::time::Duration;

use crate::error::BusError;
use crate::filter::Band;
use crate::sensor::SensorKind;

pub(crate) const HEADER_LEN: usize = 8;

/// Broadcast request asking every device to report itself.
pub(crate) const FUNCTION_ENUMERATE: u8 = 254;

/// Device announcement, answer to [`FUNCTION_ENUMERATE`] or hot-plug.
pub(crate) const CALLBACK_ENUMERATE: u8 = 253;

const ENUMERATE_PAYLOAD_LEN: usize = 26;

/// Threshold option: trigger when the value is outside `[low, high]`.
const THRESHOLD_OUTSIDE: u8 = b'o';

const BASE58_ALPHABET: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub uid: u32,
    pub length: u8,
    pub function_id: u8,
    pub sequence: u8,
    pub response_expected: bool,
    pub error_code: u8,
}

impl Header {
    pub(crate) fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..4].copy_from_slice(&self.uid.to_le_bytes());
        buf[4] = self.length;
        buf[5] = self.function_id;
        buf[6] = (self.sequence << 4) | (u8::from(self.response_expected) << 3);
        buf[7] = self.error_code << 6;
        buf
    }

    pub(crate) fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            uid: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: buf[4],
            function_id: buf[5],
            sequence: buf[6] >> 4,
            response_expected: buf[6] & 0x08 != 0,
            error_code: buf[7] >> 6,
        }
    }

    /// Payload bytes following this header.
    pub(crate) fn payload_len(&self) -> Result<usize, BusError> {
        usize::from(self.length)
            .checked_sub(HEADER_LEN)
            .ok_or_else(|| BusError::Malformed(format!("length {} below header size", self.length)))
    }

    pub(crate) fn is_callback(&self) -> bool {
        self.sequence == 0
    }
}

/// Builds a complete request packet.
pub(crate) fn encode_request(
    uid: u32,
    function_id: u8,
    sequence: u8,
    response_expected: bool,
    payload: &[u8],
) -> Result<Vec<u8>, BusError> {
    let length = u8::try_from(HEADER_LEN + payload.len())
        .map_err(|_| BusError::Malformed(format!("payload of {} bytes too large", payload.len())))?;
    let header = Header {
        uid,
        length,
        function_id,
        sequence,
        response_expected,
        error_code: 0,
    };

    let mut packet = Vec::with_capacity(usize::from(length));
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Decodes a base58 device id.
pub(crate) fn base58_decode(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    text.bytes().try_fold(0u32, |acc, c| {
        let digit = BASE58_ALPHABET.iter().position(|&a| a == c)?;
        let digit = u32::try_from(digit).ok()?;
        acc.checked_mul(58)?.checked_add(digit)
    })
}

/// Encodes a device id in base58.
pub(crate) fn base58_encode(mut value: u32) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(BASE58_ALPHABET[(value % 58) as usize]);
        value /= 58;
        if value == 0 {
            break;
        }
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Payload of an enumerate callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Announcement {
    pub uid: String,
    pub connected_uid: String,
    pub position: char,
    pub hardware_version: [u8; 3],
    pub firmware_version: [u8; 3],
    pub device_identifier: u16,
    pub enumeration_type: u8,
}

impl Announcement {
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, BusError> {
        if payload.len() < ENUMERATE_PAYLOAD_LEN {
            return Err(BusError::Malformed(format!(
                "enumerate payload of {} bytes",
                payload.len()
            )));
        }

        Ok(Self {
            uid: fixed_string(&payload[0..8]),
            connected_uid: fixed_string(&payload[8..16]),
            position: char::from(payload[16]),
            hardware_version: [payload[17], payload[18], payload[19]],
            firmware_version: [payload[20], payload[21], payload[22]],
            device_identifier: u16::from_le_bytes([payload[23], payload[24]]),
            enumeration_type: payload[25],
        })
    }

    #[cfg(test)]
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(ENUMERATE_PAYLOAD_LEN);
        for text in [&self.uid, &self.connected_uid] {
            let mut field = [0u8; 8];
            let bytes = text.as_bytes();
            let n = bytes.len().min(8);
            field[..n].copy_from_slice(&bytes[..n]);
            payload.extend_from_slice(&field);
        }
        payload.push(u8::try_from(self.position).unwrap_or(b'?'));
        payload.extend_from_slice(&self.hardware_version);
        payload.extend_from_slice(&self.firmware_version);
        payload.extend_from_slice(&self.device_identifier.to_le_bytes());
        payload.push(self.enumeration_type);
        payload
    }
}

/// Reads a NUL-padded string field.
fn fixed_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Function ids of one sensor variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Functions {
    pub get_value: u8,
    pub set_threshold: Option<u8>,
    pub set_period: Option<u8>,
    pub value_callback: u8,
}

pub(crate) const fn functions(kind: SensorKind) -> Functions {
    match kind {
        SensorKind::Temperature => Functions {
            get_value: 1,
            set_threshold: Some(4),
            set_period: None,
            value_callback: 9,
        },
        SensorKind::Humidity | SensorKind::AmbientLight => Functions {
            get_value: 1,
            set_threshold: Some(7),
            set_period: None,
            value_callback: 15,
        },
        SensorKind::DistanceIr => Functions {
            get_value: 1,
            set_threshold: None,
            set_period: Some(5),
            value_callback: 15,
        },
    }
}

/// Decodes a reading in the variant's native integer width.
pub(crate) fn decode_value(kind: SensorKind, payload: &[u8]) -> Result<i32, BusError> {
    let [a, b, ..] = payload else {
        return Err(BusError::Malformed(format!(
            "value payload of {} bytes",
            payload.len()
        )));
    };
    let value = if kind.is_signed() {
        i32::from(i16::from_le_bytes([*a, *b]))
    } else {
        i32::from(u16::from_le_bytes([*a, *b]))
    };
    Ok(value)
}

/// Encodes a value in the variant's native integer width, saturating.
fn encode_value(kind: SensorKind, value: i32) -> [u8; 2] {
    if kind.is_signed() {
        let value = i16::try_from(value).unwrap_or(if value < 0 { i16::MIN } else { i16::MAX });
        value.to_le_bytes()
    } else {
        let value = u16::try_from(value).unwrap_or(if value < 0 { 0 } else { u16::MAX });
        value.to_le_bytes()
    }
}

/// Payload of a "set callback threshold" request in outside mode.
pub(crate) fn threshold_payload(kind: SensorKind, band: Band) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(THRESHOLD_OUTSIDE);
    payload.extend_from_slice(&encode_value(kind, band.low));
    payload.extend_from_slice(&encode_value(kind, band.high));
    payload
}

/// Payload of a "set callback period" request.
pub(crate) fn period_payload(period: Duration) -> [u8; 4] {
    u32::try_from(period.as_millis())
        .unwrap_or(u32::MAX)
        .to_le_bytes()
}
