// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sensor identifier type.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// Length of a sensor identifier in characters.
pub const UID_LEN: usize = 3;

/// Identifier of a physical sensor on the bus.
///
/// A UID is exactly three printable ASCII characters. It is unique among the
/// sensors currently attached and stays the same for the sensor's physical
/// lifetime.
///
/// # Examples
///
/// ```
/// use sensor_bridge::types::Uid;
///
/// let uid = Uid::normalize("abc\u{1}").unwrap();
/// assert_eq!(uid.as_str(), "abc");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid([u8; UID_LEN]);

impl Uid {
    /// Creates a UID from raw bytes.
    ///
    /// The caller guarantees the bytes are printable ASCII; use
    /// [`normalize`](Self::normalize) for untrusted input.
    #[must_use]
    pub const fn new(bytes: [u8; UID_LEN]) -> Self {
        Self(bytes)
    }

    /// Normalizes an identifier as reported by the bus.
    ///
    /// Some environments append a stray control byte to the identifier
    /// buffer, so trailing control characters are stripped first. Only the
    /// first three characters identify the sensor.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidUid`] if fewer than three characters
    /// remain or any of them is not printable ASCII.
    pub fn normalize(raw: &str) -> Result<Self, ValueError> {
        let trimmed = raw.trim_end_matches(|c: char| c.is_control());
        let bytes = trimmed.as_bytes();

        if bytes.len() < UID_LEN {
            return Err(ValueError::InvalidUid(raw.to_string()));
        }

        let mut uid = [0u8; UID_LEN];
        uid.copy_from_slice(&bytes[..UID_LEN]);

        if !uid.iter().all(u8::is_ascii_graphic) {
            return Err(ValueError::InvalidUid(raw.to_string()));
        }

        Ok(Self(uid))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }
}

impl FromStr for Uid {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.as_str())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
