// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Measurement types and topic prefixes.

use std::fmt;

use crate::error::ValueError;

/// The kind of quantity a sensor reports.
///
/// The string form is used as the last topic level when publishing.
///
/// # Examples
///
/// ```
/// use sensor_bridge::types::MeasurementType;
///
/// assert_eq!(MeasurementType::AmbientLight.as_str(), "ambient-light");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementType {
    /// Temperature in hundredths of a degree Celsius.
    Temperature,
    /// Relative humidity in tenths of a percent.
    Humidity,
    /// Illuminance in tenths of a lux.
    AmbientLight,
    /// Distance in millimetres.
    Distance,
}

impl MeasurementType {
    /// Returns the topic level for this measurement.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::AmbientLight => "ambient-light",
            Self::Distance => "distance",
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic prefix under which readings are published.
///
/// The prefix always ends in `/`; one is appended when missing.
///
/// # Examples
///
/// ```
/// use sensor_bridge::types::{MeasurementType, TopicPrefix};
///
/// let prefix = TopicPrefix::new("home/office").unwrap();
/// assert_eq!(prefix.as_str(), "home/office/");
/// assert_eq!(prefix.topic_for(MeasurementType::Humidity), "home/office/humidity");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPrefix(String);

impl TopicPrefix {
    /// Creates a prefix, appending a trailing separator if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::EmptyTopicPrefix`] for an empty string.
    pub fn new(prefix: impl Into<String>) -> Result<Self, ValueError> {
        let mut prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ValueError::EmptyTopicPrefix);
        }
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Ok(Self(prefix))
    }

    /// Returns the prefix including its trailing separator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the full topic for a measurement.
    #[must_use]
    pub fn topic_for(&self, measurement: MeasurementType) -> String {
        format!("{}{}", self.0, measurement.as_str())
    }
}

impl fmt::Display for TopicPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
