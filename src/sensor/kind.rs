// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The closed set of supported sensor variants.

use std::fmt;
use std::time::Duration;

use crate::filter::{FilterPolicy, Signedness};
use crate::types::MeasurementType;

/// Device-type code of the temperature sensor.
pub const TEMPERATURE_DEVICE_IDENTIFIER: u16 = 216;

/// Device-type code of the humidity sensor.
pub const HUMIDITY_DEVICE_IDENTIFIER: u16 = 27;

/// Device-type code of the ambient light sensor.
pub const AMBIENT_LIGHT_DEVICE_IDENTIFIER: u16 = 21;

/// Device-type code of the infrared distance sensor.
pub const DISTANCE_IR_DEVICE_IDENTIFIER: u16 = 25;

/// The distance sensor misreports beyond this many millimetres.
pub const DISTANCE_IR_CEILING: i32 = 800;

/// Period of the distance sensor's value callback.
pub const DISTANCE_IR_CALLBACK_PERIOD: Duration = Duration::from_secs(1);

/// A supported sensor variant.
///
/// Each variant maps 1:1 to a device-type code reported during enumeration.
///
/// # Examples
///
/// ```
/// use sensor_bridge::sensor::SensorKind;
///
/// let kind = SensorKind::from_device_identifier(216).unwrap();
/// assert_eq!(kind, SensorKind::Temperature);
/// assert_eq!(kind.measurement().as_str(), "temperature");
/// assert!(SensorKind::from_device_identifier(13).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Temperature sensor.
    Temperature,
    /// Humidity sensor.
    Humidity,
    /// Ambient light sensor.
    AmbientLight,
    /// Infrared distance sensor.
    DistanceIr,
}

impl SensorKind {
    /// All supported variants.
    pub const ALL: [Self; 4] = [
        Self::Temperature,
        Self::Humidity,
        Self::AmbientLight,
        Self::DistanceIr,
    ];

    /// Looks up the variant for a device-type code.
    ///
    /// Returns `None` for hardware this bridge does not support.
    #[must_use]
    pub fn from_device_identifier(code: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.device_identifier() == code)
    }

    /// Returns the device-type code.
    #[must_use]
    pub const fn device_identifier(&self) -> u16 {
        match self {
            Self::Temperature => TEMPERATURE_DEVICE_IDENTIFIER,
            Self::Humidity => HUMIDITY_DEVICE_IDENTIFIER,
            Self::AmbientLight => AMBIENT_LIGHT_DEVICE_IDENTIFIER,
            Self::DistanceIr => DISTANCE_IR_DEVICE_IDENTIFIER,
        }
    }

    /// Returns the measurement this variant reports.
    #[must_use]
    pub const fn measurement(&self) -> MeasurementType {
        match self {
            Self::Temperature => MeasurementType::Temperature,
            Self::Humidity => MeasurementType::Humidity,
            Self::AmbientLight => MeasurementType::AmbientLight,
            Self::DistanceIr => MeasurementType::Distance,
        }
    }

    /// Returns the filtering policy for this variant.
    #[must_use]
    pub const fn filter_policy(&self) -> FilterPolicy {
        match self {
            Self::Temperature => FilterPolicy::Hysteresis {
                tolerance: 10,
                signedness: Signedness::Signed,
            },
            Self::Humidity => FilterPolicy::Hysteresis {
                tolerance: 3,
                signedness: Signedness::Unsigned,
            },
            Self::AmbientLight => FilterPolicy::Hysteresis {
                tolerance: 10,
                signedness: Signedness::Unsigned,
            },
            Self::DistanceIr => FilterPolicy::ExactMatch {
                ceiling: DISTANCE_IR_CEILING,
            },
        }
    }

    /// Returns the periodic callback interval, for variants that report
    /// periodically instead of on threshold crossings.
    #[must_use]
    pub const fn callback_period(&self) -> Option<Duration> {
        match self {
            Self::DistanceIr => Some(DISTANCE_IR_CALLBACK_PERIOD),
            Self::Temperature | Self::Humidity | Self::AmbientLight => None,
        }
    }

    /// Returns true if readings of this variant can be negative.
    ///
    /// Read from [`filter_policy`](Self::filter_policy); exact-match
    /// variants report unsigned hardware values.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        matches!(
            self.filter_policy(),
            FilterPolicy::Hysteresis {
                signedness: Signedness::Signed,
                ..
            }
        )
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.measurement().as_str())
    }
}
