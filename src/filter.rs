// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Threshold filtering of raw sensor readings.
//!
//! Most sensors are armed with an "outside" threshold on the hardware: the
//! device only calls back once a reading leaves the `[low, high]` band around
//! the last reported value. After every emitted reading the band is
//! recomputed and programmed again so the hardware re-arms around the new
//! value.
//!
//! The distance sensor is different. It reports periodically, is clamped to a
//! saturation ceiling, and only suppresses readings that exactly repeat the
//! last reported value. That asymmetry is per-sensor policy, captured by
//! [`FilterPolicy`].

use std::fmt;

/// An inclusive trigger band.
///
/// The hardware fires when a reading lies strictly outside the band; a
/// reading equal to either boundary does not trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Band {
    /// Lower boundary, inclusive.
    pub low: i32,
    /// Upper boundary, inclusive.
    pub high: i32,
}

impl Band {
    /// Returns true if `value` lies within the band, boundaries included.
    #[must_use]
    pub fn contains(&self, value: i32) -> bool {
        (self.low..=self.high).contains(&value)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// Whether a magnitude may become negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    /// Negative values are valid (temperature).
    Signed,
    /// The band is clamped at zero.
    Unsigned,
}

/// Computes the trigger band around `value`.
///
/// # Examples
///
/// ```
/// use sensor_bridge::filter::{next_band, Band, Signedness};
///
/// assert_eq!(next_band(5, 10, Signedness::Unsigned), Band { low: 0, high: 15 });
/// assert_eq!(next_band(5, 10, Signedness::Signed), Band { low: -5, high: 15 });
/// ```
#[must_use]
pub fn next_band(value: i32, tolerance: u16, signedness: Signedness) -> Band {
    let tolerance = i32::from(tolerance);
    let low = value.saturating_sub(tolerance);
    let low = match signedness {
        Signedness::Signed => low,
        Signedness::Unsigned => low.max(0),
    };
    Band {
        low,
        high: value.saturating_add(tolerance),
    }
}

/// Decides whether `new_value` warrants a new event.
///
/// The first reading always does. Later readings only do when they fall
/// outside the band around the last reported value, which is exactly when
/// the hardware trigger fires.
#[must_use]
pub fn should_emit(last_value: Option<i32>, new_value: i32, tolerance: u16) -> bool {
    last_value.is_none_or(|last| !next_band(last, tolerance, Signedness::Signed).contains(new_value))
}

/// Filtering policy of one sensor variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterPolicy {
    /// Hardware hysteresis with a tolerance band.
    Hysteresis {
        /// Half-width of the trigger band.
        tolerance: u16,
        /// Whether the band may go below zero.
        signedness: Signedness,
    },
    /// Clamp to a ceiling and drop exact repeats; no band is programmed.
    ExactMatch {
        /// Saturation ceiling applied before filtering.
        ceiling: i32,
    },
}

/// A reading that passed the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    /// Value to report, after clamping.
    pub value: i32,
    /// Band to program on the hardware, if the policy uses one.
    pub band: Option<Band>,
}

/// Per-sensor filter state.
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    policy: FilterPolicy,
    last_value: Option<i32>,
}

impl ThresholdFilter {
    /// Creates a filter that has not seen any reading yet.
    #[must_use]
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            policy,
            last_value: None,
        }
    }

    /// Returns the filter policy.
    #[must_use]
    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// Returns the last reported value.
    #[must_use]
    pub fn last_value(&self) -> Option<i32> {
        self.last_value
    }

    /// Feeds a raw reading through the filter.
    ///
    /// Returns `None` if the reading is suppressed; in that case the filter
    /// state is unchanged.
    pub fn observe(&mut self, raw: i32) -> Option<Emission> {
        match self.policy {
            FilterPolicy::Hysteresis {
                tolerance,
                signedness,
            } => {
                if !should_emit(self.last_value, raw, tolerance) {
                    return None;
                }
                self.last_value = Some(raw);
                Some(Emission {
                    value: raw,
                    band: Some(next_band(raw, tolerance, signedness)),
                })
            }
            FilterPolicy::ExactMatch { ceiling } => {
                let value = raw.min(ceiling);
                if self.last_value == Some(value) {
                    return None;
                }
                self.last_value = Some(value);
                Some(Emission { value, band: None })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hysteresis(tolerance: u16, signedness: Signedness) -> ThresholdFilter {
        ThresholdFilter::new(FilterPolicy::Hysteresis {
            tolerance,
            signedness,
        })
    }

    #[test]
    fn band_boundaries_are_inclusive() {
        let band = Band { low: 11, high: 31 };
        assert!(band.contains(11));
        assert!(band.contains(31));
        assert!(!band.contains(10));
        assert!(!band.contains(32));
    }

    #[test]
    fn band_always_contains_value() {
        for tolerance in [0u16, 1, 3, 10, 500, u16::MAX] {
            for value in (-3000..=3000).step_by(7) {
                let band = next_band(value, tolerance, Signedness::Signed);
                assert!(band.low <= value && value <= band.high);
            }
            for value in (0..=6000).step_by(7) {
                let band = next_band(value, tolerance, Signedness::Unsigned);
                assert!(band.low <= value && value <= band.high);
                assert!(band.low >= 0);
            }
        }
    }

    #[test]
    fn band_saturates_at_extremes() {
        let band = next_band(i32::MAX, 10, Signedness::Signed);
        assert_eq!(band.high, i32::MAX);
        let band = next_band(i32::MIN, 10, Signedness::Signed);
        assert_eq!(band.low, i32::MIN);
    }

    #[test]
    fn first_reading_always_emits() {
        assert!(should_emit(None, 0, 10));
        assert!(should_emit(None, -40, u16::MAX));
    }

    #[test]
    fn boundary_reading_does_not_emit() {
        assert!(!should_emit(Some(21), 31, 10));
        assert!(!should_emit(Some(21), 11, 10));
        assert!(should_emit(Some(21), 32, 10));
        assert!(should_emit(Some(21), 10, 10));
    }

    #[test]
    fn hysteresis_emits_first_and_programs_band() {
        let mut filter = hysteresis(10, Signedness::Signed);
        let emission = filter.observe(21).unwrap();
        assert_eq!(emission.value, 21);
        assert_eq!(emission.band, Some(Band { low: 11, high: 31 }));
        assert_eq!(filter.last_value(), Some(21));
    }

    #[test]
    fn hysteresis_suppresses_repeat_inside_band() {
        let mut filter = hysteresis(10, Signedness::Signed);
        filter.observe(21);
        assert!(filter.observe(21).is_none());
        assert!(filter.observe(25).is_none());
        assert_eq!(filter.last_value(), Some(21));
    }

    #[test]
    fn hysteresis_rearms_around_new_value() {
        let mut filter = hysteresis(3, Signedness::Unsigned);
        filter.observe(2);
        let emission = filter.observe(9).unwrap();
        assert_eq!(emission.band, Some(Band { low: 6, high: 12 }));
        assert!(filter.observe(6).is_none());
        assert!(filter.observe(5).is_some());
    }

    #[test]
    fn signed_band_goes_negative() {
        let mut filter = hysteresis(10, Signedness::Signed);
        let emission = filter.observe(-250).unwrap();
        assert_eq!(emission.band, Some(Band { low: -260, high: -240 }));
    }

    #[test]
    fn unsigned_band_clamped_at_zero() {
        let mut filter = hysteresis(10, Signedness::Unsigned);
        let emission = filter.observe(4).unwrap();
        assert_eq!(emission.band, Some(Band { low: 0, high: 14 }));
    }

    #[test]
    fn zero_tolerance_emits_every_change() {
        let mut filter = hysteresis(0, Signedness::Unsigned);
        assert!(filter.observe(5).is_some());
        assert!(filter.observe(5).is_none());
        assert!(filter.observe(6).is_some());
    }

    #[test]
    fn exact_match_clamps_to_ceiling() {
        let mut filter = ThresholdFilter::new(FilterPolicy::ExactMatch { ceiling: 800 });
        let emission = filter.observe(1200).unwrap();
        assert_eq!(emission, Emission { value: 800, band: None });
    }

    #[test]
    fn exact_match_suppresses_only_identical_values() {
        let mut filter = ThresholdFilter::new(FilterPolicy::ExactMatch { ceiling: 800 });
        assert!(filter.observe(300).is_some());
        assert!(filter.observe(300).is_none());
        assert!(filter.observe(301).is_some());
        assert!(filter.observe(300).is_some());
    }

    #[test]
    fn exact_match_suppresses_saturated_repeats() {
        let mut filter = ThresholdFilter::new(FilterPolicy::ExactMatch { ceiling: 800 });
        assert!(filter.observe(900).is_some());
        assert!(filter.observe(1500).is_none());
        assert_eq!(filter.last_value(), Some(800));
    }
}
