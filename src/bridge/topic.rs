// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic filters.
//!
//! A filter is a `/`-separated list of levels where `+` matches exactly one
//! level and `#` matches the remainder of the topic, including nothing at
//! all. `#` is only valid as the final level.
//!
//! ```text
//! home/+/temperature   matches  home/kitchen/temperature
//!                      rejects  home/kitchen/hall/temperature
//! home/#               matches  home, home/kitchen, home/kitchen/temperature
//! ```

use std::fmt;

use crate::error::ValueError;

/// A validated topic filter.
///
/// # Examples
///
/// ```
/// use sensor_bridge::bridge::TopicFilter;
///
/// let filter = TopicFilter::new("home/+/temperature").unwrap();
/// assert!(filter.matches("home/kitchen/temperature"));
/// assert!(!filter.matches("home/kitchen/hall/temperature"));
///
/// assert!(TopicFilter::new("home/#/x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validates a filter.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidTopicFilter`] if the filter is empty,
    /// contains a NUL character, uses a wildcard inside a level, or has a
    /// `#` anywhere but the last level.
    pub fn new(filter: impl Into<String>) -> Result<Self, ValueError> {
        let filter = filter.into();
        let reject = |reason| ValueError::InvalidTopicFilter {
            filter: filter.clone(),
            reason,
        };

        if filter.is_empty() {
            return Err(reject("filter is empty"));
        }
        if filter.contains('\0') {
            return Err(reject("filter contains NUL"));
        }
        if !rumqttc::valid_filter(&filter) {
            return Err(reject("wildcards must occupy a whole level, '#' only the last"));
        }

        Ok(Self(filter))
    }

    /// Returns the filter text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the filter contains a wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0.contains(['#', '+'])
    }

    /// Returns true if `topic` matches this filter.
    ///
    /// Topics starting with `$` are reserved for the broker and never match
    /// a filter whose first level is a wildcard.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        // rumqttc refuses every `$` topic, so the reserved prefix is compared here.
        match (topic.strip_prefix('$'), self.0.strip_prefix('$')) {
            (Some(topic), Some(filter)) => rumqttc::matches(topic, filter),
            (Some(_), None) => false,
            (None, _) => rumqttc::matches(topic, &self.0),
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TopicFilter {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
