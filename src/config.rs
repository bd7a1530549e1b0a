// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process configuration.
//!
//! [`Settings`] gathers everything the bridge needs before it can start:
//! where the bus daemon lives, how to reach the MQTT broker and under which
//! topic prefix readings are published. Required values are checked by
//! [`SettingsBuilder::build`] before any connection is attempted.
//!
//! # Examples
//!
//! ```
//! use sensor_bridge::config::Settings;
//!
//! let settings = Settings::builder()
//!     .client_id("greenhouse")
//!     .broker_host("mqtt.local")
//!     .topic("greenhouse/sensors")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(settings.topic().as_str(), "greenhouse/sensors/");
//! assert_eq!(settings.broker().port(), 1883);
//! ```

use std::time::Duration;

use crate::bridge::BrokerConfig;
use crate::bus::{DEFAULT_BUS_HOST, DEFAULT_BUS_PORT, RetryPolicy};
use crate::error::ConfigError;
use crate::types::TopicPrefix;

/// Where and how to reach the bus daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Daemon host name or address.
    pub host: String,
    /// Daemon TCP port.
    pub port: u16,
    /// Backoff between failed connection attempts.
    pub retry: RetryPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BUS_HOST.to_string(),
            port: DEFAULT_BUS_PORT,
            retry: RetryPolicy::default(),
        }
    }
}

impl BusConfig {
    /// Sets the daemon host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the daemon port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    bus: BusConfig,
    broker: BrokerConfig,
    topic: TopicPrefix,
}

impl Settings {
    /// Creates a builder with every optional value at its default.
    #[must_use]
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Returns the bus daemon configuration.
    #[must_use]
    pub fn bus(&self) -> &BusConfig {
        &self.bus
    }

    /// Returns the MQTT broker configuration.
    #[must_use]
    pub fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    /// Returns the normalized topic prefix.
    #[must_use]
    pub fn topic(&self) -> &TopicPrefix {
        &self.topic
    }
}

/// Builder for [`Settings`].
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    client_id: Option<String>,
    broker_host: Option<String>,
    broker_port: Option<u16>,
    keep_alive: Option<Duration>,
    credentials: Option<(String, String)>,
    topic: Option<String>,
    bus: BusConfig,
}

impl SettingsBuilder {
    /// Sets the MQTT client id (required).
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the MQTT broker host (required).
    #[must_use]
    pub fn broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker_host = Some(host.into());
        self
    }

    /// Sets the MQTT broker port (default: 1883).
    #[must_use]
    pub fn broker_port(mut self, port: u16) -> Self {
        self.broker_port = Some(port);
        self
    }

    /// Sets the MQTT keep-alive interval (default: 10 seconds).
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Sets the broker user name and password.
    ///
    /// An empty user name leaves the session unauthenticated.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the topic prefix readings are published under (required).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the bus daemon host (default: `localhost`).
    #[must_use]
    pub fn bus_host(mut self, host: impl Into<String>) -> Self {
        self.bus.host = host.into();
        self
    }

    /// Sets the bus daemon port (default: 4223).
    #[must_use]
    pub fn bus_port(mut self, port: u16) -> Self {
        self.bus.port = port;
        self
    }

    /// Sets the bus connection retry policy.
    #[must_use]
    pub fn bus_retry(mut self, retry: RetryPolicy) -> Self {
        self.bus.retry = retry;
        self
    }

    /// Validates and builds the settings.
    ///
    /// # Errors
    ///
    /// Returns the first missing required value, checked in the order
    /// client id, broker host, topic.
    pub fn build(self) -> Result<Settings, ConfigError> {
        let client_id = non_empty(self.client_id).ok_or(ConfigError::MissingClientId)?;
        let broker_host = non_empty(self.broker_host).ok_or(ConfigError::MissingBroker)?;
        let topic = non_empty(self.topic)
            .and_then(|t| TopicPrefix::new(t).ok())
            .ok_or(ConfigError::MissingTopic)?;

        let mut broker = BrokerConfig::new(client_id, broker_host);
        if let Some(port) = self.broker_port {
            broker = broker.with_port(port);
        }
        if let Some(keep_alive) = self.keep_alive {
            broker = broker.with_keep_alive(keep_alive);
        }
        if let Some((username, password)) = self.credentials {
            broker = broker.with_credentials(username, password);
        }

        Ok(Settings {
            bus: self.bus,
            broker,
            topic,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> SettingsBuilder {
        Settings::builder()
            .client_id("id")
            .broker_host("broker")
            .topic("home")
    }

    #[test]
    fn bus_config_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4223);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn builds_with_defaults() {
        let settings = complete().build().unwrap();
        assert_eq!(settings.topic().as_str(), "home/");
        assert_eq!(settings.broker().client_id(), "id");
        assert_eq!(settings.broker().host(), "broker");
        assert_eq!(settings.broker().port(), 1883);
        assert_eq!(settings.broker().keep_alive(), Duration::from_secs(10));
        assert!(settings.broker().credentials().is_none());
        assert_eq!(settings.bus(), &BusConfig::default());
    }

    #[test]
    fn missing_values_reported_in_order() {
        assert_eq!(
            Settings::builder().build().unwrap_err(),
            ConfigError::MissingClientId
        );
        assert_eq!(
            Settings::builder().client_id("id").topic("t").build().unwrap_err(),
            ConfigError::MissingBroker
        );
        assert_eq!(
            Settings::builder()
                .client_id("id")
                .broker_host("b")
                .build()
                .unwrap_err(),
            ConfigError::MissingTopic
        );
    }

    #[test]
    fn empty_values_count_as_missing() {
        assert_eq!(
            Settings::builder()
                .client_id("")
                .broker_host("b")
                .topic("t")
                .build()
                .unwrap_err(),
            ConfigError::MissingClientId
        );
        assert_eq!(complete().topic("").build().unwrap_err(), ConfigError::MissingTopic);
    }

    #[test]
    fn overrides_applied() {
        let settings = complete()
            .broker_port(8883)
            .keep_alive(Duration::from_secs(30))
            .credentials("user", "secret")
            .bus_host("10.0.0.2")
            .bus_port(4280)
            .build()
            .unwrap();

        assert_eq!(settings.broker().port(), 8883);
        assert_eq!(settings.broker().keep_alive(), Duration::from_secs(30));
        assert_eq!(settings.broker().credentials(), Some(("user", "secret")));
        assert_eq!(settings.bus().host, "10.0.0.2");
        assert_eq!(settings.bus().port, 4280);
    }
}
