// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the sensor bridge.
//!
//! Each layer has its own error enum: value validation, configuration, the
//! hardware sensor bus, individual sensors and the MQTT bridge. They all fold
//! into [`Error`] for callers that do not care which layer failed.

use thiserror::Error;

use crate::types::Uid;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A value failed validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// The process configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The hardware sensor bus failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// A sensor failed.
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),

    /// The MQTT bridge failed.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A UID did not contain three printable ASCII characters.
    #[error("invalid sensor uid: {0:?}")]
    InvalidUid(String),

    /// A topic prefix was empty.
    #[error("topic prefix must not be empty")]
    EmptyTopicPrefix,

    /// A topic filter violates the wildcard rules.
    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidTopicFilter {
        /// The rejected filter.
        filter: String,
        /// Which rule was broken.
        reason: &'static str,
    },
}

/// Missing or invalid process configuration.
///
/// These prevent startup entirely and are reported before any connection
/// attempt is made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No MQTT client id was given.
    #[error("client id not set")]
    MissingClientId,

    /// No MQTT broker address was given.
    #[error("broker address not set")]
    MissingBroker,

    /// No topic prefix was given.
    #[error("topic not set")]
    MissingTopic,
}

/// Errors raised by the hardware sensor bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus session has been torn down.
    #[error("bus connection closed")]
    Closed,

    /// A packet could not be decoded.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// A request got no response in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The device answered with a non-zero error code.
    #[error("device {uid} returned error code {code}")]
    Device {
        /// Device that rejected the request.
        uid: Uid,
        /// Error code from the response header.
        code: u8,
    },

    /// The device has never been enumerated on this session.
    #[error("unknown device {0}")]
    UnknownDevice(Uid),

    /// A handle for this device is already open.
    #[error("device {0} is already open")]
    AlreadyOpen(Uid),
}

/// Errors raised by a single sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The hardware handle could not be acquired.
    #[error("failed to open sensor {uid}: {source}")]
    DeviceOpenFailed {
        /// Sensor that failed to open.
        uid: Uid,
        /// Underlying bus failure.
        #[source]
        source: BusError,
    },

    /// A change handler is already armed on this sensor.
    #[error("change handler already registered on sensor {0}")]
    HandlerAlreadyRegistered(Uid),

    /// The sensor has been closed.
    #[error("sensor {0} is closed")]
    Closed(Uid),

    /// A bus accessor failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors raised by the MQTT bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The MQTT client rejected the request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The topic pattern is already in the subscription table.
    #[error("already subscribed to {0:?}")]
    AlreadySubscribed(String),

    /// The topic pattern is not in the subscription table.
    #[error("not subscribed to {0:?}")]
    NotSubscribed(String),

    /// The topic filter is malformed.
    #[error(transparent)]
    InvalidFilter(#[from] ValueError),

    /// The bridge has been shut down.
    #[error("bridge is shut down")]
    ShutDown,
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
