// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sensor Bridge - forward hot-pluggable Tinkerforge sensors to MQTT.
//!
//! Sensors appear and disappear on the brick daemon's bus at runtime. Each
//! one reports value changes through a hardware threshold callback; readings
//! are filtered, normalized and published to an MQTT broker whose connection
//! may drop and must come back without losing subscriptions.
//!
//! # Components
//!
//! - [`filter`]: hysteresis band computation and per-sensor filter policy
//! - [`sensor`]: one open device, its worker task and change handler
//! - [`bus`]: the hardware bus: traits, TCP client, in-memory simulator
//! - [`registry`]: the live sensor set, driven by enumeration events
//! - [`bridge`]: the resilient MQTT publish/subscribe session
//! - [`runtime`]: wires everything together and survives bus loss
//!
//! # Supported Sensors
//!
//! | Device           | Code | Topic suffix    |
//! |------------------|------|-----------------|
//! | Temperature      | 216  | `temperature`   |
//! | Humidity         | 27   | `humidity`      |
//! | Ambient Light    | 21   | `ambient-light` |
//! | Distance IR      | 25   | `distance`      |
//!
//! # Quick Start
//!
//! ```no_run
//! use sensor_bridge::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> sensor_bridge::Result<()> {
//!     let settings = Settings::builder()
//!         .client_id("greenhouse")
//!         .broker_host("192.168.1.50")
//!         .topic("greenhouse/sensors")
//!         .build()?;
//!
//!     // Readings land on greenhouse/sensors/<measurement>.
//!     sensor_bridge::runtime::run(&settings, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod filter;
pub mod registry;
pub mod runtime;
pub mod sensor;
pub mod types;

pub use bridge::{BrokerConfig, Message, MessageId, MqttBridge, MqttBridgeBuilder, Publisher, QoS};
pub use bus::{BusClient, EnumerationEvent, EnumerationKind, MemoryBus, RetryPolicy, TcpConnector};
pub use config::{BusConfig, Settings};
pub use error::{BridgeError, BusError, ConfigError, Error, Result, SensorError, ValueError};
pub use filter::{Band, FilterPolicy, ThresholdFilter};
pub use registry::{EnumerationOutcome, SensorRegistry};
pub use runtime::Runtime;
pub use sensor::{Sensor, SensorKind};
pub use types::{ConnectionState, MeasurementType, TopicPrefix, Uid};
