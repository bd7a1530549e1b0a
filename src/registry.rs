// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live set of sensors, driven by enumeration events.
//!
//! The registry is mutated only through `&mut self`, so enumeration events
//! are handled one at a time and the at-most-one-sensor-per-uid rule holds.
//! Value callbacks never touch the registry; they publish straight through
//! the [`Publisher`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::{Publisher, QoS};
use crate::bus::{EnumerationEvent, SensorBus};
use crate::sensor::{Sensor, SensorKind};
use crate::types::{MeasurementType, TopicPrefix, Uid};

/// What an enumeration event did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationOutcome {
    /// A sensor was opened and armed.
    Added(SensorKind),
    /// A sensor was closed and removed.
    Removed,
    /// The uid is already live; the event was ignored.
    DuplicateIgnored,
    /// A disconnect named a uid that is not live.
    UnknownUidIgnored,
    /// The device type is not supported.
    UnsupportedDevice(u16),
    /// The hardware handle could not be acquired.
    OpenFailed,
    /// The raw uid could not be normalized.
    InvalidUid,
}

/// Registry of live sensors keyed by uid.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use sensor_bridge::bridge::{MessageId, Publisher, QoS};
/// use sensor_bridge::bus::{BusConnector, EnumerationEvent, MemoryBus, MemoryConnector};
/// use sensor_bridge::error::BridgeError;
/// use sensor_bridge::registry::{EnumerationOutcome, SensorRegistry};
/// use sensor_bridge::sensor::SensorKind;
/// use sensor_bridge::types::{TopicPrefix, Uid};
///
/// struct Stdout;
///
/// impl Publisher for Stdout {
///     fn publish(&self, topic: &str, payload: Vec<u8>, _: QoS, _: bool) -> Result<MessageId, BridgeError> {
///         println!("{topic} {}", String::from_utf8_lossy(&payload));
///         Ok(MessageId::new(0))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Arc::new(MemoryBus::new());
/// let _connection = MemoryConnector::new(Arc::clone(&bus))
///     .connect("localhost", 4223)
///     .await
///     .unwrap();
/// bus.attach(Uid::new(*b"abc"), 216, 2150);
///
/// let prefix = TopicPrefix::new("home").unwrap();
/// let mut registry = SensorRegistry::new(bus, Arc::new(Stdout), prefix);
///
/// let event = EnumerationEvent::new(Uid::new(*b"abc"), 216, 0);
/// assert_eq!(
///     registry.on_enumeration_event(&event),
///     EnumerationOutcome::Added(SensorKind::Temperature)
/// );
/// assert_eq!(registry.len(), 1);
/// # }
/// ```
pub struct SensorRegistry<B: SensorBus, P: Publisher> {
    bus: Arc<B>,
    publisher: Arc<P>,
    topic: TopicPrefix,
    sensors: HashMap<Uid, Sensor<B>>,
}

impl<B: SensorBus, P: Publisher> SensorRegistry<B, P> {
    /// Creates an empty registry for one bus session.
    #[must_use]
    pub fn new(bus: Arc<B>, publisher: Arc<P>, topic: TopicPrefix) -> Self {
        Self {
            bus,
            publisher,
            topic,
            sensors: HashMap::new(),
        }
    }

    /// Handles an enumeration event with a raw, not yet normalized uid.
    pub fn on_enumeration(
        &mut self,
        raw_uid: &str,
        device_identifier: u16,
        enumeration_type: u8,
    ) -> EnumerationOutcome {
        match Uid::normalize(raw_uid) {
            Ok(uid) => self.on_enumeration_event(&EnumerationEvent::new(
                uid,
                device_identifier,
                enumeration_type,
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring enumeration event");
                EnumerationOutcome::InvalidUid
            }
        }
    }

    /// Handles one enumeration event.
    ///
    /// Must run to completion before the next event is handled; creation or
    /// teardown of the sensor is finished when this returns. Must be called
    /// within a tokio runtime.
    pub fn on_enumeration_event(&mut self, event: &EnumerationEvent) -> EnumerationOutcome {
        let uid = event.uid;

        if !event.kind.is_present() {
            return match self.sensors.remove(&uid) {
                Some(sensor) => {
                    sensor.close();
                    tracing::info!(uid = %uid, kind = %sensor.kind(), "Sensor removed");
                    EnumerationOutcome::Removed
                }
                None => {
                    tracing::debug!(uid = %uid, "Disconnect for unknown sensor ignored");
                    EnumerationOutcome::UnknownUidIgnored
                }
            };
        }

        if self.sensors.contains_key(&uid) {
            tracing::warn!(uid = %uid, "Sensor already registered, ignoring connect");
            return EnumerationOutcome::DuplicateIgnored;
        }

        let Some(kind) = SensorKind::from_device_identifier(event.device_identifier) else {
            tracing::debug!(
                uid = %uid,
                device_identifier = event.device_identifier,
                "Unsupported device ignored"
            );
            return EnumerationOutcome::UnsupportedDevice(event.device_identifier);
        };

        let sensor = match Sensor::open(uid, kind, Arc::clone(&self.bus)) {
            Ok(sensor) => sensor,
            Err(e) => {
                tracing::error!(uid = %uid, kind = %kind, error = %e, "Failed to open sensor");
                return EnumerationOutcome::OpenFailed;
            }
        };

        let forward = forwarder(Arc::clone(&self.publisher), self.topic.clone());
        if let Err(e) = sensor.register_change_handler(forward) {
            tracing::error!(uid = %uid, kind = %kind, error = %e, "Failed to arm sensor");
            return EnumerationOutcome::OpenFailed;
        }

        tracing::info!(uid = %uid, kind = %kind, "Sensor added");
        self.sensors.insert(uid, sensor);
        EnumerationOutcome::Added(kind)
    }

    /// Closes and removes every sensor.
    pub fn clear(&mut self) {
        for (_, sensor) in self.sensors.drain() {
            sensor.close();
        }
    }

    /// Returns the number of live sensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Returns true if no sensor is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Returns true if a sensor with this uid is live.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.sensors.contains_key(&uid)
    }

    /// Returns the kind of a live sensor.
    #[must_use]
    pub fn kind_of(&self, uid: Uid) -> Option<SensorKind> {
        self.sensors.get(&uid).map(Sensor::kind)
    }

    /// Returns the uids of all live sensors, sorted.
    #[must_use]
    pub fn uids(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.sensors.keys().copied().collect();
        uids.sort_unstable();
        uids
    }
}

/// Builds the change handler that publishes readings under `prefix`.
fn forwarder<P: Publisher>(
    publisher: Arc<P>,
    prefix: TopicPrefix,
) -> impl Fn(MeasurementType, i32) + Send + Sync + 'static {
    move |measurement: MeasurementType, value: i32| {
        let topic = prefix.topic_for(measurement);
        match publisher.publish(&topic, value.to_string().into_bytes(), QoS::AtMostOnce, true) {
            Ok(id) => tracing::debug!(topic = %topic, value, id = %id, "Published reading"),
            Err(e) => tracing::warn!(topic = %topic, value, error = %e, "Failed to publish reading"),
        }
    }
}

impl<B: SensorBus, P: Publisher> std::fmt::Debug for SensorRegistry<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorRegistry")
            .field("topic", &self.topic)
            .field("sensors", &self.uids())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::bridge::MessageId;
    use crate::bus::{BusConnection, BusConnector, MemoryBus, MemoryConnector};
    use crate::error::BridgeError;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl Publisher for Recorder {
        fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _qos: QoS,
            _retain: bool,
        ) -> Result<MessageId, BridgeError> {
            let mut published = self.0.lock();
            published.push((topic.to_string(), String::from_utf8_lossy(&payload).into_owned()));
            Ok(MessageId::new(u64::try_from(published.len()).unwrap()))
        }
    }

    async fn registry() -> (
        Arc<MemoryBus>,
        BusConnection<MemoryBus>,
        SensorRegistry<MemoryBus, Recorder>,
    ) {
        let bus = Arc::new(MemoryBus::new());
        let connection = MemoryConnector::new(Arc::clone(&bus))
            .connect("localhost", 4223)
            .await
            .unwrap();
        let registry = SensorRegistry::new(
            Arc::clone(&bus),
            Arc::new(Recorder::default()),
            TopicPrefix::new("t").unwrap(),
        );
        (bus, connection, registry)
    }

    #[tokio::test]
    async fn raw_uid_is_normalized() {
        let (bus, _connection, mut registry) = registry().await;
        bus.attach(Uid::new(*b"abc"), 27, 0);

        assert_eq!(
            registry.on_enumeration("abc\n", 27, 1),
            EnumerationOutcome::Added(SensorKind::Humidity)
        );
        assert!(registry.contains(Uid::new(*b"abc")));
        assert_eq!(registry.on_enumeration("a\0", 27, 1), EnumerationOutcome::InvalidUid);
    }

    #[tokio::test]
    async fn clear_closes_everything() {
        let (bus, _connection, mut registry) = registry().await;
        for (i, code) in [216u16, 27, 21, 25].into_iter().enumerate() {
            let uid = Uid::new([b'a', b'0' + u8::try_from(i).unwrap(), b'z']);
            bus.attach(uid, code, 1);
            assert!(matches!(
                registry.on_enumeration_event(&EnumerationEvent::new(uid, code, 0)),
                EnumerationOutcome::Added(_)
            ));
        }
        assert_eq!(registry.len(), 4);
        assert_eq!(bus.open_count(), 4);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(bus.open_count(), 0);
    }

    #[tokio::test]
    async fn kind_lookup() {
        let (bus, _connection, mut registry) = registry().await;
        let uid = Uid::new(*b"d1s");
        bus.attach(uid, 25, 100);
        registry.on_enumeration_event(&EnumerationEvent::new(uid, 25, 1));
        assert_eq!(registry.kind_of(uid), Some(SensorKind::DistanceIr));
        assert_eq!(registry.uids(), vec![uid]);
    }
}
