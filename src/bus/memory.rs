// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process bus simulator.
//!
//! [`MemoryBus`] behaves like the hardware: threshold-armed devices only
//! call back when a reading leaves the programmed band, periodic devices call
//! back on every new reading, and attach/detach produce enumeration events.
//! Tests drive it directly.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use sensor_bridge::bus::{MemoryBus, MemoryConnector};
//! use sensor_bridge::types::Uid;
//!
//! let bus = Arc::new(MemoryBus::new());
//! bus.attach(Uid::new(*b"abc"), 216, 2150);
//! let connector = MemoryConnector::new(Arc::clone(&bus));
//! ```

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::filter::Band;
use crate::sensor::SensorKind;
use crate::types::Uid;

use super::{BusConnection, BusConnector, EnumerationEvent, EnumerationKind, SensorBus, ValueReceiver};

/// Capacity of the simulated enumeration and value channels.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct SimDevice {
    device_identifier: u16,
    value: i32,
    band: Option<Band>,
    period: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryState {
    devices: HashMap<Uid, SimDevice>,
    listeners: HashMap<Uid, mpsc::Sender<i32>>,
    enumerations: Option<mpsc::Sender<EnumerationEvent>>,
    failing_opens: HashSet<Uid>,
    thresholds: Vec<(Uid, Band)>,
}

impl MemoryState {
    fn emit(&self, event: EnumerationEvent) {
        let Some(tx) = self.enumerations.as_ref() else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::warn!(uid = %event.uid, error = %e, "Dropped simulated enumeration event");
        }
    }

    fn deliver(&self, uid: Uid, value: i32) -> bool {
        let Some(tx) = self.listeners.get(&uid) else {
            return false;
        };
        tx.try_send(value).is_ok()
    }
}

/// Simulated sensor bus.
#[derive(Debug, Default)]
pub struct MemoryBus {
    state: Mutex<MemoryState>,
}

impl MemoryBus {
    /// Creates an empty bus with no session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device and reports it as newly connected.
    pub fn attach(&self, uid: Uid, device_identifier: u16, value: i32) {
        let mut state = self.state.lock();
        state.devices.insert(
            uid,
            SimDevice {
                device_identifier,
                value,
                band: None,
                period: None,
            },
        );
        state.emit(EnumerationEvent {
            uid,
            device_identifier,
            kind: EnumerationKind::Connected,
        });
    }

    /// Detaches a device and reports it as disconnected.
    pub fn detach(&self, uid: Uid) {
        let mut state = self.state.lock();
        let Some(device) = state.devices.remove(&uid) else {
            return;
        };
        state.listeners.remove(&uid);
        state.emit(EnumerationEvent {
            uid,
            device_identifier: device.device_identifier,
            kind: EnumerationKind::Disconnected,
        });
    }

    /// Sends an arbitrary enumeration event on the current session.
    pub fn emit(&self, event: EnumerationEvent) {
        self.state.lock().emit(event);
    }

    /// Changes a device reading.
    ///
    /// The open handle is called back only if the hardware would trigger:
    /// the value lies outside the programmed band, or the device reports
    /// periodically and the value changed.
    ///
    /// Returns true if a callback was delivered.
    pub fn set_value(&self, uid: Uid, value: i32) -> bool {
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(&uid) else {
            return false;
        };

        let changed = device.value != value;
        device.value = value;
        let fires = match (device.band, device.period) {
            (_, Some(_)) => changed,
            (Some(band), None) => !band.contains(value),
            (None, None) => true,
        };

        fires && state.deliver(uid, value)
    }

    /// Delivers a value-change callback unconditionally.
    pub fn trigger(&self, uid: Uid, value: i32) -> bool {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(&uid) {
            device.value = value;
        }
        state.deliver(uid, value)
    }

    /// Makes every future `open` of this device fail.
    pub fn fail_open(&self, uid: Uid) {
        self.state.lock().failing_opens.insert(uid);
    }

    /// Returns true if a handle for the device is open.
    #[must_use]
    pub fn is_open(&self, uid: Uid) -> bool {
        self.state.lock().listeners.contains_key(&uid)
    }

    /// Returns the number of open handles.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Returns every band programmed on the device, oldest first.
    #[must_use]
    pub fn thresholds(&self, uid: Uid) -> Vec<Band> {
        self.state
            .lock()
            .thresholds
            .iter()
            .filter(|(u, _)| *u == uid)
            .map(|(_, band)| *band)
            .collect()
    }

    /// Returns the programmed callback period of the device.
    #[must_use]
    pub fn callback_period(&self, uid: Uid) -> Option<Duration> {
        self.state.lock().devices.get(&uid).and_then(|d| d.period)
    }

    /// Tears the current session down.
    ///
    /// The enumeration feed ends and every open handle stops receiving.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.enumerations = None;
        state.listeners.clear();
    }

    fn start_session(&self) -> mpsc::Receiver<EnumerationEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut state = self.state.lock();
        state.listeners.clear();
        state.enumerations = Some(tx);
        rx
    }
}

impl SensorBus for MemoryBus {
    async fn enumerate(&self) -> Result<(), BusError> {
        let state = self.state.lock();
        if state.enumerations.is_none() {
            return Err(BusError::Closed);
        }
        for (uid, device) in &state.devices {
            state.emit(EnumerationEvent {
                uid: *uid,
                device_identifier: device.device_identifier,
                kind: EnumerationKind::Available,
            });
        }
        Ok(())
    }

    fn open(&self, uid: Uid, _kind: SensorKind) -> Result<ValueReceiver, BusError> {
        let mut state = self.state.lock();
        if state.enumerations.is_none() {
            return Err(BusError::Closed);
        }
        if state.failing_opens.contains(&uid) || !state.devices.contains_key(&uid) {
            return Err(BusError::UnknownDevice(uid));
        }
        if state.listeners.contains_key(&uid) {
            return Err(BusError::AlreadyOpen(uid));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        state.listeners.insert(uid, tx);
        Ok(rx)
    }

    fn release(&self, uid: Uid) {
        self.state.lock().listeners.remove(&uid);
    }

    async fn read_value(&self, uid: Uid, _kind: SensorKind) -> Result<i32, BusError> {
        self.state
            .lock()
            .devices
            .get(&uid)
            .map(|device| device.value)
            .ok_or(BusError::UnknownDevice(uid))
    }

    async fn set_threshold(&self, uid: Uid, _kind: SensorKind, band: Band) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&uid)
            .ok_or(BusError::UnknownDevice(uid))?;
        device.band = Some(band);
        state.thresholds.push((uid, band));
        Ok(())
    }

    async fn set_callback_period(
        &self,
        uid: Uid,
        _kind: SensorKind,
        period: Duration,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&uid)
            .ok_or(BusError::UnknownDevice(uid))?;
        device.period = Some(period);
        Ok(())
    }
}

/// Connector handing out sessions of a shared [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryConnector {
    bus: Arc<MemoryBus>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryConnector {
    /// Creates a connector that always succeeds.
    #[must_use]
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self {
            bus,
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Makes the next `count` connection attempts fail.
    #[must_use]
    pub fn failing_attempts(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::Relaxed);
        self
    }

    /// Returns how many connection attempts were made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl BusConnector for MemoryConnector {
    type Bus = MemoryBus;

    async fn connect(&self, host: &str, port: u16) -> Result<BusConnection<MemoryBus>, BusError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let failing = self
            .failures_left
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BusError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("simulated refusal from {host}:{port}"),
            )));
        }

        let enumerations = self.bus.start_session();
        Ok(BusConnection::new(Arc::clone(&self.bus), enumerations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: Uid = Uid::new(*b"abc");

    async fn connected() -> (Arc<MemoryBus>, BusConnection<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let connection = MemoryConnector::new(Arc::clone(&bus))
            .connect("localhost", 4223)
            .await
            .unwrap();
        (bus, connection)
    }

    #[tokio::test]
    async fn attach_and_detach_emit_events() {
        let (bus, mut connection) = connected().await;

        bus.attach(UID, 27, 400);
        bus.detach(UID);

        let added = connection.next_event().await.unwrap();
        assert_eq!(added.kind, EnumerationKind::Connected);
        assert_eq!(added.device_identifier, 27);

        let removed = connection.next_event().await.unwrap();
        assert_eq!(removed.kind, EnumerationKind::Disconnected);
    }

    #[tokio::test]
    async fn threshold_gates_delivery() {
        let (bus, _connection) = connected().await;
        bus.attach(UID, 216, 2100);

        let mut values = bus.open(UID, SensorKind::Temperature).unwrap();
        bus.set_threshold(UID, SensorKind::Temperature, Band { low: 2090, high: 2110 })
            .await
            .unwrap();

        assert!(!bus.set_value(UID, 2110));
        assert!(bus.set_value(UID, 2111));
        assert_eq!(values.recv().await, Some(2111));
    }

    #[tokio::test]
    async fn periodic_devices_report_changes_only() {
        let (bus, _connection) = connected().await;
        bus.attach(UID, 25, 300);
        let _values = bus.open(UID, SensorKind::DistanceIr).unwrap();
        bus.set_callback_period(UID, SensorKind::DistanceIr, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!bus.set_value(UID, 300));
        assert!(bus.set_value(UID, 310));
    }

    #[tokio::test]
    async fn open_twice_fails() {
        let (bus, _connection) = connected().await;
        bus.attach(UID, 21, 0);
        let _values = bus.open(UID, SensorKind::AmbientLight).unwrap();
        assert!(matches!(
            bus.open(UID, SensorKind::AmbientLight),
            Err(BusError::AlreadyOpen(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_ends_session() {
        let (bus, connection) = connected().await;
        bus.attach(UID, 21, 0);
        let mut values = bus.open(UID, SensorKind::AmbientLight).unwrap();

        bus.disconnect();

        connection.wait_closed().await;
        assert_eq!(values.recv().await, None);
        assert!(bus.enumerate().await.is_err());
    }

    #[tokio::test]
    async fn connector_fails_scripted_attempts() {
        let bus = Arc::new(MemoryBus::new());
        let connector = MemoryConnector::new(bus).failing_attempts(2);

        assert!(connector.connect("localhost", 4223).await.is_err());
        assert!(connector.connect("localhost", 4223).await.is_err());
        assert!(connector.connect("localhost", 4223).await.is_ok());
        assert_eq!(connector.attempts(), 3);
    }
}
