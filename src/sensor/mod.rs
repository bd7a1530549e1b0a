// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hot-pluggable sensors.
//!
//! A [`Sensor`] owns the hardware handle of one device. Once a change
//! handler is registered, a worker task receives the device's value
//! callbacks in order, runs them through the [`ThresholdFilter`], re-arms
//! the hardware band around the accepted value and then invokes the handler
//! with `(measurement, value)`.
//!
//! ```text
//! hardware callback -> filter -> set_threshold(band) -> handler(measurement, value)
//! ```
//!
//! Workers of different sensors run concurrently; callbacks of one sensor
//! are handled strictly one after another.

mod kind;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::bus::{SensorBus, ValueReceiver};
use crate::error::SensorError;
use crate::filter::ThresholdFilter;
use crate::types::{MeasurementType, Uid};

pub use kind::{
    AMBIENT_LIGHT_DEVICE_IDENTIFIER, DISTANCE_IR_CALLBACK_PERIOD, DISTANCE_IR_CEILING,
    DISTANCE_IR_DEVICE_IDENTIFIER, HUMIDITY_DEVICE_IDENTIFIER, SensorKind,
    TEMPERATURE_DEVICE_IDENTIFIER,
};

/// One open sensor.
///
/// The hardware handle is released by [`close`](Self::close) or on drop,
/// whichever comes first.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use sensor_bridge::bus::{BusConnector, MemoryBus, MemoryConnector};
/// use sensor_bridge::sensor::{Sensor, SensorKind};
/// use sensor_bridge::types::Uid;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Arc::new(MemoryBus::new());
/// let _connection = MemoryConnector::new(Arc::clone(&bus))
///     .connect("localhost", 4223)
///     .await
///     .unwrap();
///
/// let uid = Uid::new(*b"abc");
/// bus.attach(uid, 27, 455);
///
/// let sensor = Sensor::open(uid, SensorKind::Humidity, Arc::clone(&bus)).unwrap();
/// assert_eq!(sensor.current_value().await.unwrap(), 455);
///
/// sensor.register_change_handler(|measurement, value| {
///     println!("{measurement}: {value}");
/// }).unwrap();
///
/// sensor.close();
/// assert!(!bus.is_open(uid));
/// # }
/// ```
pub struct Sensor<B: SensorBus> {
    uid: Uid,
    kind: SensorKind,
    bus: Arc<B>,
    values: Mutex<Option<ValueReceiver>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<B: SensorBus> Sensor<B> {
    /// Acquires the hardware handle of a device.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::DeviceOpenFailed`] if the bus refuses the
    /// handle.
    pub fn open(uid: Uid, kind: SensorKind, bus: Arc<B>) -> Result<Self, SensorError> {
        let values = bus
            .open(uid, kind)
            .map_err(|source| SensorError::DeviceOpenFailed { uid, source })?;

        Ok(Self {
            uid,
            kind,
            bus,
            values: Mutex::new(Some(values)),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Returns the sensor variant.
    #[must_use]
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Returns the measurement this sensor reports.
    #[must_use]
    pub fn measurement(&self) -> MeasurementType {
        self.kind.measurement()
    }

    /// Returns true once the sensor has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reads the current value directly from the device.
    ///
    /// # Errors
    ///
    /// Fails if the sensor is closed or the bus request fails.
    pub async fn current_value(&self) -> Result<i32, SensorError> {
        if self.is_closed() {
            return Err(SensorError::Closed(self.uid));
        }
        Ok(self.bus.read_value(self.uid, self.kind).await?)
    }

    /// Arms the value-change callback.
    ///
    /// The worker first reports the current value, so the handler sees one
    /// event right away without waiting for the first real change. Must be
    /// called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the sensor is closed or a handler is already registered.
    pub fn register_change_handler<F>(&self, handler: F) -> Result<(), SensorError>
    where
        F: Fn(MeasurementType, i32) + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(SensorError::Closed(self.uid));
        }
        let values = self
            .values
            .lock()
            .take()
            .ok_or(SensorError::HandlerAlreadyRegistered(self.uid))?;

        let worker = Worker {
            uid: self.uid,
            kind: self.kind,
            bus: Arc::clone(&self.bus),
            filter: ThresholdFilter::new(self.kind.filter_policy()),
            handler,
        };
        let span = tracing::info_span!("sensor", uid = %self.uid, kind = %self.kind);
        let task = tokio::spawn(worker.run(values).instrument(span));
        *self.worker.lock() = Some(task);
        Ok(())
    }

    /// Stops the worker and releases the hardware handle.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        self.values.lock().take();
        self.bus.release(self.uid);
        tracing::debug!(uid = %self.uid, kind = %self.kind, "Sensor closed");
    }
}

impl<B: SensorBus> Drop for Sensor<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: SensorBus> std::fmt::Debug for Sensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct Worker<B, F> {
    uid: Uid,
    kind: SensorKind,
    bus: Arc<B>,
    filter: ThresholdFilter,
    handler: F,
}

impl<B, F> Worker<B, F>
where
    B: SensorBus,
    F: Fn(MeasurementType, i32) + Send + Sync + 'static,
{
    async fn run(mut self, mut values: ValueReceiver) {
        if let Some(period) = self.kind.callback_period()
            && let Err(e) = self.bus.set_callback_period(self.uid, self.kind, period).await
        {
            tracing::warn!(error = %e, "Failed to program callback period");
        }

        match self.bus.read_value(self.uid, self.kind).await {
            Ok(value) => self.on_value(value).await,
            Err(e) => tracing::warn!(error = %e, "Failed to read initial value"),
        }

        while let Some(raw) = values.recv().await {
            self.on_value(raw).await;
        }
        tracing::debug!("Value feed closed");
    }

    async fn on_value(&mut self, raw: i32) {
        let Some(emission) = self.filter.observe(raw) else {
            tracing::trace!(raw, "Reading suppressed");
            return;
        };

        if let Some(band) = emission.band
            && let Err(e) = self.bus.set_threshold(self.uid, self.kind, band).await
        {
            tracing::warn!(band = %band, error = %e, "Failed to re-arm threshold");
        }

        (self.handler)(self.kind.measurement(), emission.value);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::bus::{BusConnection, BusConnector, MemoryBus, MemoryConnector};
    use crate::filter::Band;

    const UID: Uid = Uid::new(*b"xyz");

    async fn bus_with(code: u16, value: i32) -> (Arc<MemoryBus>, BusConnection<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let connection = MemoryConnector::new(Arc::clone(&bus))
            .connect("localhost", 4223)
            .await
            .unwrap();
        bus.attach(UID, code, value);
        (bus, connection)
    }

    fn channel_handler() -> (
        impl Fn(MeasurementType, i32) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<(MeasurementType, i32)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |m: MeasurementType, v: i32| {
                let _ = tx.send((m, v));
            },
            rx,
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn open_failure_reports_uid() {
        let (bus, _connection) = bus_with(216, 0).await;
        bus.fail_open(UID);

        let err = Sensor::open(UID, SensorKind::Temperature, bus).unwrap_err();
        assert!(matches!(err, SensorError::DeviceOpenFailed { uid, .. } if uid == UID));
    }

    #[tokio::test]
    async fn handler_gets_initial_value_and_band_is_armed() {
        let (bus, _connection) = bus_with(216, 2150).await;
        let sensor = Sensor::open(UID, SensorKind::Temperature, Arc::clone(&bus)).unwrap();
        let (handler, mut events) = channel_handler();
        sensor.register_change_handler(handler).unwrap();

        assert_eq!(
            events.recv().await,
            Some((MeasurementType::Temperature, 2150))
        );
        settle().await;
        assert_eq!(bus.thresholds(UID), vec![Band { low: 2140, high: 2160 }]);
    }

    #[tokio::test]
    async fn crossings_rearm_band() {
        let (bus, _connection) = bus_with(27, 400).await;
        let sensor = Sensor::open(UID, SensorKind::Humidity, Arc::clone(&bus)).unwrap();
        let (handler, mut events) = channel_handler();
        sensor.register_change_handler(handler).unwrap();
        events.recv().await.unwrap();
        settle().await;

        // Within [397, 403]: the hardware stays silent.
        assert!(!bus.set_value(UID, 403));
        assert!(bus.set_value(UID, 410));
        assert_eq!(events.recv().await, Some((MeasurementType::Humidity, 410)));
        settle().await;

        assert_eq!(
            bus.thresholds(UID),
            vec![Band { low: 397, high: 403 }, Band { low: 407, high: 413 }]
        );
    }

    #[tokio::test]
    async fn distance_is_clamped_and_deduplicated() {
        let (bus, _connection) = bus_with(25, 950).await;
        let sensor = Sensor::open(UID, SensorKind::DistanceIr, Arc::clone(&bus)).unwrap();
        let (handler, mut events) = channel_handler();
        sensor.register_change_handler(handler).unwrap();

        assert_eq!(events.recv().await, Some((MeasurementType::Distance, 800)));
        settle().await;
        assert_eq!(bus.callback_period(UID), Some(Duration::from_secs(1)));

        bus.trigger(UID, 1200);
        bus.trigger(UID, 310);
        assert_eq!(events.recv().await, Some((MeasurementType::Distance, 310)));
        assert!(bus.thresholds(UID).is_empty());
    }

    #[tokio::test]
    async fn second_handler_rejected() {
        let (bus, _connection) = bus_with(21, 0).await;
        let sensor = Sensor::open(UID, SensorKind::AmbientLight, bus).unwrap();
        sensor.register_change_handler(|_, _| {}).unwrap();
        assert!(matches!(
            sensor.register_change_handler(|_, _| {}),
            Err(SensorError::HandlerAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (bus, _connection) = bus_with(21, 0).await;
        let sensor = Sensor::open(UID, SensorKind::AmbientLight, Arc::clone(&bus)).unwrap();
        assert!(bus.is_open(UID));

        sensor.close();
        assert!(sensor.is_closed());
        assert!(!bus.is_open(UID));

        // A new handle for the same device must survive a second close.
        let reopened = Sensor::open(UID, SensorKind::AmbientLight, Arc::clone(&bus)).unwrap();
        sensor.close();
        assert!(bus.is_open(UID));

        assert!(matches!(
            sensor.current_value().await,
            Err(SensorError::Closed(_))
        ));
        drop(reopened);
        assert!(!bus.is_open(UID));
    }

    #[tokio::test]
    async fn drop_releases_handle() {
        let (bus, _connection) = bus_with(27, 0).await;
        let sensor = Sensor::open(UID, SensorKind::Humidity, Arc::clone(&bus)).unwrap();
        sensor.register_change_handler(|_, _| {}).unwrap();
        drop(sensor);
        assert_eq!(bus.open_count(), 0);
    }
}
