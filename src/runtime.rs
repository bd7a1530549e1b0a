// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wiring of bus, registry and bridge.
//!
//! The runtime feeds every enumeration event of the current bus session
//! into a fresh [`SensorRegistry`]. When the session ends, every sensor is
//! closed and the bus is reconnected with the configured backoff.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::bridge::{MqttBridge, Publisher};
use crate::bus::{BusClient, BusConnector, TcpConnector};
use crate::config::{BusConfig, Settings};
use crate::error::Error;
use crate::registry::SensorRegistry;
use crate::types::{ConnectionState, TopicPrefix};

/// Drives sensors from the bus to a publisher.
#[derive(Debug)]
pub struct Runtime<C: BusConnector, P> {
    client: BusClient<C>,
    publisher: Arc<P>,
    topic: TopicPrefix,
    live_sensors: watch::Sender<usize>,
}

impl<C: BusConnector, P: Publisher> Runtime<C, P> {
    /// Creates a runtime; nothing connects until [`run_until`](Self::run_until).
    #[must_use]
    pub fn new(connector: C, bus: BusConfig, publisher: Arc<P>, topic: TopicPrefix) -> Self {
        let (live_sensors, _) = watch::channel(0);
        Self {
            client: BusClient::new(connector, bus),
            publisher,
            topic,
            live_sensors,
        }
    }

    /// Returns a receiver observing the bus connection state.
    #[must_use]
    pub fn watch_bus_state(&self) -> watch::Receiver<ConnectionState> {
        self.client.watch_state()
    }

    /// Returns a receiver observing the number of live sensors.
    #[must_use]
    pub fn watch_live_sensors(&self) -> watch::Receiver<usize> {
        self.live_sensors.subscribe()
    }

    /// Serves bus sessions until `shutdown` completes.
    ///
    /// Sensors of the current session are closed before this returns.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = self.serve() => {}
            () = shutdown => tracing::info!("Shutdown requested"),
        }
        self.live_sensors.send_replace(0);
    }

    async fn serve(&self) {
        loop {
            let mut connection = self.client.connect().await;
            let mut registry = SensorRegistry::new(
                Arc::clone(connection.bus()),
                Arc::clone(&self.publisher),
                self.topic.clone(),
            );

            while let Some(event) = connection.next_event().await {
                registry.on_enumeration_event(&event);
                self.live_sensors.send_replace(registry.len());
            }

            let closed = registry.len();
            registry.clear();
            self.live_sensors.send_replace(0);
            self.client.mark_disconnected();
            tracing::warn!(closed_sensors = closed, "Bus session ended, reconnecting");
        }
    }
}

/// Runs the bridge with production transports until `shutdown` completes.
///
/// The MQTT bridge connects in the background; the bus is reached over TCP.
/// On return the broker session has been closed.
///
/// # Errors
///
/// Returns an error if the broker configuration is incomplete.
pub async fn run<F>(settings: &Settings, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    let bridge = Arc::new(MqttBridge::connect(settings.broker().clone())?);

    let runtime = Runtime::new(
        TcpConnector::default(),
        settings.bus().clone(),
        Arc::clone(&bridge),
        settings.topic().clone(),
    );
    tracing::info!(
        bus_host = %settings.bus().host,
        bus_port = settings.bus().port,
        topic = %settings.topic(),
        "Sensor bridge started"
    );

    runtime.run_until(shutdown).await;
    drop(runtime);
    bridge.shutdown().await;
    Ok(())
}
