// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus connection state machine with retry.

use tokio::sync::watch;

use crate::config::BusConfig;
use crate::types::ConnectionState;

use super::{BusConnection, BusConnector, SensorBus};

/// Client for the hardware bus daemon.
///
/// Moves through `Disconnected -> Connecting -> Connected`, retrying failed
/// attempts forever according to the configured [`RetryPolicy`](super::RetryPolicy).
///
/// # Examples
///
/// ```no_run
/// use sensor_bridge::bus::{BusClient, TcpConnector};
/// use sensor_bridge::config::BusConfig;
///
/// # async fn example() {
/// let client = BusClient::new(TcpConnector::default(), BusConfig::default());
/// let mut connection = client.connect().await;
/// while let Some(event) = connection.next_event().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct BusClient<C> {
    connector: C,
    config: BusConfig,
    state: watch::Sender<ConnectionState>,
}

impl<C: BusConnector> BusClient<C> {
    /// Creates a client that is not yet connected.
    #[must_use]
    pub fn new(connector: C, config: BusConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            state,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connects to the daemon, retrying until it succeeds.
    ///
    /// Once connected, an enumerate request is sent so every device already
    /// attached is reported on the returned feed.
    pub async fn connect(&self) -> BusConnection<C::Bus> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        let mut failures: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);

            match self.connector.connect(host, port).await {
                Ok(connection) => {
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::info!(host = %host, port, "Connected to bus daemon");

                    if let Err(e) = connection.bus().enumerate().await {
                        tracing::warn!(error = %e, "Enumerate request failed");
                    }
                    return connection;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.retry.delay_for_attempt(failures);
                    self.state.send_replace(ConnectionState::Disconnected);

                    tracing::error!(
                        host = %host,
                        port,
                        error = %e,
                        attempt = failures,
                        retry_in_secs = delay.as_secs(),
                        "Connection to bus daemon failed"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Records that the current session has been torn down.
    pub fn mark_disconnected(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::bus::{EnumerationKind, MemoryBus, MemoryConnector, RetryPolicy};
    use crate::sensor::TEMPERATURE_DEVICE_IDENTIFIER;
    use crate::types::Uid;

    fn config() -> BusConfig {
        BusConfig::default().with_retry(RetryPolicy::new().with_step(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let bus = Arc::new(MemoryBus::new());
        let client = BusClient::new(MemoryConnector::new(bus), config());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_enumerates_present_devices() {
        let bus = Arc::new(MemoryBus::new());
        let uid = Uid::new(*b"abc");
        bus.attach(uid, TEMPERATURE_DEVICE_IDENTIFIER, 2150);

        let client = BusClient::new(MemoryConnector::new(Arc::clone(&bus)), config());
        let mut connection = client.connect().await;

        assert_eq!(client.state(), ConnectionState::Connected);
        let event = connection.next_event().await.unwrap();
        assert_eq!(event.uid, uid);
        assert_eq!(event.kind, EnumerationKind::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_with_linear_backoff() {
        let bus = Arc::new(MemoryBus::new());
        let connector = MemoryConnector::new(Arc::clone(&bus)).failing_attempts(3);
        let client = BusClient::new(connector, config());

        let started = tokio::time::Instant::now();
        let _connection = client.connect().await;

        // 5 s + 10 s + 15 s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn mark_disconnected_updates_watchers() {
        let bus = Arc::new(MemoryBus::new());
        let client = BusClient::new(MemoryConnector::new(bus), config());
        let _connection = client.connect().await;

        let mut rx = client.watch_state();
        client.mark_disconnected();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }
}
