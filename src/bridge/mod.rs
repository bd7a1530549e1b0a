// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resilient MQTT publish/subscribe bridge.
//!
//! [`MqttBridge`] owns one broker session. A background network loop
//! connects, reconnects after every failure and re-issues the whole
//! subscription table after each successful `ConnAck`, so subscriptions
//! survive broker restarts without the caller noticing.
//!
//! Publishing never waits for the broker: requests are queued for the
//! network loop and a local [`MessageId`] is returned immediately.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use sensor_bridge::bridge::{MqttBridge, QoS};
//!
//! # async fn example() -> sensor_bridge::Result<()> {
//! let bridge = MqttBridge::builder()
//!     .client_id("greenhouse")
//!     .host("192.168.1.50")
//!     .credentials("user", "password")
//!     .build()?;
//!
//! bridge.subscribe("greenhouse/+/set", QoS::AtMostOnce, |message| {
//!     println!("{} -> {:?}", message.topic, message.payload_str());
//! })?;
//!
//! if bridge.wait_connected(Duration::from_secs(5)).await {
//!     bridge.publish("greenhouse/temperature", "2150", QoS::AtMostOnce, true)?;
//! }
//!
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod network_loop;
mod session;
mod subscriptions;
mod topic;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{BridgeError, ConfigError};
use crate::types::ConnectionState;

use session::BrokerSession;
use subscriptions::SubscriptionTable;

pub use rumqttc::QoS;
pub use subscriptions::MessageHandler;
pub use topic::TopicFilter;

/// Default MQTT broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default MQTT keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Default wait between a failed network step and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default number of requests queued for the network loop.
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// An MQTT application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Whether the broker delivered a retained message.
    pub retain: bool,
}

impl Message {
    /// Creates a non-retained message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Returns the payload as text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Locally assigned id of a queued publish.
///
/// Ids increase monotonically per bridge and carry no broker meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something readings can be published to.
///
/// Implemented by [`MqttBridge`]; the sensor registry only depends on this
/// trait so it can be driven without a broker.
pub trait Publisher: Send + Sync + 'static {
    /// Queues a message for publication.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be queued.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, BridgeError>;
}

/// Configuration for an MQTT broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    client_id: String,
    host: String,
    port: u16,
    keep_alive: Duration,
    credentials: Option<(String, String)>,
    reconnect_delay: Duration,
    request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            host: String::new(),
            port: DEFAULT_BROKER_PORT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            credentials: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

impl BrokerConfig {
    /// Creates a configuration with default port and timings.
    #[must_use]
    pub fn new(client_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: host.into(),
            ..Self::default()
        }
    }

    /// Sets the broker port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the keep-alive interval.
    ///
    /// Zero disables keep-alive; other values are used at whole-second
    /// resolution.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the user name and password.
    ///
    /// An empty user name leaves the session unauthenticated.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        self.credentials = (!username.is_empty()).then(|| (username, password.into()));
        self
    }

    /// Sets the wait after a failed network step.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets how many requests may be queued for the network loop.
    #[must_use]
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Returns the client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the credentials, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns the wait after a failed network step.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Returns the request queue capacity.
    #[must_use]
    pub fn request_capacity(&self) -> usize {
        self.request_capacity
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        if self.host.is_empty() {
            return Err(ConfigError::MissingBroker);
        }
        Ok(())
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        // Sub-second keep-alives are rejected by the client.
        let keep_alive = Duration::from_secs(self.keep_alive.as_secs());
        options.set_keep_alive(keep_alive);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}

/// State shared between the bridge handle and its network loop.
pub(crate) struct Inner<S> {
    session: S,
    subscriptions: Mutex<SubscriptionTable>,
    state: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU64,
    next_message_id: AtomicU64,
    reconnect_delay: Duration,
}

impl<S: BrokerSession> Inner<S> {
    pub(crate) fn new(session: S, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            session,
            subscriptions: Mutex::new(SubscriptionTable::default()),
            state,
            reconnect_attempts: AtomicU64::new(0),
            next_message_id: AtomicU64::new(0),
            reconnect_delay,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub(crate) fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Marks the session up and snapshots the subscription table for the
    /// network loop to restore.
    ///
    /// The table lock is held across both steps so a concurrent `subscribe`
    /// is issued exactly once: either in the snapshot or by itself.
    pub(crate) fn on_connected(&self) -> Vec<(TopicFilter, QoS)> {
        let table = self.subscriptions.lock();
        self.set_state(ConnectionState::Connected);

        let filters: Vec<_> = table
            .filters()
            .map(|(filter, qos)| (filter.clone(), qos))
            .collect();
        tracing::info!(subscriptions = filters.len(), "Connected to MQTT broker");
        filters
    }

    /// Records a failed network step and returns the failure count.
    pub(crate) fn on_connection_lost(&self) -> u64 {
        self.set_state(ConnectionState::Connecting);
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Invokes every handler whose filter matches the message topic.
    pub(crate) fn dispatch(&self, message: &Message) {
        let handlers = self.subscriptions.lock().matching(&message.topic);
        tracing::debug!(
            topic = %message.topic,
            handlers = handlers.len(),
            "MQTT message received"
        );
        for handler in handlers {
            handler(message);
        }
    }

    pub(crate) fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, BridgeError> {
        self.session.publish(topic, qos, retain, payload)?;
        let id = MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::trace!(topic = %topic, id = %id, "Queued publish");
        Ok(id)
    }

    pub(crate) fn subscribe(
        &self,
        filter: TopicFilter,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<(), BridgeError> {
        let mut table = self.subscriptions.lock();
        table.insert(filter.clone(), qos, handler)?;

        if self.state().is_connected()
            && let Err(e) = self.session.subscribe(filter.as_str(), qos)
        {
            let _ = table.remove(&filter);
            return Err(e.into());
        }

        tracing::debug!(filter = %filter, "Subscribed");
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), BridgeError> {
        let mut table = self.subscriptions.lock();
        table.remove(filter)?;

        if self.state().is_connected() {
            self.session.unsubscribe(filter.as_str())?;
        }

        tracing::debug!(filter = %filter, "Unsubscribed");
        Ok(())
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

/// A resilient MQTT broker session.
///
/// Dropping the bridge stops its network loop; [`MqttBridge::shutdown`]
/// additionally waits for the loop to finish.
pub struct MqttBridge {
    inner: Arc<Inner<AsyncClient>>,
    config: BrokerConfig,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBridge {
    /// Creates a new builder for configuring a bridge.
    #[must_use]
    pub fn builder() -> MqttBridgeBuilder {
        MqttBridgeBuilder::default()
    }

    /// Starts a bridge for the given configuration.
    ///
    /// Returns immediately; the network loop connects in the background and
    /// keeps retrying while the broker is unreachable. Must be called within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the client id or host is empty.
    pub fn connect(config: BrokerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (client, event_loop) =
            AsyncClient::new(config.mqtt_options(), config.request_capacity);
        let inner = Arc::new(Inner::new(client, config.reconnect_delay));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let span = tracing::info_span!(
            "mqtt",
            client_id = %config.client_id,
            host = %config.host,
            port = config.port
        );
        let task = tokio::spawn(
            network_loop::run(Arc::clone(&inner), event_loop, shutdown_rx).instrument(span),
        );

        tracing::info!(
            host = %config.host,
            port = config.port,
            "Connecting to MQTT broker"
        );

        Ok(Self {
            inner,
            config,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Returns whether the broker session is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns a receiver that observes connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.watch_state()
    }

    /// Waits until the session is up or `timeout` elapses.
    ///
    /// Returns true if connected.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut state = self.watch_state();
        tokio::time::timeout(timeout, state.wait_for(ConnectionState::is_connected))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Returns how many network steps have failed so far.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.reconnect_attempts()
    }

    /// Returns the number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscription_count()
    }

    /// Queues a message for publication.
    ///
    /// Does not wait for the broker; messages queued while disconnected are
    /// sent once the session is back, as long as the queue has room.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge is shut down or the request queue is
    /// full.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, BridgeError> {
        self.ensure_running()?;
        self.inner.publish(topic, payload.into(), qos, retain)
    }

    /// Subscribes a handler to a topic filter.
    ///
    /// The subscription is kept for the lifetime of the bridge and re-issued
    /// after every reconnect. Every handler whose filter matches an inbound
    /// message is invoked, on the network loop task.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter is invalid or already subscribed, or
    /// if the broker request could not be queued.
    pub fn subscribe<F>(&self, filter: &str, qos: QoS, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let filter = TopicFilter::new(filter)?;
        self.inner.subscribe(filter, qos, Arc::new(handler))
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter is not subscribed or the broker
    /// request could not be queued.
    pub fn unsubscribe(&self, filter: &str) -> Result<(), BridgeError> {
        self.ensure_running()?;
        let filter = TopicFilter::new(filter)?;
        self.inner.unsubscribe(&filter)
    }

    /// Stops the network loop and waits for it to finish.
    ///
    /// A connected session is closed with a clean disconnect. Calling this
    /// more than once is a no-op.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            tracing::info!(host = %self.config.host, "Disconnecting from MQTT broker");
            if let Err(e) = task.await {
                tracing::error!(error = %e, "MQTT network loop panicked");
            }
        }
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if *self.shutdown.borrow() {
            return Err(BridgeError::ShutDown);
        }
        Ok(())
    }
}

impl Publisher for MqttBridge {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, BridgeError> {
        MqttBridge::publish(self, topic, payload, qos, retain)
    }
}

impl Drop for MqttBridge {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl fmt::Debug for MqttBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttBridge")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for creating an [`MqttBridge`].
#[derive(Debug, Default)]
pub struct MqttBridgeBuilder {
    config: BrokerConfig,
}

impl From<BrokerConfig> for MqttBridgeBuilder {
    fn from(config: BrokerConfig) -> Self {
        Self { config }
    }
}

impl MqttBridgeBuilder {
    /// Sets the MQTT client id.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = id.into();
        self
    }

    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config = self.config.with_credentials(username, password);
        self
    }

    /// Sets the keep-alive interval (default: 10 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the wait after a failed network step (default: 1 second).
    #[must_use]
    pub fn reconnect_delay(mut self, duration: Duration) -> Self {
        self.config.reconnect_delay = duration;
        self
    }

    /// Sets the request queue capacity (default: 64).
    #[must_use]
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity;
        self
    }

    /// Starts the bridge. See [`MqttBridge::connect`].
    ///
    /// # Errors
    ///
    /// Returns an error if the client id or host is not set.
    pub fn build(self) -> Result<MqttBridge, ConfigError> {
        MqttBridge::connect(self.config)
    }
}
