// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seams between the bridge and the `rumqttc` client.
//!
//! [`BrokerSession`] is the request half (publish, subscribe, unsubscribe),
//! [`EventSource`] the network half polled by the network loop. Both are
//! implemented for the `rumqttc` types and for scripted doubles in tests.

use std::future::Future;

use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, Packet, QoS, Request, Subscribe,
    SubscribeFilter,
};

use super::Message;
use super::topic::TopicFilter;

/// Outcome of one successful network step.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The broker accepted the session.
    Connected,
    /// An application message arrived.
    Message(Message),
    /// Anything else: acks, pings, outgoing traffic.
    Other,
}

/// Request half of a broker session.
///
/// Calls never block on the network; requests are queued for the network
/// loop to write.
pub(crate) trait BrokerSession: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ClientError>;

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ClientError>;

    fn unsubscribe(&self, filter: &str) -> Result<(), ClientError>;

    fn disconnect(&self) -> Result<(), ClientError>;
}

impl BrokerSession for AsyncClient {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.try_publish(topic, qos, retain, payload)
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ClientError> {
        self.try_subscribe(filter, qos)
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), ClientError> {
        self.try_unsubscribe(filter)
    }

    fn disconnect(&self) -> Result<(), ClientError> {
        self.try_disconnect()
    }
}

/// Network half of a broker session.
pub(crate) trait EventSource: Send + 'static {
    /// Performs one network step.
    ///
    /// An error means the connection is gone; the next call reconnects.
    fn next_event(&mut self) -> impl Future<Output = Result<SessionEvent, ConnectionError>> + Send;

    /// Queues the subscription table ahead of every other request.
    ///
    /// Called right after [`SessionEvent::Connected`]. Unlike
    /// [`BrokerSession::subscribe`] this cannot fail on a full request
    /// queue.
    fn restore(&mut self, filters: &[(TopicFilter, QoS)]);
}

impl EventSource for EventLoop {
    async fn next_event(&mut self) -> Result<SessionEvent, ConnectionError> {
        let event = match self.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                tracing::debug!(?ack, "MQTT session accepted");
                SessionEvent::Connected
            }
            Event::Incoming(Packet::Publish(publish)) => SessionEvent::Message(Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            }),
            Event::Incoming(Packet::SubAck(ack)) => {
                tracing::debug!(?ack, "MQTT subscription acknowledged");
                SessionEvent::Other
            }
            _ => SessionEvent::Other,
        };
        Ok(event)
    }

    fn restore(&mut self, filters: &[(TopicFilter, QoS)]) {
        if filters.is_empty() {
            return;
        }
        let subscribe = Subscribe::new_many(
            filters
                .iter()
                .map(|(filter, qos)| SubscribeFilter::new(filter.as_str().to_string(), *qos)),
        );
        // `pending` is drained before the request channel.
        self.pending.push_front(Request::Subscribe(subscribe));
    }
}
