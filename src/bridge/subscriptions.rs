// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent subscription table.

use std::fmt;
use std::sync::Arc;

use rumqttc::QoS;

use super::Message;
use super::topic::TopicFilter;
use crate::error::BridgeError;

/// Handler invoked for every message matching a subscription.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

struct Subscription {
    filter: TopicFilter,
    qos: QoS,
    handler: MessageHandler,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Ordered table of filters and their handlers.
///
/// Entries outlive broker sessions: after every reconnect the whole table
/// is re-issued to the broker.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    entries: Vec<Subscription>,
}

impl SubscriptionTable {
    pub(crate) fn insert(
        &mut self,
        filter: TopicFilter,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<(), BridgeError> {
        if self.contains(&filter) {
            return Err(BridgeError::AlreadySubscribed(filter.as_str().to_string()));
        }
        self.entries.push(Subscription {
            filter,
            qos,
            handler,
        });
        Ok(())
    }

    pub(crate) fn remove(&mut self, filter: &TopicFilter) -> Result<(), BridgeError> {
        let index = self
            .entries
            .iter()
            .position(|s| &s.filter == filter)
            .ok_or_else(|| BridgeError::NotSubscribed(filter.as_str().to_string()))?;
        self.entries.remove(index);
        Ok(())
    }

    pub(crate) fn contains(&self, filter: &TopicFilter) -> bool {
        self.entries.iter().any(|s| &s.filter == filter)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Filters to re-issue after a reconnect, in subscription order.
    pub(crate) fn filters(&self) -> impl Iterator<Item = (&TopicFilter, QoS)> {
        self.entries.iter().map(|s| (&s.filter, s.qos))
    }

    /// Handlers of every entry matching `topic`.
    pub(crate) fn matching(&self, topic: &str) -> Vec<MessageHandler> {
        self.entries
            .iter()
            .filter(|s| s.filter.matches(topic))
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }
}
