// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bridge's network loop.
//!
//! One task per bridge drives the broker session. It polls the event source
//! and, on every `ConnAck`, queues the subscription table ahead of anything
//! published while offline. It also dispatches inbound messages and waits
//! out the reconnect delay after a failed step. It is the only writer of the
//! connection state and stops only on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::Inner;
use super::session::{BrokerSession, EventSource, SessionEvent};
use crate::types::ConnectionState;

/// How long a clean disconnect may take once shutdown is requested.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Runs until `shutdown` flips to true or its sender is dropped.
pub(crate) async fn run<S, E>(inner: Arc<Inner<S>>, mut events: E, mut shutdown: watch::Receiver<bool>)
where
    S: BrokerSession,
    E: EventSource,
{
    inner.set_state(ConnectionState::Connecting);

    loop {
        let step = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            step = events.next_event() => step,
        };

        match step {
            Ok(SessionEvent::Connected) => events.restore(&inner.on_connected()),
            Ok(SessionEvent::Message(message)) => inner.dispatch(&message),
            Ok(SessionEvent::Other) => {}
            Err(e) => {
                let attempt = inner.on_connection_lost();
                tracing::warn!(
                    error = %e,
                    attempt,
                    retry_in_ms = inner.reconnect_delay.as_millis(),
                    "MQTT network step failed, reconnecting"
                );

                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(inner.reconnect_delay) => {}
                }
            }
        }
    }

    if inner.state().is_connected() {
        close_session(&inner, &mut events).await;
    }
    inner.set_state(ConnectionState::Disconnected);
    tracing::debug!("MQTT network loop stopped");
}

/// Requests a disconnect and polls until it has been written.
async fn close_session<S, E>(inner: &Inner<S>, events: &mut E)
where
    S: BrokerSession,
    E: EventSource,
{
    if let Err(e) = inner.session.disconnect() {
        tracing::warn!(error = %e, "Failed to request MQTT disconnect");
        return;
    }

    let drain = async {
        while events.next_event().await.is_ok() {}
    };
    if tokio::time::timeout(DISCONNECT_GRACE, drain).await.is_err() {
        tracing::debug!("MQTT disconnect did not complete in time");
    }
}
