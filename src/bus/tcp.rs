// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Brick daemon client over TCP.
//!
//! One reader task per session routes inbound packets:
//!
//! ```text
//! enumerate callback  -> enumeration feed
//! value callback      -> the open handle's value channel
//! response            -> the pending request with the same (uid, function, seq)
//! ```
//!
//! When the socket closes, the reader drops the enumeration sender and every
//! value channel, which is how the rest of the bridge notices bus loss.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::BusError;
use crate::filter::Band;
use crate::sensor::SensorKind;
use crate::types::Uid;

use super::packet::{self, Announcement, CALLBACK_ENUMERATE, FUNCTION_ENUMERATE, HEADER_LEN, Header};
use super::{BusConnection, BusConnector, EnumerationEvent, SensorBus, ValueReceiver};

/// Default time to wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);

const BROADCAST_UID: u32 = 0;
const ENUMERATION_CAPACITY: usize = 64;
const VALUE_CAPACITY: usize = 64;

type PendingKey = (u32, u8, u8);

struct Response {
    error_code: u8,
    payload: Vec<u8>,
}

struct Listener {
    kind: SensorKind,
    values: mpsc::Sender<i32>,
}

/// Routing tables shared with the reader task.
#[derive(Default)]
struct Routes {
    /// Numeric ids learned from enumeration.
    ///
    /// Entries live for the whole session: a sensor is released only after
    /// its disconnect announcement, and the release must still find the
    /// listener registered under the full device id.
    devices: Mutex<HashMap<Uid, u32>>,
    listeners: Mutex<HashMap<u32, Listener>>,
    pending: Mutex<HashMap<PendingKey, oneshot::Sender<Response>>>,
    closed: AtomicBool,
}

/// Opens TCP sessions with the brick daemon.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    request_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TcpConnector {
    /// Sets how long to wait for a response before giving up.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl BusConnector for TcpConnector {
    type Bus = TcpBus;

    async fn connect(&self, host: &str, port: u16) -> Result<BusConnection<TcpBus>, BusError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let routes = Arc::new(Routes::default());
        let (enumerations, enumeration_rx) = mpsc::channel(ENUMERATION_CAPACITY);
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&routes), enumerations));

        let bus = TcpBus {
            writer: tokio::sync::Mutex::new(write_half),
            routes,
            sequence: AtomicU8::new(0),
            request_timeout: self.request_timeout,
            reader,
        };
        Ok(BusConnection::new(Arc::new(bus), enumeration_rx))
    }
}

/// One TCP session with the brick daemon.
pub struct TcpBus {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    routes: Arc<Routes>,
    sequence: AtomicU8,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for TcpBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBus")
            .field("closed", &self.routes.closed.load(Ordering::Acquire))
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl TcpBus {
    /// Next request sequence number, cycling through 1..=15.
    fn next_sequence(&self) -> u8 {
        let previous = self
            .sequence
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| Some(s % 15 + 1))
            .unwrap_or(0);
        previous % 15 + 1
    }

    fn numeric_uid(&self, uid: Uid) -> Result<u32, BusError> {
        if let Some(numeric) = self.routes.devices.lock().get(&uid) {
            return Ok(*numeric);
        }
        packet::base58_decode(uid.as_str()).ok_or(BusError::UnknownDevice(uid))
    }

    async fn write(&self, packet: &[u8]) -> Result<(), BusError> {
        if self.routes.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(packet).await?;
        Ok(())
    }

    /// Sends a setter; the daemon sends no response.
    async fn send(&self, uid: u32, function_id: u8, payload: &[u8]) -> Result<(), BusError> {
        let packet = packet::encode_request(uid, function_id, self.next_sequence(), false, payload)?;
        self.write(&packet).await
    }

    /// Sends a getter and waits for its response payload.
    async fn request(&self, uid: Uid, function_id: u8, payload: &[u8]) -> Result<Vec<u8>, BusError> {
        let numeric = self.numeric_uid(uid)?;
        let sequence = self.next_sequence();
        let key = (numeric, function_id, sequence);
        let packet = packet::encode_request(numeric, function_id, sequence, true, payload)?;

        let (tx, rx) = oneshot::channel();
        self.routes.pending.lock().insert(key, tx);

        if let Err(e) = self.write(&packet).await {
            self.routes.pending.lock().remove(&key);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BusError::Closed),
            Err(_) => {
                self.routes.pending.lock().remove(&key);
                let millis = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(BusError::Timeout(millis));
            }
        };

        if response.error_code != 0 {
            return Err(BusError::Device {
                uid,
                code: response.error_code,
            });
        }
        Ok(response.payload)
    }
}

impl Drop for TcpBus {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl SensorBus for TcpBus {
    async fn enumerate(&self) -> Result<(), BusError> {
        let packet = packet::encode_request(BROADCAST_UID, FUNCTION_ENUMERATE, self.next_sequence(), false, &[])?;
        self.write(&packet).await
    }

    fn open(&self, uid: Uid, kind: SensorKind) -> Result<ValueReceiver, BusError> {
        if self.routes.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let numeric = self.numeric_uid(uid)?;

        let mut listeners = self.routes.listeners.lock();
        if listeners.contains_key(&numeric) {
            return Err(BusError::AlreadyOpen(uid));
        }
        let (values, rx) = mpsc::channel(VALUE_CAPACITY);
        listeners.insert(numeric, Listener { kind, values });
        Ok(rx)
    }

    fn release(&self, uid: Uid) {
        if let Ok(numeric) = self.numeric_uid(uid) {
            self.routes.listeners.lock().remove(&numeric);
        }
    }

    async fn read_value(&self, uid: Uid, kind: SensorKind) -> Result<i32, BusError> {
        let payload = self
            .request(uid, packet::functions(kind).get_value, &[])
            .await?;
        packet::decode_value(kind, &payload)
    }

    async fn set_threshold(&self, uid: Uid, kind: SensorKind, band: Band) -> Result<(), BusError> {
        let Some(function_id) = packet::functions(kind).set_threshold else {
            return Ok(());
        };
        let numeric = self.numeric_uid(uid)?;
        self.send(numeric, function_id, &packet::threshold_payload(kind, band))
            .await
    }

    async fn set_callback_period(
        &self,
        uid: Uid,
        kind: SensorKind,
        period: Duration,
    ) -> Result<(), BusError> {
        let Some(function_id) = packet::functions(kind).set_period else {
            return Ok(());
        };
        let numeric = self.numeric_uid(uid)?;
        self.send(numeric, function_id, &packet::period_payload(period))
            .await
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    routes: Arc<Routes>,
    enumerations: mpsc::Sender<EnumerationEvent>,
) {
    let mut reader = BufReader::new(read_half);

    let reason = loop {
        match read_packet(&mut reader).await {
            Ok((header, payload)) => {
                if !route(&routes, &enumerations, header, payload).await {
                    break BusError::Closed;
                }
            }
            Err(e) => break e,
        }
    };

    tracing::warn!(error = %reason, "Bus daemon connection lost");
    routes.closed.store(true, Ordering::Release);
    routes.listeners.lock().clear();
    routes.pending.lock().clear();
}

async fn read_packet(reader: &mut BufReader<OwnedReadHalf>) -> Result<(Header, Vec<u8>), BusError> {
    let mut buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut buf).await?;
    let header = Header::decode(&buf);

    let mut payload = vec![0u8; header.payload_len()?];
    reader.read_exact(&mut payload).await?;
    Ok((header, payload))
}

/// Delivers one packet. Returns false once nobody listens to enumerations.
async fn route(
    routes: &Routes,
    enumerations: &mpsc::Sender<EnumerationEvent>,
    header: Header,
    payload: Vec<u8>,
) -> bool {
    if !header.is_callback() {
        let key = (header.uid, header.function_id, header.sequence);
        let waiter = routes.pending.lock().remove(&key);
        if let Some(waiter) = waiter {
            let _ = waiter.send(Response {
                error_code: header.error_code,
                payload,
            });
        }
        return true;
    }

    if header.function_id == CALLBACK_ENUMERATE {
        let Some(event) = announce(routes, header, &payload) else {
            return true;
        };
        return enumerations.send(event).await.is_ok();
    }

    let listeners = routes.listeners.lock();
    let Some(listener) = listeners.get(&header.uid) else {
        return true;
    };
    if header.function_id != packet::functions(listener.kind).value_callback {
        return true;
    }
    match packet::decode_value(listener.kind, &payload) {
        Ok(value) => {
            if let Err(e) = listener.values.try_send(value) {
                tracing::debug!(uid = header.uid, error = %e, "Dropped value callback");
            }
        }
        Err(e) => tracing::warn!(uid = header.uid, error = %e, "Undecodable value callback"),
    }
    true
}

/// Decodes an enumerate callback and records the device's numeric id.
fn announce(routes: &Routes, header: Header, payload: &[u8]) -> Option<EnumerationEvent> {
    let announcement = match Announcement::decode(payload) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable enumerate callback");
            return None;
        }
    };
    let uid = match Uid::normalize(&announcement.uid) {
        Ok(uid) => uid,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring device with unusable uid");
            return None;
        }
    };

    let numeric = packet::base58_decode(&announcement.uid).unwrap_or(header.uid);
    let event = EnumerationEvent::new(uid, announcement.device_identifier, announcement.enumeration_type);

    if event.kind.is_present() {
        routes.devices.lock().insert(uid, numeric);
    }
    tracing::trace!(
        uid = %uid,
        position = %announcement.position,
        connected_to = %announcement.connected_uid,
        "Enumerate callback"
    );
    Some(event)
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::bus::EnumerationKind;

    const UID_TEXT: &str = "abc";

    fn announcement(enumeration_type: u8) -> Vec<u8> {
        announcement_of(UID_TEXT, enumeration_type)
    }

    fn announcement_of(uid: &str, enumeration_type: u8) -> Vec<u8> {
        let payload = Announcement {
            uid: uid.to_string(),
            connected_uid: "6Qb".to_string(),
            position: 'a',
            hardware_version: [1, 1, 0],
            firmware_version: [2, 0, 1],
            device_identifier: 216,
            enumeration_type,
        }
        .encode();
        let numeric = packet::base58_decode(uid).unwrap();
        packet::encode_request(numeric, CALLBACK_ENUMERATE, 0, false, &payload).unwrap()
    }

    async fn read_request(stream: &mut TcpStream) -> (Header, Vec<u8>) {
        let mut buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut buf).await.unwrap();
        let header = Header::decode(&buf);
        let mut payload = vec![0u8; header.payload_len().unwrap()];
        stream.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    async fn daemon() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn sequence_cycles_without_zero() {
        let sequence = AtomicU8::new(0);
        let mut seen = Vec::new();
        for _ in 0..32 {
            let previous = sequence
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| Some(s % 15 + 1))
                .unwrap();
            seen.push(previous % 15 + 1);
        }
        assert!(seen.iter().all(|s| (1..=15).contains(s)));
        assert_eq!(seen[0], 1);
        assert_eq!(seen[14], 15);
        assert_eq!(seen[15], 1);
    }

    #[tokio::test]
    async fn enumerate_and_read_value() {
        let (listener, port) = daemon().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let (header, _) = read_request(&mut stream).await;
            assert_eq!(header.function_id, FUNCTION_ENUMERATE);
            assert_eq!(header.uid, BROADCAST_UID);
            stream.write_all(&announcement(0)).await.unwrap();

            let (header, _) = read_request(&mut stream).await;
            assert_eq!(header.function_id, 1);
            assert!(header.response_expected);
            let mut response = Header {
                length: 10,
                error_code: 0,
                ..header
            }
            .encode()
            .to_vec();
            response.extend_from_slice(&2150i16.to_le_bytes());
            stream.write_all(&response).await.unwrap();

            stream
        });

        let mut connection = TcpConnector::default()
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        connection.bus().enumerate().await.unwrap();

        let event = connection.next_event().await.unwrap();
        assert_eq!(event.uid.as_str(), UID_TEXT);
        assert_eq!(event.device_identifier, 216);
        assert_eq!(event.kind, EnumerationKind::Available);

        let value = connection
            .bus()
            .read_value(event.uid, SensorKind::Temperature)
            .await
            .unwrap();
        assert_eq!(value, 2150);

        drop(server.await.unwrap());
        connection.wait_closed().await;
    }

    #[tokio::test]
    async fn value_callbacks_reach_open_handle() {
        let (listener, port) = daemon().await;
        let numeric = packet::base58_decode(UID_TEXT).unwrap();
        let (go, wait) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&announcement(1)).await.unwrap();
            wait.await.unwrap();

            let mut callback =
                packet::encode_request(numeric, 9, 0, false, &(-40i16).to_le_bytes()).unwrap();
            // Unrelated callback id is ignored.
            callback.extend(packet::encode_request(numeric, 8, 0, false, &[0, 0]).unwrap());
            callback.extend(packet::encode_request(numeric, 9, 0, false, &75i16.to_le_bytes()).unwrap());
            stream.write_all(&callback).await.unwrap();

            let (header, payload) = read_request(&mut stream).await;
            (header, payload)
        });

        let mut connection = TcpConnector::default()
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        let event = connection.next_event().await.unwrap();
        assert_eq!(event.kind, EnumerationKind::Connected);

        let bus = Arc::clone(connection.bus());
        let mut values = bus.open(event.uid, SensorKind::Temperature).unwrap();
        assert!(matches!(
            bus.open(event.uid, SensorKind::Temperature),
            Err(BusError::AlreadyOpen(_))
        ));
        go.send(()).unwrap();

        assert_eq!(values.recv().await, Some(-40));
        assert_eq!(values.recv().await, Some(75));

        bus.set_threshold(event.uid, SensorKind::Temperature, Band { low: 65, high: 85 })
            .await
            .unwrap();
        let (header, payload) = server.await.unwrap();
        assert_eq!(header.function_id, 4);
        assert!(!header.response_expected);
        assert_eq!(payload, packet::threshold_payload(SensorKind::Temperature, Band { low: 65, high: 85 }));
    }

    #[tokio::test]
    async fn replugged_device_with_long_uid_reopens() {
        const LONG_UID: &str = "abcD";
        let numeric = packet::base58_decode(LONG_UID).unwrap();
        assert_ne!(Some(numeric), packet::base58_decode("abc"));

        let (listener, port) = daemon().await;
        let (step, mut steps) = mpsc::unbounded_channel::<()>();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&announcement_of(LONG_UID, 1)).await.unwrap();
            steps.recv().await.unwrap();
            stream.write_all(&announcement_of(LONG_UID, 2)).await.unwrap();
            steps.recv().await.unwrap();
            stream.write_all(&announcement_of(LONG_UID, 1)).await.unwrap();
            steps.recv().await.unwrap();
            let callback =
                packet::encode_request(numeric, 9, 0, false, &215i16.to_le_bytes()).unwrap();
            stream.write_all(&callback).await.unwrap();
            steps.recv().await
        });

        let mut connection = TcpConnector::default()
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        let bus = Arc::clone(connection.bus());

        let plugged = connection.next_event().await.unwrap();
        assert_eq!(plugged.uid.as_str(), "abc");
        let first = bus.open(plugged.uid, SensorKind::Temperature).unwrap();

        step.send(()).unwrap();
        let unplugged = connection.next_event().await.unwrap();
        assert_eq!(unplugged.kind, EnumerationKind::Disconnected);
        drop(first);
        bus.release(unplugged.uid);

        step.send(()).unwrap();
        let replugged = connection.next_event().await.unwrap();
        assert_eq!(replugged.kind, EnumerationKind::Connected);
        let mut values = bus.open(replugged.uid, SensorKind::Temperature).unwrap();

        step.send(()).unwrap();
        assert_eq!(values.recv().await, Some(215));

        drop(step);
        let _ = server.await;
    }

    #[tokio::test]
    async fn device_error_code_surfaces() {
        let (listener, port) = daemon().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_request(&mut stream).await;
            let response = Header {
                length: 8,
                error_code: 2,
                ..header
            }
            .encode();
            stream.write_all(&response).await.unwrap();
            stream
        });

        let connection = TcpConnector::default()
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        let uid: Uid = UID_TEXT.parse().unwrap();
        let err = connection
            .bus()
            .read_value(uid, SensorKind::Humidity)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Device { code: 2, .. }));
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (listener, port) = daemon().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut stream).await;
            std::future::pending::<()>().await;
        });

        let connection = TcpConnector::default()
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        let uid: Uid = UID_TEXT.parse().unwrap();
        let err = connection
            .bus()
            .read_value(uid, SensorKind::AmbientLight)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(2500)));
        server.abort();
    }

    #[tokio::test]
    async fn socket_close_ends_session() {
        let (listener, port) = daemon().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let connection = TcpConnector::default()
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        server.await.unwrap();

        let bus = Arc::clone(connection.bus());
        connection.wait_closed().await;
        assert!(matches!(
            bus.open("abc".parse().unwrap(), SensorKind::Humidity),
            Err(BusError::Closed)
        ));
    }
}
