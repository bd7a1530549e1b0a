// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection to the hardware sensor bus.
//!
//! The bus is reached through two traits:
//!
//! - [`BusConnector`] opens one session with the bus daemon and hands back a
//!   [`BusConnection`] carrying the enumeration feed.
//! - [`SensorBus`] is the per-session accessor surface used by sensors:
//!   value reads, threshold programming and value-change delivery.
//!
//! [`BusClient`] layers the connection state machine and the retry policy
//! on top of any connector.
//!
//! # Implementations
//!
//! - [`TcpConnector`]: the brick daemon TCP protocol
//! - [`MemoryConnector`]: an in-process simulator used by tests

mod client;
mod memory;
mod packet;
mod retry;
mod tcp;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::BusError;
use crate::filter::Band;
use crate::sensor::SensorKind;
use crate::types::Uid;

pub use client::BusClient;
pub use memory::{MemoryBus, MemoryConnector};
pub use retry::RetryPolicy;
pub use tcp::{TcpBus, TcpConnector};

/// Default bus daemon host.
pub const DEFAULT_BUS_HOST: &str = "localhost";

/// Default bus daemon port.
pub const DEFAULT_BUS_PORT: u16 = 4223;

/// Receiver of raw value-change callbacks for one device.
pub type ValueReceiver = mpsc::Receiver<i32>;

/// What an enumeration event reports about a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumerationKind {
    /// Reported in answer to an enumerate request.
    Available,
    /// The device was newly attached.
    Connected,
    /// The device was detached.
    Disconnected,
}

impl EnumerationKind {
    /// Decodes the raw enumeration type; everything from 2 up means gone.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Available,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    /// Returns the raw enumeration type.
    #[must_use]
    pub fn as_raw(&self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    /// Returns true for the "available/connected" kinds.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

/// A device appeared on or disappeared from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumerationEvent {
    /// Identifier of the device.
    pub uid: Uid,
    /// Device-type code.
    pub device_identifier: u16,
    /// Whether the device came or went.
    pub kind: EnumerationKind,
}

impl EnumerationEvent {
    /// Creates an event from its raw parts.
    #[must_use]
    pub fn new(uid: Uid, device_identifier: u16, enumeration_type: u8) -> Self {
        Self {
            uid,
            device_identifier,
            kind: EnumerationKind::from_raw(enumeration_type),
        }
    }
}

/// Accessors of one bus session.
///
/// Methods are safe to call from many tasks at once.
pub trait SensorBus: Send + Sync + 'static {
    /// Asks every attached device to report itself.
    ///
    /// Answers arrive on the enumeration feed as
    /// [`EnumerationKind::Available`] events.
    fn enumerate(&self) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Acquires the handle for a device and returns its value-change feed.
    ///
    /// # Errors
    ///
    /// Fails if the device is already open or the session is gone.
    fn open(&self, uid: Uid, kind: SensorKind) -> Result<ValueReceiver, BusError>;

    /// Releases the handle for a device. Releasing twice is a no-op.
    fn release(&self, uid: Uid);

    /// Reads the current value from the device.
    fn read_value(
        &self,
        uid: Uid,
        kind: SensorKind,
    ) -> impl Future<Output = Result<i32, BusError>> + Send;

    /// Programs the "outside" trigger band.
    fn set_threshold(
        &self,
        uid: Uid,
        kind: SensorKind,
        band: Band,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Programs the periodic value callback.
    fn set_callback_period(
        &self,
        uid: Uid,
        kind: SensorKind,
        period: Duration,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Opens sessions with the bus daemon.
pub trait BusConnector: Send + Sync + 'static {
    /// Session type produced by this connector.
    type Bus: SensorBus;

    /// Attempts one connection.
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<BusConnection<Self::Bus>, BusError>> + Send;
}

/// An established bus session.
///
/// The enumeration feed ends when the session is torn down.
#[derive(Debug)]
pub struct BusConnection<B> {
    bus: Arc<B>,
    enumerations: mpsc::Receiver<EnumerationEvent>,
}

impl<B: SensorBus> BusConnection<B> {
    /// Wraps a session and its enumeration feed.
    #[must_use]
    pub fn new(bus: Arc<B>, enumerations: mpsc::Receiver<EnumerationEvent>) -> Self {
        Self { bus, enumerations }
    }

    /// Returns the session accessors.
    #[must_use]
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Waits for the next enumeration event.
    ///
    /// Returns `None` once the session has been torn down.
    pub async fn next_event(&mut self) -> Option<EnumerationEvent> {
        self.enumerations.recv().await
    }

    /// Blocks until the session is torn down, discarding enumeration events.
    pub async fn wait_closed(mut self) {
        while self.enumerations.recv().await.is_some() {}
    }
}
