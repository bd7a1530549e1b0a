// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared across the bridge.
//!
//! # Types
//!
//! - [`Uid`] - Three-character sensor identifier
//! - [`MeasurementType`] - Quantity reported by a sensor
//! - [`TopicPrefix`] - Publishing prefix, always ending in `/`
//! - [`ConnectionState`] - Disconnected / Connecting / Connected

mod connection_state;
mod measurement;
mod uid;

pub use connection_state::ConnectionState;
pub use measurement::{MeasurementType, TopicPrefix};
pub use uid::{UID_LEN, Uid};
