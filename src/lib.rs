// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Direct user-space Bluetooth LE host stack for Linux.
//!
//! Talks straight to the kernel instead of going through the BlueZ daemon:
//! the management (MGMT) control channel drives adapter lifecycle and
//! discovery, a raw HCI channel per adapter drives LE connection creation,
//! and an L2CAP stream on the ATT fixed channel carries the GATT client.
//!
//! The central workflow is [mgmt::transport::Manager] → [adapter::Adapter] →
//! [device::Device] → [gatt::client::GattClient]: enumerate adapters, start
//! discovery, connect a found device, discover its services and exchange
//! characteristic values, with notifications and indications fanned out to
//! registered listeners.
//!
//! Requires `CAP_NET_RAW`/`CAP_NET_ADMIN` (or root) for the raw Bluetooth
//! sockets.

#![deny(missing_docs)]

pub mod adapter;
pub mod address;
pub mod adv;
pub mod att;
pub mod core;
pub mod device;
pub mod env;
mod error;
pub mod gatt;
pub mod hci;
pub mod l2cap;
pub mod mgmt;
pub(crate) mod ring;
pub(crate) mod sys;

pub use error::{Error, Result};
