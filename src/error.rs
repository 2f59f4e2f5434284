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

//! Error types shared across the stack layers.

use crate::att::AttErrorCode;
use crate::hci::HciStatus;

/// Errors surfaced by the adapter, device and GATT APIs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No reply arrived within the configured window; the channel stays
    /// usable unless stated otherwise by the operation.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// A malformed inbound frame was encountered and discarded.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The controller answered with a non-success HCI status.
    #[error("HCI status {0:?}")]
    Hci(HciStatus),

    /// The peer answered an ATT request with an `Error Response`.
    #[error("ATT error {code:?} for handle {handle:#06x}")]
    Att {
        /// ATT error code from the response.
        code: AttErrorCode,
        /// Attribute handle the request referred to.
        handle: u16,
    },

    /// Underlying socket failure; triggers connection tear-down.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The operation does not apply to the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The stack does not (yet) support the requested operation.
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
