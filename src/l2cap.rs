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

//! The L2CAP stream carrying ATT, bound to fixed channel id 0x0004.
//!
//! The GATT engine is written against [ByteChannel] rather than the socket
//! directly, so a scripted in-memory peer can stand in for a peripheral in
//! tests.

use crate::address::{Address, AddressType};
use crate::sys::BtSocket;
use std::io;
use std::sync::Arc;

/// Default client receive MTU announced in the MTU exchange.
pub const DEFAULT_CLIENT_MTU: u16 = 512;
/// Smallest MTU ATT permits on LE.
pub const MINIMAL_MTU: u16 = 23;

/// A full-duplex byte stream with out-of-band shutdown.
///
/// `recv` blocks until data, end-of-stream (`Ok(0)`) or failure. `shutdown`
/// must unblock a receiver on another thread promptly; it is the lever the
/// disconnect path pulls to stop the receive thread.
pub trait ByteChannel: Send + Sync {
    /// Receives one inbound datagram or byte run.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    /// Sends the whole buffer.
    fn send(&self, buf: &[u8]) -> io::Result<()>;
    /// Closes both directions; concurrent and later calls are no-ops.
    fn shutdown(&self);
    /// True until [ByteChannel::shutdown] or a fatal I/O error.
    fn is_open(&self) -> bool;
}

/// The ATT fixed-channel L2CAP socket of one connected device.
pub struct L2capChannel {
    socket: BtSocket,
    closed: std::sync::atomic::AtomicBool,
}

impl L2capChannel {
    /// Connects to `peer` on the ATT fixed channel via the adapter identified
    /// by `local`.
    pub fn open(
        local: Address,
        local_type: AddressType,
        peer: Address,
        peer_type: AddressType,
    ) -> io::Result<Arc<L2capChannel>> {
        let socket = BtSocket::open_l2cap_att(local, local_type, peer, peer_type)?;
        log::debug!("l2cap: ATT channel open to {peer} ({peer_type})");
        Ok(Arc::new(L2capChannel {
            socket,
            closed: std::sync::atomic::AtomicBool::new(false),
        }))
    }
}

impl ByteChannel for L2capChannel {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            other => other,
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.write_all(buf)
    }

    fn shutdown(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.socket.shutdown();
    }

    fn is_open(&self) -> bool {
        !self.closed.load(std::sync::atomic::Ordering::SeqCst) && self.socket.is_open()
    }
}
