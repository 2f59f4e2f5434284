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

//! The per-adapter HCI command channel.
//!
//! One raw HCI socket per adapter carries outbound commands and the small set
//! of events the stack consumes: command replies, LE meta events and
//! disconnection completes. Command replies are correlated by opcode through
//! a bounded ring, exactly like the MGMT channel; everything else fans out to
//! registered callbacks on the reader thread.

use crate::address::{Address, AddressType, RandomAddressType};
use crate::error::{Error, Result};
use crate::mgmt::transport::Manager;
use crate::mgmt::MgmtEvent;
use crate::ring::EventRing;
use crate::sys::BtSocket;
use bytes::BufMut;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// HCI packet type, prepended to every packet on the wire.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketType {
    /// Host-to-controller command.
    Command,
    /// ACL data.
    AclData,
    /// Synchronous (SCO) data.
    ScoData,
    /// Controller-to-host event.
    Event,
}

impl PacketType {
    /// The wire byte.
    pub fn code(self) -> u8 {
        match self {
            PacketType::Command => 0x01,
            PacketType::AclData => 0x02,
            PacketType::ScoData => 0x03,
            PacketType::Event => 0x04,
        }
    }
}

/// Event codes the reader consumes.
#[allow(missing_docs)]
pub mod event {
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    pub const COMMAND_STATUS: u8 = 0x0F;
    pub const LE_META: u8 = 0x3E;
}

/// LE meta subevent codes.
#[allow(missing_docs)]
pub mod le_subevent {
    pub const CONNECTION_COMPLETE: u8 = 0x01;
    pub const ADVERTISING_REPORT: u8 = 0x02;
    pub const EXTENDED_ADVERTISING_REPORT: u8 = 0x0D;
}

/// Command opcodes (OGF << 10 | OCF) issued by this stack.
#[allow(missing_docs)]
pub mod command {
    pub const CREATE_CONN: u16 = 0x0405;
    pub const DISCONNECT: u16 = 0x0406;
    pub const LE_CREATE_CONN: u16 = 0x200D;
}

const REPLY_RING_CAPACITY: usize = 64;
const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_millis(3_000);
const READER_POLL_TIMEOUT_MS: u32 = 1_000;

/// HCI status codes, Vol 1 Part F, plus two stack-internal markers above the
/// assigned range.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HciStatus {
    Success,
    UnknownHciCommand,
    UnknownConnectionIdentifier,
    HardwareFailure,
    PageTimeout,
    AuthenticationFailure,
    PinOrKeyMissing,
    MemoryCapacityExceeded,
    ConnectionTimeout,
    ConnectionLimitExceeded,
    ConnectionAlreadyExists,
    CommandDisallowed,
    ConnectionRejectedLimitedResources,
    InvalidHciCommandParameters,
    RemoteUserTerminatedConnection,
    ConnectionTerminatedByLocalHost,
    UnsupportedRemoteFeature,
    UnspecifiedError,
    UnacceptableConnectionParam,
    AdvertisingTimeout,
    ConnectionFailedToBeEstablished,
    /// Stack-internal: a reply window elapsed.
    InternalTimeout,
    /// Stack-internal: resource unavailable or inconsistent state.
    InternalFailure,
    Unknown(u8),
}

impl HciStatus {
    /// The wire code.
    pub fn code(self) -> u8 {
        match self {
            HciStatus::Success => 0x00,
            HciStatus::UnknownHciCommand => 0x01,
            HciStatus::UnknownConnectionIdentifier => 0x02,
            HciStatus::HardwareFailure => 0x03,
            HciStatus::PageTimeout => 0x04,
            HciStatus::AuthenticationFailure => 0x05,
            HciStatus::PinOrKeyMissing => 0x06,
            HciStatus::MemoryCapacityExceeded => 0x07,
            HciStatus::ConnectionTimeout => 0x08,
            HciStatus::ConnectionLimitExceeded => 0x09,
            HciStatus::ConnectionAlreadyExists => 0x0B,
            HciStatus::CommandDisallowed => 0x0C,
            HciStatus::ConnectionRejectedLimitedResources => 0x0D,
            HciStatus::InvalidHciCommandParameters => 0x12,
            HciStatus::RemoteUserTerminatedConnection => 0x13,
            HciStatus::ConnectionTerminatedByLocalHost => 0x16,
            HciStatus::UnsupportedRemoteFeature => 0x1A,
            HciStatus::UnspecifiedError => 0x1F,
            HciStatus::UnacceptableConnectionParam => 0x3B,
            HciStatus::AdvertisingTimeout => 0x3C,
            HciStatus::ConnectionFailedToBeEstablished => 0x3E,
            HciStatus::InternalTimeout => 0xFD,
            HciStatus::InternalFailure => 0xFF,
            HciStatus::Unknown(code) => code,
        }
    }

    /// Maps a wire code back to a status.
    pub fn from_code(code: u8) -> HciStatus {
        match code {
            0x00 => HciStatus::Success,
            0x01 => HciStatus::UnknownHciCommand,
            0x02 => HciStatus::UnknownConnectionIdentifier,
            0x03 => HciStatus::HardwareFailure,
            0x04 => HciStatus::PageTimeout,
            0x05 => HciStatus::AuthenticationFailure,
            0x06 => HciStatus::PinOrKeyMissing,
            0x07 => HciStatus::MemoryCapacityExceeded,
            0x08 => HciStatus::ConnectionTimeout,
            0x09 => HciStatus::ConnectionLimitExceeded,
            0x0B => HciStatus::ConnectionAlreadyExists,
            0x0C => HciStatus::CommandDisallowed,
            0x0D => HciStatus::ConnectionRejectedLimitedResources,
            0x12 => HciStatus::InvalidHciCommandParameters,
            0x13 => HciStatus::RemoteUserTerminatedConnection,
            0x16 => HciStatus::ConnectionTerminatedByLocalHost,
            0x1A => HciStatus::UnsupportedRemoteFeature,
            0x1F => HciStatus::UnspecifiedError,
            0x3B => HciStatus::UnacceptableConnectionParam,
            0x3C => HciStatus::AdvertisingTimeout,
            0x3E => HciStatus::ConnectionFailedToBeEstablished,
            0xFD => HciStatus::InternalTimeout,
            0xFF => HciStatus::InternalFailure,
            other => HciStatus::Unknown(other),
        }
    }

    /// Maps a MGMT `Device Disconnected` reason to the closest HCI status.
    pub fn from_mgmt_disconnect_reason(reason: u8) -> HciStatus {
        match reason {
            0x01 => HciStatus::ConnectionTimeout,
            0x02 => HciStatus::ConnectionTerminatedByLocalHost,
            0x03 => HciStatus::RemoteUserTerminatedConnection,
            _ => HciStatus::UnspecifiedError,
        }
    }
}

/// Peer address type of `LE Create Connection`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl PeerAddressType {
    /// The wire code.
    pub fn code(self) -> u8 {
        match self {
            PeerAddressType::Public => 0x00,
            PeerAddressType::Random => 0x01,
            PeerAddressType::PublicIdentity => 0x02,
            PeerAddressType::RandomIdentity => 0x03,
        }
    }
}

/// Own address type of `LE Create Connection`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnAddressType {
    Public,
    Random,
    ResolvableOrPublic,
    ResolvableOrRandom,
}

impl OwnAddressType {
    /// The wire code.
    pub fn code(self) -> u8 {
        match self {
            OwnAddressType::Public => 0x00,
            OwnAddressType::Random => 0x01,
            OwnAddressType::ResolvableOrPublic => 0x02,
            OwnAddressType::ResolvableOrRandom => 0x03,
        }
    }
}

/// Maps a peer's address type to the `(peer, own)` pair handed to
/// `LE Create Connection`.
///
/// Private random addresses would need a resolving-list entry and are
/// rejected with [HciStatus::UnacceptableConnectionParam] before any command
/// is issued.
pub fn le_connect_address_types(
    address_type: AddressType,
    random_type: RandomAddressType,
) -> std::result::Result<(PeerAddressType, OwnAddressType), HciStatus> {
    match address_type {
        AddressType::LePublic => Ok((PeerAddressType::Public, OwnAddressType::Public)),
        AddressType::LeRandom => match random_type {
            RandomAddressType::StaticPublic => {
                Ok((PeerAddressType::Random, OwnAddressType::Public))
            }
            RandomAddressType::ResolvablePrivate | RandomAddressType::UnresolvablePrivate => {
                Err(HciStatus::UnacceptableConnectionParam)
            }
            RandomAddressType::Undefined => Err(HciStatus::UnacceptableConnectionParam),
        },
        _ => Err(HciStatus::UnacceptableConnectionParam),
    }
}

/// One inbound HCI event packet.
#[derive(Debug, Clone)]
pub struct HciEvent {
    code: u8,
    params: Vec<u8>,
}

/// Parsed `LE Connection Complete` subevent.
#[derive(Debug, Clone, Copy)]
pub struct LeConnectionComplete {
    /// Outcome of the connection attempt.
    pub status: HciStatus,
    /// Connection handle, valid on success.
    pub handle: u16,
    /// Peer address.
    pub address: Address,
    /// Peer address type.
    pub address_type: AddressType,
}

/// Parsed `Disconnection Complete` event.
#[derive(Debug, Clone, Copy)]
pub struct DisconnectionComplete {
    /// Outcome of the disconnect itself.
    pub status: HciStatus,
    /// The connection that ended.
    pub handle: u16,
    /// Reason the link dropped.
    pub reason: HciStatus,
}

impl HciEvent {
    /// Parses a full packet including the packet-type byte.
    pub fn parse(frame: &[u8]) -> Option<HciEvent> {
        if frame.len() < 3 || frame[0] != PacketType::Event.code() {
            return None;
        }
        let code = frame[1];
        let param_len = frame[2] as usize;
        if frame.len() < 3 + param_len {
            return None;
        }
        Some(HciEvent {
            code,
            params: frame[3..3 + param_len].to_vec(),
        })
    }

    /// The event code.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Raw event parameters.
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// True for the two command reply events.
    pub fn is_cmd_reply(&self) -> bool {
        self.code == event::COMMAND_COMPLETE || self.code == event::COMMAND_STATUS
    }

    /// `Command Complete` content: answered opcode and return parameters
    /// (the first byte of which is the status for most commands).
    pub fn cmd_complete(&self) -> Option<(u16, &[u8])> {
        if self.code != event::COMMAND_COMPLETE || self.params.len() < 3 {
            return None;
        }
        let opcode = u16::from_le_bytes([self.params[1], self.params[2]]);
        Some((opcode, &self.params[3..]))
    }

    /// `Command Status` content: status and the answered opcode.
    pub fn cmd_status(&self) -> Option<(HciStatus, u16)> {
        if self.code != event::COMMAND_STATUS || self.params.len() < 4 {
            return None;
        }
        let opcode = u16::from_le_bytes([self.params[2], self.params[3]]);
        Some((HciStatus::from_code(self.params[0]), opcode))
    }

    /// True iff this reply answers a command with `opcode`.
    pub fn answers(&self, opcode: u16) -> bool {
        self.cmd_complete().map(|(op, _)| op) == Some(opcode)
            || self.cmd_status().map(|(_, op)| op) == Some(opcode)
    }

    /// The command outcome carried by either reply event.
    pub fn reply_status(&self) -> Option<HciStatus> {
        if let Some((status, _)) = self.cmd_status() {
            return Some(status);
        }
        self.cmd_complete()
            .and_then(|(_, ret)| ret.first().copied())
            .map(HciStatus::from_code)
    }

    /// LE meta subevent code and its parameters.
    pub fn le_subevent(&self) -> Option<(u8, &[u8])> {
        if self.code != event::LE_META {
            return None;
        }
        self.params.split_first().map(|(code, rest)| (*code, rest))
    }

    /// Parses an `LE Connection Complete` subevent.
    pub fn le_connection_complete(&self) -> Option<LeConnectionComplete> {
        let (subevent, params) = self.le_subevent()?;
        if subevent != le_subevent::CONNECTION_COMPLETE || params.len() < 11 {
            return None;
        }
        let status = HciStatus::from_code(params[0]);
        let handle = u16::from_le_bytes([params[1], params[2]]) & 0x0FFF;
        let address_type = match params[4] {
            0x00 => AddressType::LePublic,
            0x01 => AddressType::LeRandom,
            _ => AddressType::Undefined,
        };
        let address = Address::from_le_bytes(params[5..11].try_into().ok()?);
        Some(LeConnectionComplete {
            status,
            handle,
            address,
            address_type,
        })
    }

    /// Parses a `Disconnection Complete` event.
    pub fn disconnection_complete(&self) -> Option<DisconnectionComplete> {
        if self.code != event::DISCONNECTION_COMPLETE || self.params.len() < 4 {
            return None;
        }
        Some(DisconnectionComplete {
            status: HciStatus::from_code(self.params[0]),
            handle: u16::from_le_bytes([self.params[1], self.params[2]]) & 0x0FFF,
            reason: HciStatus::from_code(self.params[3]),
        })
    }
}

/// Serializes one command packet.
fn command_packet(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.put_u8(PacketType::Command.code());
    packet.put_u16_le(opcode);
    packet.put_u8(params.len() as u8);
    packet.put_slice(params);
    packet
}

/// `LE Create Connection` parameter block.
#[allow(clippy::too_many_arguments)]
fn le_create_conn_params(
    peer: Address,
    peer_type: PeerAddressType,
    own_type: OwnAddressType,
    scan_interval: u16,
    scan_window: u16,
    conn_interval_min: u16,
    conn_interval_max: u16,
    conn_latency: u16,
    supervision_timeout: u16,
) -> Vec<u8> {
    let mut params = Vec::with_capacity(25);
    params.put_u16_le(scan_interval);
    params.put_u16_le(scan_window);
    params.put_u8(0x00); // no whitelist filtering
    params.put_u8(peer_type.code());
    params.put_slice(&peer.to_le_bytes());
    params.put_u8(own_type.code());
    params.put_u16_le(conn_interval_min);
    params.put_u16_le(conn_interval_max);
    params.put_u16_le(conn_latency);
    params.put_u16_le(supervision_timeout);
    params.put_u16_le(0x0000); // minimum CE length
    params.put_u16_le(0x0000); // maximum CE length
    params
}

type HciEventCallback = Box<dyn Fn(&HciEvent) + Send + Sync>;

struct CallbackEntry {
    id: u64,
    event_code: u8,
    callback: HciEventCallback,
}

/// The HCI command channel of one adapter.
pub struct Hci {
    dev_id: u16,
    socket: Arc<BtSocket>,
    manager: Arc<Manager>,
    reply_ring: EventRing<HciEvent>,
    send_lock: Mutex<()>,
    callbacks: Mutex<Vec<CallbackEntry>>,
    next_callback_id: AtomicU64,
    reader_stop: AtomicBool,
    reader: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Hci {
    /// Opens the raw HCI channel of `dev_id` and starts its reader thread.
    pub fn open(manager: Arc<Manager>, dev_id: u16) -> Result<Arc<Hci>> {
        let socket = Arc::new(BtSocket::open_hci(
            dev_id,
            &[
                event::DISCONNECTION_COMPLETE,
                event::COMMAND_COMPLETE,
                event::COMMAND_STATUS,
                event::LE_META,
            ],
        )?);
        let hci = Arc::new(Hci {
            dev_id,
            socket: Arc::clone(&socket),
            manager,
            reply_ring: EventRing::new(REPLY_RING_CAPACITY),
            send_lock: Mutex::new(()),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            reader_stop: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let weak = Arc::downgrade(&hci);
        let reader = std::thread::Builder::new()
            .name(format!("hci{dev_id}-reader"))
            .spawn(move || reader_loop(socket, weak))
            .map_err(Error::Io)?;
        *hci.reader.lock().unwrap() = Some(reader);
        log::debug!("hci{dev_id}: channel open");
        Ok(hci)
    }

    /// The adapter index this channel is bound to.
    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Registers `callback` for inbound events with `event_code`. Fires on
    /// the reader thread; it must not issue commands on this channel.
    pub fn add_event_callback(
        &self,
        event_code: u8,
        callback: impl Fn(&HciEvent) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().unwrap().push(CallbackEntry {
            id,
            event_code,
            callback: Box::new(callback),
        });
        id
    }

    /// Removes a callback registration; unknown ids are ignored.
    pub fn remove_event_callback(&self, id: u64) {
        self.callbacks.lock().unwrap().retain(|e| e.id != id);
    }

    /// Sends one command and blocks for the matching reply.
    ///
    /// Stale replies of earlier timed-out commands are discarded, bounded by
    /// the ring capacity.
    pub fn send_with_reply(&self, opcode: u16, params: &[u8]) -> Result<HciEvent> {
        let _sender = self.send_lock.lock().unwrap();
        self.socket.write_all(&command_packet(opcode, params))?;

        for _ in 0..REPLY_RING_CAPACITY {
            let Some(reply) = self.reply_ring.pop_timeout(COMMAND_REPLY_TIMEOUT) else {
                log::warn!("hci{}: command {opcode:#06x} timed out", self.dev_id);
                return Err(Error::Timeout);
            };
            if reply.answers(opcode) {
                return Ok(reply);
            }
            log::debug!(
                "hci{}: dropping stale reply (event {:#04x}) while waiting for {opcode:#06x}",
                self.dev_id,
                reply.code()
            );
        }
        Err(Error::Timeout)
    }

    /// Issues `LE Create Connection`.
    ///
    /// A success return means pending: the actual connection arrives as an
    /// asynchronous connection-complete event.
    #[allow(clippy::too_many_arguments)]
    pub fn le_create_conn(
        &self,
        peer: Address,
        peer_type: PeerAddressType,
        own_type: OwnAddressType,
        scan_interval: u16,
        scan_window: u16,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
    ) -> HciStatus {
        let params = le_create_conn_params(
            peer,
            peer_type,
            own_type,
            scan_interval,
            scan_window,
            conn_interval_min,
            conn_interval_max,
            conn_latency,
            supervision_timeout,
        );
        match self.send_with_reply(command::LE_CREATE_CONN, &params) {
            Ok(reply) => reply.reply_status().unwrap_or(HciStatus::InternalFailure),
            Err(Error::Timeout) => HciStatus::InternalTimeout,
            Err(_) => HciStatus::InternalFailure,
        }
    }

    /// Issues the BR/EDR `Create Connection` counterpart.
    pub fn create_conn(
        &self,
        peer: Address,
        pkt_type: u16,
        clock_offset: u16,
        role_switch: u8,
    ) -> HciStatus {
        let mut params = Vec::with_capacity(13);
        params.put_slice(&peer.to_le_bytes());
        params.put_u16_le(pkt_type);
        params.put_u8(0x02); // page scan repetition mode R2
        params.put_u8(0x00); // reserved
        params.put_u16_le(clock_offset);
        params.put_u8(role_switch);
        match self.send_with_reply(command::CREATE_CONN, &params) {
            Ok(reply) => reply.reply_status().unwrap_or(HciStatus::InternalFailure),
            Err(Error::Timeout) => HciStatus::InternalTimeout,
            Err(_) => HciStatus::InternalFailure,
        }
    }

    /// Closes a connection.
    ///
    /// With `io_error_cause` the link is already gone; the command is elided
    /// and a synthetic `Device Disconnected` event is posted to the MGMT
    /// dispatch path instead.
    pub fn disconnect(
        &self,
        io_error_cause: bool,
        conn_handle: u16,
        peer: Address,
        peer_type: AddressType,
        reason: HciStatus,
    ) -> HciStatus {
        if io_error_cause {
            self.manager.post_event(MgmtEvent::synthetic_device_disconnected(
                self.dev_id,
                peer,
                peer_type,
                reason,
            ));
            return HciStatus::Success;
        }
        let mut params = Vec::with_capacity(3);
        params.put_u16_le(conn_handle);
        params.put_u8(reason.code());
        match self.send_with_reply(command::DISCONNECT, &params) {
            Ok(reply) => reply.reply_status().unwrap_or(HciStatus::InternalFailure),
            Err(Error::Timeout) => HciStatus::InternalTimeout,
            Err(_) => HciStatus::InternalFailure,
        }
    }

    /// Stops the reader thread and closes the channel.
    pub fn close(&self) {
        self.reader_stop.store(true, Ordering::SeqCst);
        self.socket.shutdown();
        let handle = self.reader.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.reply_ring.clear();
        log::debug!("hci{}: channel closed", self.dev_id);
    }

    fn dispatch(&self, event: &HciEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        for entry in callbacks.iter().filter(|e| e.event_code == event.code()) {
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (entry.callback)(event)))
            {
                log::error!(
                    "hci{}: event callback {} panicked: {panic:?}",
                    self.dev_id,
                    entry.id
                );
            }
        }
    }
}

fn reader_loop(socket: Arc<BtSocket>, hci: Weak<Hci>) {
    let mut buffer = [0_u8; 260];
    log::debug!("hci reader: started");
    loop {
        match socket.read_timeout(&mut buffer, READER_POLL_TIMEOUT_MS) {
            Ok(len) => {
                let Some(owner) = hci.upgrade() else { break };
                if owner.reader_stop.load(Ordering::SeqCst) {
                    break;
                }
                let Some(event) = HciEvent::parse(&buffer[..len]) else {
                    log::warn!("hci reader: discarding malformed packet ({len} bytes)");
                    continue;
                };
                if event.is_cmd_reply() {
                    let dropped = owner.reply_ring.put(event);
                    if dropped > 0 {
                        log::warn!("hci reader: reply ring full, dropped {dropped} oldest");
                    }
                } else {
                    owner.dispatch(&event);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                let Some(owner) = hci.upgrade() else { break };
                if owner.reader_stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(e) => {
                if let Some(owner) = hci.upgrade() {
                    if !owner.reader_stop.load(Ordering::SeqCst) {
                        log::error!("hci reader: read failed: {e}");
                    }
                }
                break;
            }
        }
    }
    log::debug!("hci reader: ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_public_maps_to_public_pair() {
        assert_eq!(
            Ok((PeerAddressType::Public, OwnAddressType::Public)),
            le_connect_address_types(AddressType::LePublic, RandomAddressType::Undefined)
        );
    }

    #[test]
    fn static_random_maps_to_random_peer() {
        assert_eq!(
            Ok((PeerAddressType::Random, OwnAddressType::Public)),
            le_connect_address_types(AddressType::LeRandom, RandomAddressType::StaticPublic)
        );
    }

    #[test]
    fn private_random_sub_types_are_rejected() {
        assert_eq!(
            Err(HciStatus::UnacceptableConnectionParam),
            le_connect_address_types(AddressType::LeRandom, RandomAddressType::ResolvablePrivate)
        );
        assert_eq!(
            Err(HciStatus::UnacceptableConnectionParam),
            le_connect_address_types(AddressType::LeRandom, RandomAddressType::UnresolvablePrivate)
        );
        assert_eq!(
            Err(HciStatus::UnacceptableConnectionParam),
            le_connect_address_types(AddressType::Bredr, RandomAddressType::Undefined)
        );
    }

    #[test]
    fn command_packet_layout() {
        let packet = command_packet(command::DISCONNECT, &[0x40, 0x00, 0x13]);
        assert_eq!(vec![0x01, 0x06, 0x04, 0x03, 0x40, 0x00, 0x13], packet);
    }

    #[test]
    fn le_create_conn_parameter_block() {
        let peer: Address = "C0:26:DA:01:DA:B1".parse().unwrap();
        let params = le_create_conn_params(
            peer,
            PeerAddressType::Random,
            OwnAddressType::Public,
            0x0060,
            0x0030,
            0x0018,
            0x0028,
            0x0000,
            0x0C80,
        );
        assert_eq!(25, params.len());
        assert_eq!([0x60, 0x00, 0x30, 0x00], params[..4]);
        assert_eq!(0x00, params[4]); // filter policy
        assert_eq!(0x01, params[5]); // peer random
        assert_eq!(peer.to_le_bytes(), params[6..12]);
        assert_eq!(0x00, params[12]); // own public
    }

    #[test]
    fn command_status_reply_parses_and_answers() {
        let frame = [0x04, 0x0F, 0x04, 0x0C, 0x01, 0x0D, 0x20];
        let event = HciEvent::parse(&frame).unwrap();
        assert!(event.is_cmd_reply());
        assert!(event.answers(command::LE_CREATE_CONN));
        assert!(!event.answers(command::DISCONNECT));
        assert_eq!(Some(HciStatus::CommandDisallowed), event.reply_status());
    }

    #[test]
    fn le_connection_complete_parses() {
        let frame = [
            0x04, 0x3E, 0x13, // event header
            0x01, // subevent: connection complete
            0x00, // success
            0x40, 0x00, // handle 0x0040
            0x00, // central
            0x01, // peer random
            0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0, // peer address
            0x28, 0x00, // interval
            0x00, 0x00, // latency
            0x80, 0x0C, // supervision timeout
            0x00, // clock accuracy
        ];
        let event = HciEvent::parse(&frame).unwrap();
        let conn = event.le_connection_complete().unwrap();
        assert_eq!(HciStatus::Success, conn.status);
        assert_eq!(0x0040, conn.handle);
        assert_eq!(AddressType::LeRandom, conn.address_type);
        assert_eq!("C0:26:DA:01:DA:B1", conn.address.to_string());
    }

    #[test]
    fn truncated_event_is_rejected() {
        assert!(HciEvent::parse(&[0x04, 0x3E]).is_none());
        assert!(HciEvent::parse(&[0x04, 0x3E, 0x05, 0x01]).is_none());
        assert!(HciEvent::parse(&[0x02, 0x3E, 0x00]).is_none());
    }
}
