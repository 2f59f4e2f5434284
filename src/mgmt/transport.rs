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

//! The MGMT transport: one process-wide reader over the kernel management
//! control channel, with command/reply correlation and event fan-out.
//!
//! The kernel channel is a process-global resource, so [Manager] is a
//! process-wide singleton obtained through [Manager::get]. Command replies
//! (`Command Complete`/`Command Status`) land in a bounded ring consumed by
//! [Manager::send_with_reply]; all other events are dispatched synchronously
//! to callbacks registered per `(event code, adapter)`.
//!
//! Callbacks fire on the reader thread and must never wait for a command
//! reply themselves; deferred work belongs on the owning adapter's worker.

use crate::address::{Address, AddressType};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::hci::HciStatus;
use crate::mgmt::{
    AdapterInfo, BtMode, ConnParam, ConnectionInfo, MgmtCommand, MgmtEvent, MgmtEventCode,
    MgmtOpcode, MgmtStatus, ScanType, WhitelistConnectType, INDEX_NONE,
};
use crate::ring::EventRing;
use crate::sys::{self, BtSocket};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

lazy_static! {
    static ref SINGLETON: Mutex<Option<Arc<Manager>>> = Mutex::new(None);
}

/// Callback invoked on the reader thread for a subscribed MGMT event.
pub type MgmtEventCallback = Box<dyn Fn(&MgmtEvent) + Send + Sync>;

struct CallbackEntry {
    id: u64,
    /// Adapter filter; negative subscribes to all adapters.
    dev_id: i32,
    callback: MgmtEventCallback,
}

#[derive(Clone, PartialEq, Eq)]
struct WhitelistEntry {
    dev_id: u16,
    address: Address,
    address_type: AddressType,
    ctype: WhitelistConnectType,
}

/// The process-wide MGMT control channel.
pub struct Manager {
    env: &'static Env,
    default_mode: BtMode,
    socket: Arc<BtSocket>,
    reply_ring: EventRing<MgmtEvent>,
    send_lock: Mutex<()>,
    callbacks: Mutex<HashMap<u16, Vec<CallbackEntry>>>,
    next_callback_id: AtomicU64,
    adapter_infos: Mutex<Vec<Option<AdapterInfo>>>,
    whitelist: Mutex<Vec<WhitelistEntry>>,
    reader_stop: AtomicBool,
    reader: Mutex<Option<std::thread::JoinHandle<()>>>,
    reader_thread: Mutex<Option<sys::RawThread>>,
}

impl Manager {
    /// Returns the singleton, opening the control channel and enumerating
    /// adapters on first use.
    ///
    /// `default_mode` selects the host mode newly initialized adapters get;
    /// [BtMode::None] maps to LE only. The mode of an already-open singleton
    /// is not changed by later calls.
    pub fn get(default_mode: BtMode) -> Result<Arc<Manager>> {
        let mut singleton = SINGLETON.lock().unwrap();
        if let Some(manager) = singleton.as_ref() {
            return Ok(Arc::clone(manager));
        }
        let manager = Manager::open(default_mode)?;
        *singleton = Some(Arc::clone(&manager));
        Ok(manager)
    }

    fn open(default_mode: BtMode) -> Result<Arc<Manager>> {
        let env = Env::get();
        let socket = Arc::new(BtSocket::open_mgmt()?);
        sys::install_noop_sigalrm_handler()?;

        let manager = Arc::new(Manager {
            env,
            default_mode: if default_mode == BtMode::None {
                BtMode::Le
            } else {
                default_mode
            },
            socket: Arc::clone(&socket),
            reply_ring: EventRing::new(env.mgmt_ring_capacity),
            send_lock: Mutex::new(()),
            callbacks: Mutex::new(HashMap::new()),
            next_callback_id: AtomicU64::new(1),
            adapter_infos: Mutex::new(Vec::new()),
            whitelist: Mutex::new(Vec::new()),
            reader_stop: AtomicBool::new(false),
            reader: Mutex::new(None),
            reader_thread: Mutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let reader = std::thread::Builder::new()
            .name("mgmt-reader".into())
            .spawn(move || reader_loop(socket, weak))
            .map_err(Error::Io)?;
        *manager.reader_thread.lock().unwrap() = Some(reader.as_pthread_t());
        *manager.reader.lock().unwrap() = Some(reader);

        manager.bring_up()?;
        Ok(manager)
    }

    /// Mandatory version check, optional command enumeration, adapter
    /// enumeration and per-adapter init.
    fn bring_up(&self) -> Result<()> {
        let reply = self.send_with_reply(&MgmtCommand::new(MgmtOpcode::ReadVersion, INDEX_NONE))?;
        let (_, status, data) = reply
            .cmd_complete()
            .ok_or_else(|| Error::Protocol("unexpected READ_VERSION reply".into()))?;
        if status != MgmtStatus::Success || data.len() < 3 {
            return Err(Error::Protocol(format!("READ_VERSION failed: {status:?}")));
        }
        let version = data[0];
        let revision = u16::from_le_bytes([data[1], data[2]]);
        log::info!("mgmt: Bluetooth management version {version}.{revision}");
        if version < 1 {
            return Err(Error::NotSupported(
                "Bluetooth management version >= 1.0 required".into(),
            ));
        }

        // Optional; some kernels restrict it.
        if let Ok(reply) = self.send_with_reply(&MgmtCommand::new(MgmtOpcode::ReadCommands, INDEX_NONE))
        {
            if let Some((_, MgmtStatus::Success, data)) = reply.cmd_complete() {
                if data.len() >= 4 {
                    let num_commands = u16::from_le_bytes([data[0], data[1]]);
                    let num_events = u16::from_le_bytes([data[2], data[3]]);
                    log::info!("mgmt: kernel supports {num_commands} commands, {num_events} events");
                }
            }
        }

        let reply = self.send_with_reply(&MgmtCommand::new(MgmtOpcode::ReadIndexList, INDEX_NONE))?;
        let (_, status, data) = reply
            .cmd_complete()
            .ok_or_else(|| Error::Protocol("unexpected READ_INDEX_LIST reply".into()))?;
        if status != MgmtStatus::Success || data.len() < 2 {
            return Err(Error::Protocol(format!("READ_INDEX_LIST failed: {status:?}")));
        }
        let num_adapter = u16::from_le_bytes([data[0], data[1]]) as usize;
        if data.len() < 2 + num_adapter * 2 {
            return Err(Error::Protocol(format!(
                "READ_INDEX_LIST short: {} adapters, {} bytes",
                num_adapter,
                data.len()
            )));
        }
        log::info!("mgmt: {num_adapter} adapter(s)");

        let mut infos: Vec<Option<AdapterInfo>> = vec![None; num_adapter];
        for i in 0..num_adapter {
            let dev_id = u16::from_le_bytes([data[2 + i * 2], data[3 + i * 2]]);
            if dev_id as usize >= num_adapter {
                return Err(Error::Protocol(format!(
                    "adapter index {dev_id} out of range 0..{num_adapter}"
                )));
            }
            if infos[dev_id as usize].is_some() {
                return Err(Error::Protocol(format!("duplicate adapter index {dev_id}")));
            }
            match self.init_adapter(dev_id, self.default_mode) {
                Ok(info) => {
                    log::debug!("mgmt: adapter {dev_id} ready: {}", info.address);
                    infos[dev_id as usize] = Some(info);
                }
                Err(e) => {
                    log::error!("mgmt: adapter {dev_id} init failed: {e}");
                }
            }
        }
        *self.adapter_infos.lock().unwrap() = infos;
        Ok(())
    }

    /// Brings one adapter into the requested host mode: modes per `BtMode`,
    /// connectable and fast-connectable off, whitelist flushed, powered on,
    /// settings re-read.
    pub fn init_adapter(&self, dev_id: u16, mode: BtMode) -> Result<AdapterInfo> {
        let info = self.read_info(dev_id)?;
        log::debug!("mgmt: init adapter {dev_id}, current {:?}", info.current_settings);

        let (ssp, bredr, le) = match mode {
            BtMode::Dual => (1, 1, 1),
            BtMode::Bredr => (1, 1, 0),
            BtMode::None | BtMode::Le => (0, 0, 1),
        };
        self.set_mode(dev_id, MgmtOpcode::SetSsp, ssp)?;
        self.set_mode(dev_id, MgmtOpcode::SetBredr, bredr)?;
        self.set_mode(dev_id, MgmtOpcode::SetLe, le)?;
        self.set_mode(dev_id, MgmtOpcode::SetConnectable, 0)?;
        self.set_mode(dev_id, MgmtOpcode::SetFastConnectable, 0)?;

        self.remove_device_from_whitelist(dev_id, crate::address::ANY, AddressType::Bredr);

        if !self.set_mode(dev_id, MgmtOpcode::SetPowered, 1)? {
            return Err(Error::InvalidState(format!("adapter {dev_id}: power-on rejected")));
        }
        self.read_info(dev_id)
    }

    /// Symmetric shutdown: connectable, fast-connectable, discoverable and
    /// power all off.
    pub fn shutdown_adapter(&self, dev_id: u16) {
        for opcode in [
            MgmtOpcode::SetConnectable,
            MgmtOpcode::SetFastConnectable,
            MgmtOpcode::SetDiscoverable,
            MgmtOpcode::SetPowered,
        ] {
            if let Err(e) = self.set_mode(dev_id, opcode, 0) {
                log::debug!("mgmt: adapter {dev_id} shutdown {opcode:?} failed: {e}");
            }
        }
    }

    /// Issues `Read Controller Info`.
    pub fn read_info(&self, dev_id: u16) -> Result<AdapterInfo> {
        let reply = self.send_with_reply(&MgmtCommand::new(MgmtOpcode::ReadInfo, dev_id))?;
        let (_, status, data) = reply
            .cmd_complete()
            .ok_or_else(|| Error::Protocol("unexpected READ_INFO reply".into()))?;
        if status != MgmtStatus::Success {
            return Err(Error::InvalidState(format!(
                "adapter {dev_id}: READ_INFO failed: {status:?}"
            )));
        }
        let info = AdapterInfo::parse(dev_id, data)
            .ok_or_else(|| Error::Protocol("short READ_INFO payload".into()))?;
        if let Some(slot) = self
            .adapter_infos
            .lock()
            .unwrap()
            .get_mut(dev_id as usize)
        {
            *slot = Some(info.clone());
        }
        Ok(info)
    }

    /// Sends one command and blocks for the validated reply.
    ///
    /// One writer at a time; stale replies of earlier timed-out commands are
    /// discarded, bounded by the ring capacity.
    pub fn send_with_reply(&self, req: &MgmtCommand) -> Result<MgmtEvent> {
        let _sender = self.send_lock.lock().unwrap();
        if self.env.debug_mgmt_event {
            log::debug!("mgmt: send {:?} dev {}", req.opcode, req.dev_id);
        }
        self.socket.write_all(&req.to_bytes())?;

        let timeout = Duration::from_millis(self.env.mgmt_cmd_timeout_ms as u64);
        for _ in 0..self.env.mgmt_ring_capacity {
            let Some(reply) = self.reply_ring.pop_timeout(timeout) else {
                log::warn!("mgmt: {:?} timed out, dev {}", req.opcode, req.dev_id);
                return Err(Error::Timeout);
            };
            if reply.validate(req) {
                if self.env.debug_mgmt_event {
                    log::debug!("mgmt: reply for {:?}: {:?}", req.opcode, reply.status());
                }
                return Ok(reply);
            }
            // A reply to a previously timed-out command; drop it.
            log::debug!(
                "mgmt: dropping stale reply {:?} while waiting for {:?}",
                reply.event_code(),
                req.opcode
            );
        }
        Err(Error::Timeout)
    }

    /// Issues a single-byte mode command, returning kernel acceptance.
    pub fn set_mode(&self, dev_id: u16, opcode: MgmtOpcode, mode: u8) -> Result<bool> {
        let reply = self.send_with_reply(&MgmtCommand::set_mode(opcode, dev_id, mode))?;
        let accepted = reply.status() == Some(MgmtStatus::Success);
        log::debug!("mgmt: {opcode:?}({mode}) dev {dev_id}: accepted {accepted}");
        Ok(accepted)
    }

    /// Issues `Start Discovery`, returning the scan type the kernel
    /// confirmed, or [ScanType::None] on rejection.
    pub fn start_discovery(&self, dev_id: u16, scan_type: ScanType) -> Result<ScanType> {
        let reply = self.send_with_reply(&MgmtCommand::discovery(
            MgmtOpcode::StartDiscovery,
            dev_id,
            scan_type,
        ))?;
        match reply.cmd_complete() {
            Some((_, MgmtStatus::Success, data)) if !data.is_empty() => {
                Ok(ScanType::from_code(data[0]))
            }
            _ => Ok(ScanType::None),
        }
    }

    /// Issues `Stop Discovery`.
    pub fn stop_discovery(&self, dev_id: u16, scan_type: ScanType) -> Result<bool> {
        let reply = self.send_with_reply(&MgmtCommand::discovery(
            MgmtOpcode::StopDiscovery,
            dev_id,
            scan_type,
        ))?;
        Ok(reply.status() == Some(MgmtStatus::Success))
    }

    /// Closes a connection via MGMT `Disconnect`, or posts a synthetic
    /// `Device Disconnected` when the link already died of an I/O error.
    pub fn disconnect(
        &self,
        io_error_cause: bool,
        dev_id: u16,
        peer: Address,
        peer_type: AddressType,
        reason: HciStatus,
    ) -> bool {
        if io_error_cause {
            self.post_event(MgmtEvent::synthetic_device_disconnected(
                dev_id, peer, peer_type, reason,
            ));
            return false;
        }
        match self.send_with_reply(&MgmtCommand::with_address(
            MgmtOpcode::Disconnect,
            dev_id,
            peer,
            peer_type,
        )) {
            Ok(reply) => reply.status() == Some(MgmtStatus::Success),
            Err(_) => false,
        }
    }

    /// Issues `Get Connection Information` for one connected peer.
    pub fn get_connection_info(
        &self,
        dev_id: u16,
        peer: Address,
        peer_type: AddressType,
    ) -> Result<ConnectionInfo> {
        let reply = self.send_with_reply(&MgmtCommand::with_address(
            MgmtOpcode::GetConnInfo,
            dev_id,
            peer,
            peer_type,
        ))?;
        match reply.cmd_complete() {
            Some((_, MgmtStatus::Success, data)) => ConnectionInfo::parse(data)
                .ok_or_else(|| Error::Protocol("short GET_CONN_INFO payload".into())),
            Some((_, status, _)) => Err(Error::InvalidState(format!(
                "GET_CONN_INFO failed: {status:?}"
            ))),
            None => Err(Error::Protocol("unexpected GET_CONN_INFO reply".into())),
        }
    }

    /// Uploads preferred connection parameters for one peer.
    pub fn upload_conn_param(
        &self,
        dev_id: u16,
        peer: Address,
        peer_type: AddressType,
        param: ConnParam,
    ) -> Result<bool> {
        let reply = self.send_with_reply(&MgmtCommand::load_conn_param(
            dev_id, peer, peer_type, param,
        ))?;
        Ok(reply.status() == Some(MgmtStatus::Success))
    }

    /// Sets the adapter name, posting a synthetic `Local Name Changed` on
    /// success.
    pub fn set_local_name(
        &self,
        dev_id: u16,
        name: &str,
        short_name: &str,
    ) -> Result<()> {
        let reply =
            self.send_with_reply(&MgmtCommand::set_local_name(dev_id, name, short_name))?;
        if reply.status() != Some(MgmtStatus::Success) {
            return Err(Error::InvalidState(format!(
                "SET_LOCAL_NAME failed: {:?}",
                reply.status()
            )));
        }
        self.post_event(MgmtEvent::synthetic_local_name_changed(dev_id, name, short_name));
        Ok(())
    }

    /// True iff the peer is in the local shadow whitelist.
    pub fn is_device_whitelisted(&self, dev_id: u16, address: Address) -> bool {
        self.whitelist
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.dev_id == dev_id && e.address == address)
    }

    /// Adds a peer to the kernel whitelist.
    ///
    /// Duplicates are rejected against the local shadow list before any
    /// command is sent; kernel acceptance is required for local insertion.
    pub fn add_device_to_whitelist(
        &self,
        dev_id: u16,
        address: Address,
        address_type: AddressType,
        ctype: WhitelistConnectType,
    ) -> Result<bool> {
        if self.is_device_whitelisted(dev_id, address) {
            log::error!("mgmt: {address} already whitelisted on adapter {dev_id}, remove first");
            return Ok(false);
        }
        let reply = self.send_with_reply(&MgmtCommand::add_device(
            dev_id,
            address,
            address_type,
            ctype,
        ))?;
        if reply.status() == Some(MgmtStatus::Success) {
            self.whitelist.lock().unwrap().push(WhitelistEntry {
                dev_id,
                address,
                address_type,
                ctype,
            });
            return Ok(true);
        }
        Ok(false)
    }

    /// Removes a peer from the local shadow list, then from the kernel.
    pub fn remove_device_from_whitelist(
        &self,
        dev_id: u16,
        address: Address,
        address_type: AddressType,
    ) -> bool {
        self.whitelist
            .lock()
            .unwrap()
            .retain(|e| !(e.dev_id == dev_id && e.address == address));
        match self.send_with_reply(&MgmtCommand::with_address(
            MgmtOpcode::RemoveDevice,
            dev_id,
            address,
            address_type,
        )) {
            Ok(reply) => reply.status() == Some(MgmtStatus::Success),
            Err(_) => false,
        }
    }

    /// Flushes the whitelist of every known adapter. Returns how many local
    /// entries were dropped.
    pub fn remove_all_devices_from_whitelist(&self) -> usize {
        let entries: Vec<WhitelistEntry> =
            std::mem::take(&mut *self.whitelist.lock().unwrap());
        for entry in &entries {
            log::debug!(
                "mgmt: dropping whitelist entry {} ({:?}, {:?}) on adapter {}",
                entry.address,
                entry.address_type,
                entry.ctype,
                entry.dev_id
            );
        }
        let count = entries.len();
        for dev_id in self.adapter_ids() {
            self.remove_device_from_whitelist(dev_id, crate::address::ANY, AddressType::Bredr);
        }
        log::debug!("mgmt: whitelist flushed, {count} local entries removed");
        count
    }

    /// The known adapter indices, in index order.
    pub fn adapter_ids(&self) -> Vec<u16> {
        self.adapter_infos
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(i, info)| info.as_ref().map(|_| i as u16))
            .collect()
    }

    /// The cached info of one adapter.
    pub fn adapter_info(&self, dev_id: u16) -> Option<AdapterInfo> {
        self.adapter_infos
            .lock()
            .unwrap()
            .get(dev_id as usize)
            .and_then(|info| info.clone())
    }

    /// Finds an adapter by its controller address.
    pub fn find_adapter_info(&self, address: Address) -> Option<AdapterInfo> {
        self.adapter_infos
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .find(|info| info.address == address)
            .cloned()
    }

    pub(crate) fn add_adapter_slot(&self, dev_id: u16, info: Option<AdapterInfo>) {
        let mut infos = self.adapter_infos.lock().unwrap();
        if infos.len() <= dev_id as usize {
            infos.resize(dev_id as usize + 1, None);
        }
        infos[dev_id as usize] = info;
    }

    pub(crate) fn clear_adapter_slot(&self, dev_id: u16) {
        if let Some(slot) = self.adapter_infos.lock().unwrap().get_mut(dev_id as usize) {
            *slot = None;
        }
    }

    /// Registers `callback` for `(code, dev_id)`; `dev_id` -1 subscribes to
    /// every adapter. Returns a registration id for removal.
    pub fn add_event_callback(
        &self,
        dev_id: i32,
        code: MgmtEventCode,
        callback: impl Fn(&MgmtEvent) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks
            .lock()
            .unwrap()
            .entry(code.code())
            .or_default()
            .push(CallbackEntry {
                id,
                dev_id,
                callback: Box::new(callback),
            });
        id
    }

    /// Removes one registration; unknown ids are ignored.
    pub fn remove_event_callback(&self, id: u64) {
        for entries in self.callbacks.lock().unwrap().values_mut() {
            entries.retain(|e| e.id != id);
        }
    }

    /// Removes every registration bound to one adapter. Returns the count.
    pub fn remove_event_callbacks_for(&self, dev_id: i32) -> usize {
        let mut removed = 0;
        for entries in self.callbacks.lock().unwrap().values_mut() {
            let before = entries.len();
            entries.retain(|e| e.dev_id != dev_id);
            removed += before - entries.len();
        }
        removed
    }

    /// Drops every registration for one event code.
    pub fn clear_event_callbacks(&self, code: MgmtEventCode) {
        self.callbacks.lock().unwrap().remove(&code.code());
    }

    /// Drops all registrations.
    pub fn clear_all_event_callbacks(&self) {
        self.callbacks.lock().unwrap().clear();
    }

    /// Dispatches `event` to all matching callbacks, locally synthesized
    /// events included. Runs on the caller's thread.
    pub fn post_event(&self, event: MgmtEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        let Some(entries) = callbacks.get(&event.raw_code()) else {
            return;
        };
        let dev_id = event.dev_id() as i32;
        for entry in entries.iter().filter(|e| e.dev_id < 0 || e.dev_id == dev_id) {
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (entry.callback)(&event)))
            {
                log::error!("mgmt: event callback {} panicked: {panic:?}", entry.id);
            }
        }
    }

    /// Shuts the channel down: whitelists flushed, callbacks cleared, every
    /// adapter powered off, reader stopped via stop flag plus `SIGALRM`.
    pub fn close(&self) {
        log::debug!("mgmt: close");
        self.remove_all_devices_from_whitelist();
        self.clear_all_event_callbacks();
        for dev_id in self.adapter_ids() {
            self.shutdown_adapter(dev_id);
        }
        self.adapter_infos.lock().unwrap().clear();

        self.reader_stop.store(true, Ordering::SeqCst);
        if let Some(thread) = *self.reader_thread.lock().unwrap() {
            sys::interrupt_thread(thread);
        }
        self.socket.shutdown();
        let handle = self.reader.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        let flushed = self.reply_ring.clear();
        log::info!("mgmt: reader ended, {flushed} queued replies flushed");
        sys::restore_default_sigalrm_handler();
        SINGLETON.lock().unwrap().take();
    }
}

fn reader_loop(socket: Arc<BtSocket>, manager: Weak<Manager>) {
    let mut buffer = [0_u8; 1024];
    log::debug!("mgmt reader: started");
    loop {
        let timeout_ms = match manager.upgrade() {
            Some(owner) => {
                if owner.reader_stop.load(Ordering::SeqCst) {
                    break;
                }
                owner.env.mgmt_reader_timeout_ms
            }
            None => break,
        };
        match socket.read_timeout(&mut buffer, timeout_ms) {
            Ok(len) => {
                let Some(owner) = manager.upgrade() else { break };
                if owner.reader_stop.load(Ordering::SeqCst) {
                    break;
                }
                if len < 6 {
                    log::warn!("mgmt reader: runt frame ({len} bytes) discarded");
                    continue;
                }
                let param_len = u16::from_le_bytes([buffer[4], buffer[5]]) as usize;
                if len < 6 + param_len {
                    log::warn!("mgmt reader: length mismatch {len} < 6 + {param_len}, frame discarded");
                    continue;
                }
                let Some(event) = MgmtEvent::parse(&buffer[..6 + param_len]) else {
                    continue;
                };
                if owner.env.debug_mgmt_event {
                    log::debug!(
                        "mgmt reader: recv {:?} dev {}",
                        event.event_code(),
                        event.dev_id()
                    );
                }
                if event.is_cmd_reply() {
                    // Reply correlation may drop stale replies, never block
                    // the kernel.
                    let dropped = owner.reply_ring.put(event);
                    if dropped > 0 {
                        log::warn!("mgmt reader: reply ring full, dropped {dropped} oldest");
                    }
                } else {
                    owner.post_event(event);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => {
                if let Some(owner) = manager.upgrade() {
                    if !owner.reader_stop.load(Ordering::SeqCst) {
                        log::error!("mgmt reader: read failed: {e}");
                    }
                }
                break;
            }
        }
    }
    log::debug!("mgmt reader: ended");
}
