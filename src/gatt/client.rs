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

//! The GATT client engine of one connected device.
//!
//! A single receive thread demultiplexes the inbound ATT stream into three
//! flows: solicited replies (handed to the one outstanding requester),
//! notifications (fanned out to listeners) and indications (fanned out, then
//! confirmed). Requests are strictly serialized; ATT forbids a second
//! outstanding request on a connection.

use crate::att::{self, opcode, AttErrorCode};
use crate::core::Uuid;
use crate::error::{Error, Result};
use crate::gatt::{
    uuids, CccdValue, CharacteristicListener, CharacteristicProperty, CharacteristicProperties,
    GattCharacteristic, GattDescriptor, GattService, GenericAccess,
};
use crate::l2cap::{ByteChannel, DEFAULT_CLIENT_MTU, MINIMAL_MTU};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Reply window for one ATT request; on expiry the channel is considered
/// broken and closed.
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Attribute handles start here.
const FIRST_HANDLE: u16 = 0x0001;
/// Highest attribute handle; a group ending here ends discovery.
const LAST_HANDLE: u16 = 0xFFFF;

struct ReplySlot {
    slot: Mutex<Option<Vec<u8>>>,
    ready: Condvar,
}

impl ReplySlot {
    fn new() -> ReplySlot {
        ReplySlot {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn clear(&self) {
        self.slot.lock().unwrap().take();
    }

    fn put(&self, pdu: Vec<u8>) {
        *self.slot.lock().unwrap() = Some(pdu);
        self.ready.notify_all();
    }

    /// Wakes the waiter without delivering anything, e.g. on channel death.
    fn interrupt(&self) {
        self.ready.notify_all();
    }

    fn take_before(&self, deadline: Instant) -> Option<Vec<u8>> {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(pdu) = slot.take() {
                return Some(pdu);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.ready.wait_timeout(slot, deadline - now).unwrap();
            slot = guard;
        }
    }
}

struct ListenerEntry {
    id: u64,
    /// Restrict delivery to one characteristic's value handle.
    value_handle: Option<u16>,
    listener: Arc<dyn CharacteristicListener>,
}

/// GATT client over one ATT channel.
pub struct GattClient {
    channel: Arc<dyn ByteChannel>,
    usable_mtu: AtomicU16,
    reply: ReplySlot,
    request_lock: Mutex<()>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    services: RwLock<Vec<Arc<GattService>>>,
    open: AtomicBool,
    receiver: Mutex<Option<std::thread::JoinHandle<()>>>,
    receiver_thread: Mutex<Option<ThreadId>>,
}

impl GattClient {
    /// Starts the engine over `channel`: spawns the receive thread and runs
    /// the MTU exchange, adopting `min(client, server)`.
    pub fn connect(channel: Arc<dyn ByteChannel>) -> Result<Arc<GattClient>> {
        let client = Arc::new(GattClient {
            channel: Arc::clone(&channel),
            usable_mtu: AtomicU16::new(MINIMAL_MTU),
            reply: ReplySlot::new(),
            request_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            services: RwLock::new(Vec::new()),
            open: AtomicBool::new(true),
            receiver: Mutex::new(None),
            receiver_thread: Mutex::new(None),
        });

        let weak = Arc::downgrade(&client);
        let receiver = std::thread::Builder::new()
            .name("att-recv".into())
            .spawn(move || receive_loop(channel, weak))
            .map_err(Error::Io)?;
        *client.receiver_thread.lock().unwrap() = Some(receiver.thread().id());
        *client.receiver.lock().unwrap() = Some(receiver);

        match client.exchange_mtu(DEFAULT_CLIENT_MTU) {
            Ok(mtu) => {
                log::debug!("gatt: channel MTU {mtu}");
                Ok(client)
            }
            Err(e) => {
                client.disconnect();
                Err(e)
            }
        }
    }

    /// The negotiated channel MTU.
    pub fn mtu(&self) -> u16 {
        self.usable_mtu.load(Ordering::SeqCst)
    }

    /// True while the channel is usable.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.channel.is_open()
    }

    /// The cached result of the last service discovery.
    pub fn services(&self) -> Vec<Arc<GattService>> {
        self.services.read().unwrap().clone()
    }

    fn exchange_mtu(&self, client_mtu: u16) -> Result<u16> {
        let rsp = self.send_with_reply(&att::exchange_mtu_req(client_mtu))?;
        let server_mtu = att::parse_exchange_mtu_rsp(&rsp[1..])
            .ok_or_else(|| Error::Protocol("short Exchange MTU response".into()))?;
        let mtu = client_mtu.min(server_mtu).max(MINIMAL_MTU);
        self.usable_mtu.store(mtu, Ordering::SeqCst);
        Ok(mtu)
    }

    /// Sends one request and blocks for its response.
    ///
    /// Requests are serialized; the response matching the outstanding opcode
    /// (or a matching `Error Response`) satisfies the caller. On timeout the
    /// channel is broken and gets closed.
    fn send_with_reply(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req_opcode = req[0];
        let expected = att::rsp_for_req(req_opcode);
        let _requester = self.request_lock.lock().unwrap();
        if !self.is_open() {
            return Err(Error::InvalidState("ATT channel is closed".into()));
        }
        self.reply.clear();
        self.channel.send(req)?;

        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            let Some(pdu) = self.reply.take_before(deadline) else {
                if !self.is_open() {
                    return Err(Error::InvalidState("ATT channel is closed".into()));
                }
                log::warn!("gatt: request {req_opcode:#04x} timed out, closing channel");
                self.disconnect();
                return Err(Error::Timeout);
            };
            match pdu.first() {
                Some(&op) if op == expected => return Ok(pdu),
                Some(&op) if op == opcode::ERROR_RSP => {
                    if let Some(error) = att::parse_error_rsp(&pdu[1..]) {
                        if error.req_opcode == req_opcode {
                            return Err(Error::Att {
                                code: error.code,
                                handle: error.handle,
                            });
                        }
                    }
                    log::debug!("gatt: dropping stale error response");
                }
                _ => log::debug!("gatt: dropping unexpected pdu while awaiting {expected:#04x}"),
            }
        }
    }

    /// Fire-and-forget send, serialized with requests.
    fn send_command(&self, pdu: &[u8]) -> Result<()> {
        let _requester = self.request_lock.lock().unwrap();
        if !self.is_open() {
            return Err(Error::InvalidState("ATT channel is closed".into()));
        }
        self.channel.send(pdu)?;
        Ok(())
    }

    /// Discovers primary services, their characteristics and descriptors,
    /// replacing the cache.
    pub fn discover_complete_primary_services(&self) -> Result<Vec<Arc<GattService>>> {
        let mut services = Vec::new();
        for group in self.discover_primary_services()? {
            let characteristics = self.discover_characteristics(group.start_handle, group.end_handle)?;
            services.push(Arc::new(GattService {
                start_handle: group.start_handle,
                end_handle: group.end_handle,
                uuid: group.uuid,
                characteristics,
            }));
        }
        *self.services.write().unwrap() = services.clone();
        Ok(services)
    }

    /// `Read By Group Type` iteration from handle 0x0001 until the attribute
    /// table ends.
    fn discover_primary_services(&self) -> Result<Vec<att::GroupEntry>> {
        let mut groups: Vec<att::GroupEntry> = Vec::new();
        let mut start = FIRST_HANDLE;
        loop {
            let req = att::read_by_group_type_req(start, LAST_HANDLE, uuids::PRIMARY_SERVICE);
            let entries = match self.send_with_reply(&req) {
                Ok(rsp) => att::parse_read_by_group_type_rsp(&rsp[1..])
                    .ok_or_else(|| Error::Protocol("malformed Read By Group Type response".into()))?,
                Err(Error::Att {
                    code: AttErrorCode::AttributeNotFound,
                    ..
                }) => break,
                Err(e) => return Err(e),
            };
            let Some(last_end) = entries.last().map(|e| e.end_handle) else {
                break;
            };
            groups.extend(entries);
            if last_end == LAST_HANDLE {
                // The table is exhausted; no further request.
                break;
            }
            start = last_end + 1;
        }
        Ok(groups)
    }

    /// `Read By Type` characteristic iteration over one service range,
    /// followed by descriptor discovery per characteristic.
    fn discover_characteristics(
        &self,
        svc_start: u16,
        svc_end: u16,
    ) -> Result<Vec<Arc<GattCharacteristic>>> {
        struct Declaration {
            decl_handle: u16,
            properties: u8,
            value_handle: u16,
            uuid: Uuid,
        }

        let mut declarations: Vec<Declaration> = Vec::new();
        let mut start = svc_start;
        'iterate: loop {
            let req = att::read_by_type_req(start, svc_end, uuids::CHARACTERISTIC);
            let entries = match self.send_with_reply(&req) {
                Ok(rsp) => att::parse_read_by_type_rsp(&rsp[1..])
                    .ok_or_else(|| Error::Protocol("malformed Read By Type response".into()))?,
                Err(Error::Att {
                    code: AttErrorCode::AttributeNotFound,
                    ..
                }) => break,
                Err(e) => return Err(e),
            };
            let mut next_start = None;
            for entry in entries {
                let Some(declaration) = parse_declaration(&entry) else {
                    return Err(Error::Protocol("malformed characteristic declaration".into()));
                };
                next_start = Some(declaration.value_handle);
                declarations.push(declaration);
            }
            match next_start {
                Some(value_handle) if value_handle < svc_end => start = value_handle + 1,
                _ => break 'iterate,
            }
        }

        fn parse_declaration(entry: &att::TypeEntry) -> Option<Declaration> {
            if entry.value.len() < 5 {
                return None;
            }
            let properties = entry.value[0];
            let value_handle = u16::from_le_bytes([entry.value[1], entry.value[2]]);
            let uuid = match entry.value.len() - 3 {
                2 => Uuid::from(crate::core::Uuid16::from_le_bytes([
                    entry.value[3],
                    entry.value[4],
                ])),
                16 => {
                    let (_, uuid) = crate::core::Uuid128::parse_le(&entry.value[3..]).ok()?;
                    Uuid::from(uuid)
                }
                _ => return None,
            };
            Some(Declaration {
                decl_handle: entry.handle,
                properties,
                value_handle,
                uuid,
            })
        }

        // The end handle of a characteristic reaches up to the next
        // declaration, bounded by the service range.
        let mut characteristics = Vec::with_capacity(declarations.len());
        for i in 0..declarations.len() {
            let end_handle = declarations
                .get(i + 1)
                .map(|next| next.decl_handle - 1)
                .unwrap_or(svc_end)
                .min(svc_end);
            let d = &declarations[i];
            let descriptors = self.discover_descriptors(d.value_handle, end_handle)?;
            characteristics.push(Arc::new(GattCharacteristic {
                decl_handle: d.decl_handle,
                value_handle: d.value_handle,
                end_handle,
                properties: CharacteristicProperties::from_bits(d.properties),
                uuid: d.uuid,
                descriptors,
            }));
        }
        Ok(characteristics)
    }

    /// `Find Information` over `[value_handle+1 ..= end_handle]`.
    fn discover_descriptors(
        &self,
        value_handle: u16,
        end_handle: u16,
    ) -> Result<Vec<GattDescriptor>> {
        let mut descriptors = Vec::new();
        if value_handle >= end_handle {
            return Ok(descriptors);
        }
        let mut start = value_handle + 1;
        while start <= end_handle {
            let req = att::find_information_req(start, end_handle);
            let entries = match self.send_with_reply(&req) {
                Ok(rsp) => att::parse_find_information_rsp(&rsp[1..])
                    .ok_or_else(|| Error::Protocol("malformed Find Information response".into()))?,
                Err(Error::Att {
                    code: AttErrorCode::AttributeNotFound,
                    ..
                }) => break,
                Err(e) => return Err(e),
            };
            let Some(&(last_handle, _)) = entries.last() else {
                break;
            };
            descriptors.extend(entries.into_iter().map(|(handle, uuid)| GattDescriptor {
                handle,
                uuid,
                value: Vec::new(),
            }));
            if last_handle >= end_handle {
                break;
            }
            start = last_handle + 1;
        }
        Ok(descriptors)
    }

    /// Reads an attribute value, following up with `Read Blob` continuations
    /// while responses fill the MTU.
    pub fn read_value(&self, handle: u16) -> Result<Vec<u8>> {
        let rsp = self.send_with_reply(&att::read_req(handle))?;
        let mut value = rsp[1..].to_vec();
        let chunk_capacity = self.mtu() as usize - 1;
        let mut last_chunk = value.len();
        while last_chunk == chunk_capacity {
            let rsp = self.send_with_reply(&att::read_blob_req(handle, value.len() as u16))?;
            let chunk = &rsp[1..];
            if chunk.is_empty() {
                break;
            }
            last_chunk = chunk.len();
            value.extend_from_slice(chunk);
        }
        Ok(value)
    }

    /// Reads a characteristic's value.
    pub fn read_characteristic(&self, characteristic: &GattCharacteristic) -> Result<Vec<u8>> {
        self.read_value(characteristic.value_handle)
    }

    /// Reads a descriptor's value.
    pub fn read_descriptor(&self, descriptor: &GattDescriptor) -> Result<Vec<u8>> {
        self.read_value(descriptor.handle)
    }

    /// Writes a characteristic value, picking the ATT method from the
    /// characteristic's properties.
    ///
    /// `Write` uses a confirmed `Write Request` (or the `Prepare`/`Execute`
    /// queue for values beyond MTU-3); a characteristic offering only
    /// `WriteWithoutResponse` silently downgrades to an unconfirmed
    /// `Write Command` and returns without awaiting a reply.
    pub fn write_characteristic(
        &self,
        characteristic: &GattCharacteristic,
        value: &[u8],
    ) -> Result<()> {
        let confirmed = characteristic
            .properties
            .has_property(CharacteristicProperty::Write);
        let unconfirmed = characteristic
            .properties
            .has_property(CharacteristicProperty::WriteWithoutResponse);
        if confirmed {
            self.write_value(characteristic.value_handle, value)
        } else if unconfirmed {
            self.send_command(&att::write_cmd(characteristic.value_handle, value))
        } else {
            Err(Error::InvalidState(format!(
                "characteristic {:#06x} is not writable",
                characteristic.value_handle
            )))
        }
    }

    /// Confirmed write of one attribute value, long writes via the
    /// prepare/execute queue.
    pub fn write_value(&self, handle: u16, value: &[u8]) -> Result<()> {
        let capacity = self.mtu() as usize - 3;
        if value.len() <= capacity {
            self.send_with_reply(&att::write_req(handle, value))?;
            return Ok(());
        }
        // Long write: queue MTU-5 sized parts, then commit.
        let part_capacity = self.mtu() as usize - 5;
        let mut offset = 0;
        while offset < value.len() {
            let end = (offset + part_capacity).min(value.len());
            self.send_with_reply(&att::prepare_write_req(
                handle,
                offset as u16,
                &value[offset..end],
            ))?;
            offset = end;
        }
        self.send_with_reply(&att::execute_write_req(true))?;
        Ok(())
    }

    /// Writes a descriptor value (always confirmed).
    pub fn write_descriptor(&self, descriptor: &GattDescriptor, value: &[u8]) -> Result<()> {
        self.write_value(descriptor.handle, value)
    }

    /// Writes the characteristic's CCCD to enable or disable notifications
    /// and indications.
    ///
    /// Returns the per-bit effective results: a bit the characteristic's
    /// properties cannot support stays false even though the write succeeds.
    pub fn config_notification_indication(
        &self,
        characteristic: &GattCharacteristic,
        enable_notify: bool,
        enable_indicate: bool,
    ) -> Result<(bool, bool)> {
        let effective_notify = enable_notify
            && characteristic
                .properties
                .has_property(CharacteristicProperty::Notify);
        let effective_indicate = enable_indicate
            && characteristic
                .properties
                .has_property(CharacteristicProperty::Indicate);
        let Some(cccd) = characteristic.cccd() else {
            log::debug!(
                "gatt: characteristic {:#06x} has no CCCD",
                characteristic.value_handle
            );
            return Ok((false, false));
        };
        let value = CccdValue {
            notify: effective_notify,
            indicate: effective_indicate,
        };
        self.write_value(cccd.handle, &value.to_bytes())?;
        Ok((effective_notify, effective_indicate))
    }

    /// Reads name and appearance from the Generic Access service, if present
    /// in the discovered services.
    pub fn read_generic_access(&self, services: &[Arc<GattService>]) -> Option<GenericAccess> {
        let gap = services
            .iter()
            .find(|s| s.uuid == Uuid::from(uuids::GENERIC_ACCESS_SERVICE))?;
        let name = gap
            .find_characteristic(uuids::DEVICE_NAME.into())
            .and_then(|c| self.read_characteristic(c).ok())
            .map(|v| String::from_utf8_lossy(&v).into_owned())?;
        let appearance = gap
            .find_characteristic(uuids::APPEARANCE.into())
            .and_then(|c| self.read_characteristic(c).ok())
            .filter(|v| v.len() >= 2)
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .unwrap_or(0);
        Some(GenericAccess {
            device_name: name,
            appearance,
        })
    }

    /// Liveness probe: re-reads the GAP device name over the open channel.
    pub fn ping(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        let services = self.services();
        match self.read_generic_access(&services) {
            Some(_) => true,
            None => self.is_open(),
        }
    }

    /// Registers a listener for all characteristics of this device.
    pub fn add_listener(&self, listener: Arc<dyn CharacteristicListener>) -> u64 {
        self.register(None, listener)
    }

    /// Registers a listener for one characteristic only.
    pub fn add_listener_for(
        &self,
        characteristic: &GattCharacteristic,
        listener: Arc<dyn CharacteristicListener>,
    ) -> u64 {
        self.register(Some(characteristic.value_handle), listener)
    }

    fn register(&self, value_handle: Option<u16>, listener: Arc<dyn CharacteristicListener>) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push(ListenerEntry {
            id,
            value_handle,
            listener,
        });
        id
    }

    /// Removes one listener registration.
    pub fn remove_listener(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|e| e.id != id);
        before != listeners.len()
    }

    /// Removes every listener bound to one characteristic. Returns the count.
    pub fn remove_all_associated_listeners(&self, characteristic: &GattCharacteristic) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|e| e.value_handle != Some(characteristic.value_handle));
        before - listeners.len()
    }

    /// Removes all listeners. Returns the count.
    pub fn remove_all_listeners(&self) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        let count = listeners.len();
        listeners.clear();
        count
    }

    /// Closes the channel out of band and stops the receive thread.
    ///
    /// Safe against concurrent and repeated calls; a blocked receive returns
    /// immediately.
    pub fn disconnect(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            log::debug!("gatt: disconnect");
        }
        self.channel.shutdown();
        self.reply.interrupt();
        let on_receiver_thread =
            *self.receiver_thread.lock().unwrap() == Some(std::thread::current().id());
        if !on_receiver_thread {
            let handle = self.receiver.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }

    fn find_characteristic_by_value_handle(&self, handle: u16) -> Option<Arc<GattCharacteristic>> {
        self.services
            .read()
            .unwrap()
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.value_handle == handle)
            .cloned()
    }

    fn dispatch_handle_value(&self, pdu: &[u8], indication: bool) {
        let Some((handle, value)) = att::parse_handle_value(&pdu[1..]) else {
            log::warn!("gatt: malformed handle-value pdu discarded");
            return;
        };
        let characteristic = self.find_characteristic_by_value_handle(handle);
        if let Some(characteristic) = characteristic {
            let timestamp_ms = crate::env::Env::get().elapsed_ms();
            // Snapshot so a listener may (de)register without deadlocking.
            let recipients: Vec<(u64, Arc<dyn CharacteristicListener>)> = self
                .listeners
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.value_handle.is_none() || e.value_handle == Some(handle))
                .map(|e| (e.id, Arc::clone(&e.listener)))
                .collect();
            for (id, listener) in recipients {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    if indication {
                        listener.indication_received(&characteristic, value, timestamp_ms, false);
                    } else {
                        listener.notification_received(&characteristic, value, timestamp_ms);
                    }
                }));
                if let Err(panic) = result {
                    log::error!("gatt: characteristic listener {id} panicked: {panic:?}");
                }
            }
        } else {
            log::debug!("gatt: value event for unknown handle {handle:#06x}");
        }
        if indication {
            if let Err(e) = self.channel.send(&att::handle_value_confirmation()) {
                log::warn!("gatt: indication confirmation failed: {e}");
            }
        }
    }
}

impl Drop for GattClient {
    fn drop(&mut self) {
        // The receive thread only holds a weak reference; closing the
        // channel unblocks it so it can observe the loss and exit.
        self.open.store(false, Ordering::SeqCst);
        self.channel.shutdown();
    }
}

fn receive_loop(channel: Arc<dyn ByteChannel>, client: Weak<GattClient>) {
    let mut buffer = vec![0_u8; DEFAULT_CLIENT_MTU as usize];
    log::debug!("att-recv: started");
    loop {
        match channel.recv(&mut buffer) {
            Ok(0) => break,
            Ok(len) => {
                let Some(owner) = client.upgrade() else { break };
                if !owner.open.load(Ordering::SeqCst) {
                    break;
                }
                let pdu = &buffer[..len];
                match pdu[0] {
                    opcode::HANDLE_VALUE_NOTIFICATION => owner.dispatch_handle_value(pdu, false),
                    opcode::HANDLE_VALUE_INDICATION => owner.dispatch_handle_value(pdu, true),
                    _ => owner.reply.put(pdu.to_vec()),
                }
            }
            Err(e) => {
                if let Some(owner) = client.upgrade() {
                    if owner.open.swap(false, Ordering::SeqCst) {
                        log::info!("att-recv: channel failed: {e}");
                    }
                    owner.reply.interrupt();
                }
                break;
            }
        }
    }
    if let Some(owner) = client.upgrade() {
        owner.open.store(false, Ordering::SeqCst);
        owner.reply.interrupt();
    }
    log::debug!("att-recv: ended");
}
