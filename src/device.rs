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

//! Per-remote-peer lifecycle: discovered, connecting, connected, GATT open,
//! disconnecting.
//!
//! A `Device` belongs to exactly one adapter and is reached through it; the
//! back reference is weak, so the adapter remains the single owner. The
//! disconnect path is guarded by a compare-and-set on `allow_disconnect` so
//! that of any number of concurrent disconnect attempts exactly one proceeds.

use crate::address::{Address, AddressType, RandomAddressType};
use crate::adapter::Adapter;
use crate::adv::{EirDataField, EirDataMask, EirReport, ManufacturerData};
use crate::core::Uuid;
use crate::error::{Error, Result};
use crate::gatt::client::GattClient;
use crate::gatt::{CharacteristicListener, GattService, GenericAccess};
use crate::hci::{self, HciStatus};
use crate::l2cap::L2capChannel;
use crate::mgmt::ConnectionInfo;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Default LE connection parameters, 0.625 ms / 1.25 ms / 10 ms units.
pub mod le_conn_defaults {
    /// Scan interval while connecting.
    pub const SCAN_INTERVAL: u16 = 0x0060;
    /// Scan window while connecting.
    pub const SCAN_WINDOW: u16 = 0x0030;
    /// Minimum connection interval.
    pub const CONN_INTERVAL_MIN: u16 = 0x0018;
    /// Maximum connection interval.
    pub const CONN_INTERVAL_MAX: u16 = 0x0028;
    /// Slave latency.
    pub const CONN_LATENCY: u16 = 0x0000;
    /// Supervision timeout.
    pub const SUPERVISION_TIMEOUT: u16 = 0x0C80;
}

/// Default BR/EDR `Create Connection` packet types (DM1..DH5).
pub const BREDR_DEFAULT_PKT_TYPES: u16 = 0xCC18;

struct DeviceData {
    name: String,
    rssi: i8,
    tx_power: i8,
    appearance: u16,
    manufacturer_data: Option<ManufacturerData>,
    services: Vec<Uuid>,
}

/// One remote peer as tracked by its adapter.
pub struct Device {
    adapter: Weak<Adapter>,
    address: Address,
    address_type: AddressType,
    le_random_address_type: RandomAddressType,
    ts_creation_ms: u64,
    ts_last_discovery_ms: AtomicU64,
    ts_last_update_ms: AtomicU64,
    data: Mutex<DeviceData>,
    is_connected: AtomicBool,
    allow_disconnect: AtomicBool,
    conn_handle: AtomicU16,
    connect_lock: Mutex<()>,
    gatt: Mutex<Option<Arc<GattClient>>>,
    generic_access: Mutex<Option<GenericAccess>>,
}

impl Device {
    /// Builds a device from its first report. The report must carry address
    /// and address type; an LE random address must have a defined sub-type.
    pub(crate) fn new(adapter: Weak<Adapter>, report: &EirReport) -> Result<Device> {
        if !report.is_set(EirDataField::Address) {
            return Err(Error::InvalidState("report carries no address".into()));
        }
        if !report.is_set(EirDataField::AddressType) {
            return Err(Error::InvalidState("report carries no address type".into()));
        }
        let address = report.address();
        let address_type = report.address_type();
        let le_random_address_type = address.random_address_type(address_type);
        if address_type == AddressType::LeRandom
            && le_random_address_type == RandomAddressType::Undefined
        {
            return Err(Error::InvalidState(format!(
                "LE random address {address} with undefined sub-type"
            )));
        }
        let device = Device {
            adapter,
            address,
            address_type,
            le_random_address_type,
            ts_creation_ms: report.timestamp_ms(),
            ts_last_discovery_ms: AtomicU64::new(report.timestamp_ms()),
            ts_last_update_ms: AtomicU64::new(report.timestamp_ms()),
            data: Mutex::new(DeviceData {
                name: String::new(),
                rssi: 0,
                tx_power: 0,
                appearance: 0,
                manufacturer_data: None,
                services: Vec::new(),
            }),
            is_connected: AtomicBool::new(false),
            allow_disconnect: AtomicBool::new(false),
            conn_handle: AtomicU16::new(0),
            connect_lock: Mutex::new(()),
            gatt: Mutex::new(None),
            generic_access: Mutex::new(None),
        };
        device.update_from_eir(report);
        Ok(device)
    }

    /// Remote address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Remote address type.
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// LE random sub-type, defined only for LE random addresses.
    pub fn random_address_type(&self) -> RandomAddressType {
        self.le_random_address_type
    }

    /// When the device was first seen, ms since process start.
    pub fn creation_timestamp_ms(&self) -> u64 {
        self.ts_creation_ms
    }

    /// When the device was last reported by discovery.
    pub fn last_discovery_timestamp_ms(&self) -> u64 {
        self.ts_last_discovery_ms.load(Ordering::SeqCst)
    }

    /// When any attribute last changed.
    pub fn last_update_timestamp_ms(&self) -> u64 {
        self.ts_last_update_ms.load(Ordering::SeqCst)
    }

    /// Current device name.
    pub fn name(&self) -> String {
        self.data.lock().unwrap().name.clone()
    }

    /// Last observed signal strength, dBm.
    pub fn rssi(&self) -> i8 {
        self.data.lock().unwrap().rssi
    }

    /// Last observed transmit power, dBm.
    pub fn tx_power(&self) -> i8 {
        self.data.lock().unwrap().tx_power
    }

    /// GAP appearance.
    pub fn appearance(&self) -> u16 {
        self.data.lock().unwrap().appearance
    }

    /// Manufacturer-specific advertising data.
    pub fn manufacturer_data(&self) -> Option<ManufacturerData> {
        self.data.lock().unwrap().manufacturer_data.clone()
    }

    /// Advertised service UUIDs collected so far.
    pub fn advertised_services(&self) -> Vec<Uuid> {
        self.data.lock().unwrap().services.clone()
    }

    /// True while an active connection exists.
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    /// HCI connection handle; zero iff not connected.
    pub fn connection_handle(&self) -> u16 {
        self.conn_handle.load(Ordering::SeqCst)
    }

    /// Merges a discovery report into the record, returning the mask of
    /// attributes that actually changed.
    ///
    /// A name only grows longer; the short name fills in only while no name
    /// is known. Scalar fields update on change; advertised services are
    /// deduplicated.
    pub(crate) fn update_from_eir(&self, report: &EirReport) -> EirDataMask {
        let mut changed = EirDataMask::NONE;
        let mut data = self.data.lock().unwrap();
        self.ts_last_update_ms
            .store(report.timestamp_ms(), Ordering::SeqCst);
        if report.is_set(EirDataField::Address) && report.address() != self.address {
            log::warn!(
                "device {}: address change to {} not supported",
                self.address,
                report.address()
            );
        }
        if report.is_set(EirDataField::AddressType) && report.address_type() != self.address_type {
            log::warn!("device {}: address type change not supported", self.address);
        }
        if report.is_set(EirDataField::Name)
            && (data.name.is_empty() || report.name().len() > data.name.len())
        {
            data.name = report.name().to_string();
            changed.set(EirDataField::Name);
        }
        if report.is_set(EirDataField::NameShort) && data.name.is_empty() {
            data.name = report.name_short().to_string();
            changed.set(EirDataField::NameShort);
        }
        if report.is_set(EirDataField::Rssi) && data.rssi != report.rssi() {
            data.rssi = report.rssi();
            changed.set(EirDataField::Rssi);
        }
        if report.is_set(EirDataField::TxPower) && data.tx_power != report.tx_power() {
            data.tx_power = report.tx_power();
            changed.set(EirDataField::TxPower);
        }
        if report.is_set(EirDataField::Appearance) && data.appearance != report.appearance() {
            data.appearance = report.appearance();
            changed.set(EirDataField::Appearance);
        }
        if report.is_set(EirDataField::ManufacturerData)
            && data.manufacturer_data.as_ref() != report.manufacturer_data()
        {
            data.manufacturer_data = report.manufacturer_data().cloned();
            changed.set(EirDataField::ManufacturerData);
        }
        for uuid in report.services() {
            if !data.services.contains(uuid) {
                data.services.push(*uuid);
                changed.set(EirDataField::ServiceUuid);
            }
        }
        changed
    }

    /// Merges name and appearance read from the Generic Access service.
    pub(crate) fn update_from_generic_access(
        &self,
        access: &GenericAccess,
        timestamp_ms: u64,
    ) -> EirDataMask {
        let mut changed = EirDataMask::NONE;
        let mut data = self.data.lock().unwrap();
        self.ts_last_update_ms.store(timestamp_ms, Ordering::SeqCst);
        if !access.device_name.is_empty()
            && (data.name.is_empty() || access.device_name.len() > data.name.len())
        {
            data.name = access.device_name.clone();
            changed.set(EirDataField::Name);
        }
        if data.appearance != access.appearance {
            data.appearance = access.appearance;
            changed.set(EirDataField::Appearance);
        }
        changed
    }

    pub(crate) fn mark_discovered(&self, timestamp_ms: u64) {
        self.ts_last_discovery_ms.store(timestamp_ms, Ordering::SeqCst);
    }

    /// Connects using the transport implied by the address type.
    pub fn connect_default(&self) -> HciStatus {
        match self.address_type {
            AddressType::LePublic | AddressType::LeRandom => self.connect_le_default(),
            AddressType::Bredr => self.connect_bredr_default(),
            AddressType::Undefined => HciStatus::UnacceptableConnectionParam,
        }
    }

    /// [Device::connect_le] with the stack's default parameters.
    pub fn connect_le_default(&self) -> HciStatus {
        self.connect_le(
            le_conn_defaults::SCAN_INTERVAL,
            le_conn_defaults::SCAN_WINDOW,
            le_conn_defaults::CONN_INTERVAL_MIN,
            le_conn_defaults::CONN_INTERVAL_MAX,
            le_conn_defaults::CONN_LATENCY,
            le_conn_defaults::SUPERVISION_TIMEOUT,
        )
    }

    /// Issues `LE Create Connection` towards this device.
    ///
    /// Returns success when the attempt is pending; the connection itself is
    /// reported asynchronously. Private random peers are rejected before any
    /// command is issued.
    pub fn connect_le(
        &self,
        scan_interval: u16,
        scan_window: u16,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
    ) -> HciStatus {
        let _connecting = self.connect_lock.lock().unwrap();

        let (peer_type, own_type) =
            match hci::le_connect_address_types(self.address_type, self.le_random_address_type) {
                Ok(pair) => pair,
                Err(status) => {
                    log::error!(
                        "device {}: cannot connect, address type {} ({})",
                        self.address,
                        self.address_type,
                        self.le_random_address_type
                    );
                    return status;
                }
            };

        if self.is_connected() {
            log::error!("device {}: already connected", self.address);
            return HciStatus::ConnectionAlreadyExists;
        }

        let Some(adapter) = self.adapter.upgrade() else {
            return HciStatus::InternalFailure;
        };
        let status = adapter.hci().le_create_conn(
            self.address,
            peer_type,
            own_type,
            scan_interval,
            scan_window,
            conn_interval_min,
            conn_interval_max,
            conn_latency,
            supervision_timeout,
        );
        // Accept a racing disconnect from here on; the completion event may
        // never arrive.
        self.allow_disconnect.store(true, Ordering::SeqCst);
        match status {
            HciStatus::Success => {}
            HciStatus::CommandDisallowed => {
                log::warn!("device {}: connection not yet possible: {status:?}", self.address)
            }
            _ => log::error!("device {}: LE connect failed: {status:?}", self.address),
        }
        status
    }

    /// [Device::connect_bredr] with the stack's default parameters.
    pub fn connect_bredr_default(&self) -> HciStatus {
        self.connect_bredr(BREDR_DEFAULT_PKT_TYPES, 0x0000, 0x01)
    }

    /// Issues the BR/EDR `Create Connection` counterpart.
    pub fn connect_bredr(&self, pkt_type: u16, clock_offset: u16, role_switch: u8) -> HciStatus {
        let _connecting = self.connect_lock.lock().unwrap();
        if self.is_connected() {
            log::error!("device {}: already connected", self.address);
            return HciStatus::ConnectionAlreadyExists;
        }
        if self.address_type != AddressType::Bredr {
            log::error!("device {}: not a BR/EDR address", self.address);
            return HciStatus::UnacceptableConnectionParam;
        }
        let Some(adapter) = self.adapter.upgrade() else {
            return HciStatus::InternalFailure;
        };
        let status = adapter
            .hci()
            .create_conn(self.address, pkt_type, clock_offset, role_switch);
        self.allow_disconnect.store(true, Ordering::SeqCst);
        if status != HciStatus::Success {
            log::error!("device {}: BR/EDR connect failed: {status:?}", self.address);
        }
        status
    }

    /// Transition on an inbound connection-complete: store the handle and
    /// permit a disconnect.
    pub(crate) fn notify_connected(&self, handle: u16) {
        log::debug!(
            "device {}: connected, handle {:#06x} -> {handle:#06x}",
            self.address,
            self.connection_handle()
        );
        self.is_connected.store(true, Ordering::SeqCst);
        self.allow_disconnect.store(true, Ordering::SeqCst);
        self.conn_handle.store(handle, Ordering::SeqCst);
    }

    /// Transition on an inbound disconnect event: tear down GATT and clear
    /// the connection state.
    pub(crate) fn notify_disconnected(&self) {
        log::debug!(
            "device {}: disconnected, handle {:#06x} -> zero",
            self.address,
            self.connection_handle()
        );
        let _ = self.disconnect_internal(true, false, HciStatus::RemoteUserTerminatedConnection);
        self.is_connected.store(false, Ordering::SeqCst);
        self.allow_disconnect.store(false, Ordering::SeqCst);
        self.conn_handle.store(0, Ordering::SeqCst);
    }

    /// Disconnects this device with the given reason.
    ///
    /// At most one disconnect sequence runs per connection: concurrent
    /// callers lose the `allow_disconnect` compare-and-set and get
    /// [HciStatus::ConnectionTerminatedByLocalHost] without touching HCI.
    pub fn disconnect(&self, reason: HciStatus) -> HciStatus {
        self.disconnect_internal(false, false, reason)
    }

    pub(crate) fn disconnect_internal(
        &self,
        from_disconnect_cb: bool,
        io_error_cause: bool,
        reason: HciStatus,
    ) -> HciStatus {
        if self
            .allow_disconnect
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!(
                "device {}: disconnect already ran or never connected (from_cb {from_disconnect_cb}, io {io_error_cause})",
                self.address
            );
            return HciStatus::ConnectionTerminatedByLocalHost;
        }
        let _connecting = self.connect_lock.lock().unwrap();
        log::info!(
            "device {}: disconnect, handle {:#06x}, from_cb {from_disconnect_cb}, io {io_error_cause}, reason {reason:?}",
            self.address,
            self.connection_handle()
        );

        // Close the ATT channel first; it unblocks any in-flight request.
        self.disconnect_gatt();

        if !self.is_connected() {
            return HciStatus::ConnectionTerminatedByLocalHost;
        }
        let handle = self.connection_handle();
        if from_disconnect_cb || (handle == 0 && !io_error_cause) {
            return HciStatus::Success;
        }
        let Some(adapter) = self.adapter.upgrade() else {
            return HciStatus::InternalFailure;
        };
        let status = adapter.hci().disconnect(
            io_error_cause,
            handle,
            self.address,
            self.address_type,
            reason,
        );
        if status != HciStatus::Success {
            log::error!(
                "device {}: disconnect status {status:?}, handle {handle:#06x}",
                self.address
            );
        }
        status
    }

    /// Disconnects and detaches this device from its adapter's registries.
    /// Idempotent.
    pub fn remove(&self) {
        self.disconnect_internal(false, false, HciStatus::RemoteUserTerminatedConnection);
        if let Some(adapter) = self.adapter.upgrade() {
            adapter.remove_device(self.address);
        }
    }

    /// The open GATT engine, if any.
    pub fn gatt_handler(&self) -> Option<Arc<GattClient>> {
        self.gatt.lock().unwrap().clone()
    }

    /// Opens the ATT channel and starts the GATT engine, reusing an open one.
    pub fn connect_gatt(&self) -> Result<Arc<GattClient>> {
        let mut gatt = self.gatt.lock().unwrap();
        if let Some(client) = gatt.as_ref() {
            if client.is_open() {
                return Ok(Arc::clone(client));
            }
            *gatt = None;
        }
        if !self.is_connected() {
            return Err(Error::InvalidState(format!(
                "device {}: not connected",
                self.address
            )));
        }
        let adapter = self
            .adapter
            .upgrade()
            .ok_or_else(|| Error::InvalidState("adapter is gone".into()))?;
        let local = adapter.info().address;
        let channel = L2capChannel::open(
            local,
            AddressType::LePublic,
            self.address,
            self.address_type,
        )?;
        let client = GattClient::connect(channel)?;
        *gatt = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Returns the device's GATT services, discovering them on first use.
    ///
    /// After a successful discovery the Generic Access name and appearance
    /// are merged into this record.
    pub fn gatt_services(&self) -> Result<Vec<Arc<GattService>>> {
        let client = self.connect_gatt()?;
        let cached = client.services();
        if !cached.is_empty() {
            return Ok(cached);
        }
        let services = client.discover_complete_primary_services()?;
        if services.is_empty() {
            return Ok(services);
        }
        if let Some(access) = client.read_generic_access(&services) {
            let ts = crate::env::Env::get().elapsed_ms();
            let changed = self.update_from_generic_access(&access, ts);
            *self.generic_access.lock().unwrap() = Some(access);
            if !changed.is_empty() {
                if let Some(adapter) = self.adapter.upgrade() {
                    adapter.send_device_updated(self.address, changed, ts);
                }
            }
        }
        Ok(services)
    }

    /// Finds a discovered service by type.
    pub fn find_gatt_service(&self, uuid: Uuid) -> Option<Arc<GattService>> {
        self.gatt_services()
            .ok()?
            .into_iter()
            .find(|s| s.uuid == uuid)
    }

    /// The Generic Access snapshot read at discovery time.
    pub fn gatt_generic_access(&self) -> Option<GenericAccess> {
        self.generic_access.lock().unwrap().clone()
    }

    /// Probes the GATT channel.
    ///
    /// True iff the channel is open and at least one service is known; on
    /// failure the connection is torn down as an I/O error casualty.
    pub fn ping_gatt(&self) -> bool {
        let client = self.gatt.lock().unwrap().clone();
        let alive = match client {
            Some(client) if client.is_open() && !client.services().is_empty() => client.ping(),
            _ => false,
        };
        if !alive {
            log::info!("device {}: GATT ping failed, tearing down", self.address);
            self.disconnect_internal(false, true, HciStatus::RemoteUserTerminatedConnection);
        }
        alive
    }

    /// Samples RSSI and transmit power via MGMT, merging changes into this
    /// record.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let adapter = self
            .adapter
            .upgrade()
            .ok_or_else(|| Error::InvalidState("adapter is gone".into()))?;
        let info =
            adapter
                .manager()
                .get_connection_info(adapter.dev_id(), self.address, self.address_type)?;
        let mut changed = EirDataMask::NONE;
        {
            let mut data = self.data.lock().unwrap();
            if data.rssi != info.rssi {
                data.rssi = info.rssi;
                changed.set(EirDataField::Rssi);
            }
            if data.tx_power != info.tx_power {
                data.tx_power = info.tx_power;
                changed.set(EirDataField::TxPower);
            }
        }
        if !changed.is_empty() {
            let ts = crate::env::Env::get().elapsed_ms();
            self.ts_last_update_ms.store(ts, Ordering::SeqCst);
            adapter.send_device_updated(self.address, changed, ts);
        }
        Ok(info)
    }

    /// Registers a value listener with the open GATT engine.
    pub fn add_characteristic_listener(
        &self,
        listener: Arc<dyn CharacteristicListener>,
    ) -> Result<u64> {
        let client = self.gatt_handler().ok_or_else(|| {
            Error::InvalidState(format!("device {}: GATT not connected", self.address))
        })?;
        Ok(client.add_listener(listener))
    }

    /// Removes a value listener; false when the engine is already gone.
    pub fn remove_characteristic_listener(&self, id: u64) -> bool {
        match self.gatt_handler() {
            Some(client) => client.remove_listener(id),
            None => false,
        }
    }

    /// Removes all value listeners. Returns the count.
    pub fn remove_all_characteristic_listeners(&self) -> usize {
        match self.gatt_handler() {
            Some(client) => client.remove_all_listeners(),
            None => 0,
        }
    }

    /// Closes the GATT engine promptly, without touching the link itself.
    ///
    /// The channel shutdown happens before the handler slot is cleared so a
    /// blocked receive cannot delay the teardown.
    fn disconnect_gatt(&self) {
        let client = self.gatt.lock().unwrap().clone();
        if let Some(client) = client {
            client.disconnect();
            *self.gatt.lock().unwrap() = None;
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock().unwrap();
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("address_type", &self.address_type)
            .field("name", &data.name)
            .field("rssi", &data.rssi)
            .field("connected", &self.is_connected())
            .field("handle", &self.connection_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adv::EirSource;

    fn report_for(addr: &str, address_type: AddressType, ts: u64) -> EirReport {
        let mut report = EirReport::new(EirSource::Ad, ts);
        report.set_address(addr.parse().unwrap());
        report.set_address_type(address_type);
        report
    }

    #[test]
    fn resolvable_private_peer_is_rejected_without_hci() {
        // FE:... has top bits 11 -> static; 7E:... has top bits 01 -> resolvable.
        let report = report_for("7E:26:DA:01:DA:B1", AddressType::LeRandom, 0);
        let device = Device::new(Weak::new(), &report).unwrap();
        assert_eq!(RandomAddressType::ResolvablePrivate, device.random_address_type());
        assert_eq!(HciStatus::UnacceptableConnectionParam, device.connect_le_default());
        assert!(!device.is_connected());
        assert_eq!(0, device.connection_handle());
    }

    #[test]
    fn unresolvable_private_peer_is_rejected_without_hci() {
        let report = report_for("3E:26:DA:01:DA:B1", AddressType::LeRandom, 0);
        let device = Device::new(Weak::new(), &report).unwrap();
        assert_eq!(HciStatus::UnacceptableConnectionParam, device.connect_default());
    }

    #[test]
    fn report_without_address_type_is_rejected() {
        let mut report = EirReport::new(EirSource::Ad, 0);
        report.set_address("C0:26:DA:01:DA:B1".parse().unwrap());
        assert!(Device::new(Weak::new(), &report).is_err());
    }

    #[test]
    fn name_merge_only_grows() {
        let base = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 0);
        let device = Device::new(Weak::new(), &base).unwrap();

        let mut named = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 1);
        named.read_data(&[0x05, 0x09, 0x54, 0x65, 0x73, 0x74]); // "Test"
        let changed = device.update_from_eir(&named);
        assert!(changed.is_set(EirDataField::Name));
        assert_eq!("Test", device.name());

        // A shorter complete name does not replace the longer one.
        let mut shorter = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 2);
        shorter.read_data(&[0x03, 0x09, 0x41, 0x42]);
        let changed = device.update_from_eir(&shorter);
        assert!(!changed.is_set(EirDataField::Name));
        assert_eq!("Test", device.name());

        // A short name only fills an empty slot.
        let mut nick = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 3);
        nick.read_data(&[0x03, 0x08, 0x41, 0x42]);
        let changed = device.update_from_eir(&nick);
        assert!(!changed.is_set(EirDataField::NameShort));
        assert_eq!("Test", device.name());
    }

    #[test]
    fn rssi_merge_reports_change_only_once() {
        let mut base = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 0);
        base.set_rssi(-60);
        let device = Device::new(Weak::new(), &base).unwrap();

        let mut same = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 1);
        same.set_rssi(-60);
        assert!(!device.update_from_eir(&same).is_set(EirDataField::Rssi));

        let mut different = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 2);
        different.set_rssi(-55);
        assert!(device.update_from_eir(&different).is_set(EirDataField::Rssi));
        assert_eq!(-55, device.rssi());
    }

    #[test]
    fn update_timestamps_are_monotonic_over_merges() {
        let base = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 10);
        let device = Device::new(Weak::new(), &base).unwrap();
        assert_eq!(10, device.creation_timestamp_ms());
        assert_eq!(10, device.last_discovery_timestamp_ms());

        let later = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 25);
        device.mark_discovered(25);
        device.update_from_eir(&later);
        assert!(device.last_update_timestamp_ms() >= device.last_discovery_timestamp_ms());
        assert!(device.last_discovery_timestamp_ms() >= device.creation_timestamp_ms());
    }

    #[test]
    fn concurrent_disconnects_let_exactly_one_proceed() {
        let report = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 0);
        let device = Arc::new(Device::new(Weak::new(), &report).unwrap());
        device.notify_connected(0x0040);

        let contender = Arc::clone(&device);
        let winner_flags: Vec<bool> = std::thread::scope(|scope| {
            let a = scope.spawn(|| {
                contender
                    .allow_disconnect
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            });
            let b = device
                .allow_disconnect
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            vec![a.join().unwrap(), b]
        });
        assert_eq!(1, winner_flags.into_iter().filter(|w| *w).count());
    }

    #[test]
    fn notify_connected_upholds_handle_invariant() {
        let report = report_for("C0:26:DA:01:DA:B1", AddressType::LeRandom, 0);
        let device = Device::new(Weak::new(), &report).unwrap();
        assert!(!device.is_connected());
        assert_eq!(0, device.connection_handle());

        device.notify_connected(0x0040);
        assert!(device.is_connected());
        assert_ne!(0, device.connection_handle());

        device.notify_disconnected();
        assert!(!device.is_connected());
        assert_eq!(0, device.connection_handle());
    }
}
