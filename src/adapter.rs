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

//! Per-adapter controller: the device registry, the discovery state machine
//! and adapter status listener dispatch.
//!
//! MGMT and HCI events arrive on their reader threads; handlers here only
//! mutate local state and notify listeners. Work that needs a command round
//! trip (the keep-alive discovery restart) is posted to the adapter's own
//! worker thread instead, because a reader-thread callback must never wait
//! for a reply it would have to read itself.

use crate::address::{Address, AddressType};
use crate::adv::{EirDataMask, EirReport, EirSource};
use crate::device::Device;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::hci::{self, Hci, HciStatus};
use crate::mgmt::transport::Manager;
use crate::mgmt::{
    AdapterInfo, AdapterSettings, ConnParam, MgmtEvent, MgmtEventCode, ScanType,
    WhitelistConnectType,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock, Weak};

/// Placeholder connection handle used when only MGMT reported the connection
/// and the HCI handle is not (yet) known. Non-zero on purpose.
const HANDLE_UNKNOWN: u16 = 0xFFFF;

/// Discovery state machine of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    /// Not scanning.
    Stopped,
    /// `Start Discovery` sent, kernel acceptance pending.
    Starting,
    /// Kernel scanning.
    Active,
    /// `Stop Discovery` sent, kernel acknowledgment pending.
    Stopping,
}

struct DiscoveryState {
    status: DiscoveryStatus,
    keep_alive: bool,
    scan_type: ScanType,
}

/// Receiver of adapter lifecycle events.
///
/// Invoked on the MGMT reader thread (or the HCI reader thread for
/// connection completion); implementations must not block and must not wait
/// for command replies. Panics are caught and logged without interrupting
/// subsequent listeners.
#[allow(unused_variables)]
pub trait AdapterStatusListener: Send + Sync {
    /// The adapter settings bitmask changed.
    fn adapter_settings_changed(
        &self,
        adapter: &Adapter,
        old: AdapterSettings,
        new: AdapterSettings,
        changed: AdapterSettings,
        timestamp_ms: u64,
    ) {
    }

    /// Kernel discovery was enabled or disabled.
    fn discovering_changed(
        &self,
        adapter: &Adapter,
        enabled: bool,
        keep_alive: bool,
        timestamp_ms: u64,
    ) {
    }

    /// A device appeared for the first time.
    fn device_found(&self, device: &Arc<Device>, timestamp_ms: u64) {}

    /// A known device's record changed; `mask` holds the changed fields.
    fn device_updated(&self, device: &Arc<Device>, mask: EirDataMask, timestamp_ms: u64) {}

    /// A device connected.
    fn device_connected(&self, device: &Arc<Device>, handle: u16, timestamp_ms: u64) {}

    /// A device disconnected.
    fn device_disconnected(
        &self,
        device: &Arc<Device>,
        reason: HciStatus,
        handle: u16,
        timestamp_ms: u64,
    ) {
    }
}

enum AdapterTask {
    RestartDiscovery,
    Quit,
}

/// One physical Bluetooth adapter.
pub struct Adapter {
    dev_id: u16,
    manager: Arc<Manager>,
    hci: Arc<Hci>,
    info: RwLock<AdapterInfo>,
    valid: AtomicBool,
    closed: AtomicBool,
    discovery: Mutex<DiscoveryState>,
    discovered: Mutex<Vec<Arc<Device>>>,
    connected: Mutex<Vec<Arc<Device>>>,
    listeners: Mutex<Vec<(u64, Arc<dyn AdapterStatusListener>)>>,
    next_listener_id: AtomicU64,
    mgmt_callback_ids: Mutex<Vec<u64>>,
    worker_tx: Mutex<Option<mpsc::Sender<AdapterTask>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Adapter {
    /// Opens the adapter `dev_id`: resolves its info through the manager,
    /// opens the HCI channel and subscribes to the event streams.
    pub fn create(manager: Arc<Manager>, dev_id: u16) -> Result<Arc<Adapter>> {
        let info = match manager.adapter_info(dev_id) {
            Some(info) => info,
            None => manager.read_info(dev_id)?,
        };
        let hci = Hci::open(Arc::clone(&manager), dev_id)?;

        let adapter = Arc::new(Adapter {
            dev_id,
            manager: Arc::clone(&manager),
            hci,
            info: RwLock::new(info),
            valid: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            discovery: Mutex::new(DiscoveryState {
                status: DiscoveryStatus::Stopped,
                keep_alive: false,
                scan_type: ScanType::Le,
            }),
            discovered: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            mgmt_callback_ids: Mutex::new(Vec::new()),
            worker_tx: Mutex::new(None),
            worker: Mutex::new(None),
        });

        adapter.spawn_worker()?;
        adapter.subscribe_events();
        Ok(adapter)
    }

    /// Kernel adapter index.
    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Controller address.
    pub fn address(&self) -> Address {
        self.info.read().unwrap().address
    }

    /// A snapshot of the adapter info.
    pub fn info(&self) -> AdapterInfo {
        self.info.read().unwrap().clone()
    }

    /// The MGMT transport.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// The adapter's HCI channel.
    pub fn hci(&self) -> &Arc<Hci> {
        &self.hci
    }

    /// False once the kernel removed the adapter index.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// The current discovery state.
    pub fn discovery_status(&self) -> DiscoveryStatus {
        self.discovery.lock().unwrap().status
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(self);
        let worker = std::thread::Builder::new()
            .name(format!("adapter{}-worker", self.dev_id))
            .spawn(move || worker_loop(rx, weak))
            .map_err(Error::Io)?;
        *self.worker_tx.lock().unwrap() = Some(tx);
        *self.worker.lock().unwrap() = Some(worker);
        Ok(())
    }

    fn subscribe_events(self: &Arc<Self>) {
        let mut ids = self.mgmt_callback_ids.lock().unwrap();
        let dev_id = self.dev_id as i32;

        let weak = Arc::downgrade(self);
        ids.push(self.manager.add_event_callback(
            dev_id,
            MgmtEventCode::DeviceFound,
            move |event| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.on_device_found(event);
                }
            },
        ));
        let weak = Arc::downgrade(self);
        ids.push(self.manager.add_event_callback(
            dev_id,
            MgmtEventCode::Discovering,
            move |event| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.on_discovering(event);
                }
            },
        ));
        let weak = Arc::downgrade(self);
        ids.push(self.manager.add_event_callback(
            dev_id,
            MgmtEventCode::DeviceConnected,
            move |event| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.on_device_connected(event);
                }
            },
        ));
        let weak = Arc::downgrade(self);
        ids.push(self.manager.add_event_callback(
            dev_id,
            MgmtEventCode::DeviceDisconnected,
            move |event| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.on_device_disconnected(event);
                }
            },
        ));
        let weak = Arc::downgrade(self);
        ids.push(self.manager.add_event_callback(
            dev_id,
            MgmtEventCode::NewSettings,
            move |event| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.on_new_settings(event);
                }
            },
        ));
        let weak = Arc::downgrade(self);
        ids.push(self.manager.add_event_callback(
            dev_id,
            MgmtEventCode::IndexRemoved,
            move |_event| {
                if let Some(adapter) = weak.upgrade() {
                    adapter.on_index_removed();
                }
            },
        ));
        drop(ids);

        let weak = Arc::downgrade(self);
        self.hci.add_event_callback(hci::event::LE_META, move |event| {
            if let Some(adapter) = weak.upgrade() {
                adapter.on_hci_le_meta(event);
            }
        });
    }

    /// Registers a status listener, returning its registration id.
    pub fn add_status_listener(&self, listener: Arc<dyn AdapterStatusListener>) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    /// Removes a status listener registration.
    pub fn remove_status_listener(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Removes all status listeners. Returns the count.
    pub fn remove_all_status_listeners(&self) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        let count = listeners.len();
        listeners.clear();
        count
    }

    fn for_each_listener(&self, f: impl Fn(&Arc<dyn AdapterStatusListener>)) {
        let snapshot: Vec<(u64, Arc<dyn AdapterStatusListener>)> =
            self.listeners.lock().unwrap().clone();
        for (id, listener) in snapshot {
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&listener)))
            {
                log::error!(
                    "adapter {}: status listener {id} panicked: {panic:?}",
                    self.dev_id
                );
            }
        }
    }

    /// Starts device discovery.
    ///
    /// With `keep_alive`, discovery is restarted automatically whenever the
    /// kernel reports it disabled without a local stop request. Returns true
    /// when the kernel accepted (or discovery was already running).
    pub fn start_discovery(&self, scan_type: ScanType, keep_alive: bool) -> Result<bool> {
        {
            let mut discovery = self.discovery.lock().unwrap();
            match discovery.status {
                DiscoveryStatus::Active | DiscoveryStatus::Starting => {
                    discovery.keep_alive = keep_alive;
                    return Ok(true);
                }
                DiscoveryStatus::Stopping => {
                    return Err(Error::InvalidState("discovery is stopping".into()))
                }
                DiscoveryStatus::Stopped => {
                    discovery.status = DiscoveryStatus::Starting;
                    discovery.keep_alive = keep_alive;
                    discovery.scan_type = scan_type;
                }
            }
        }

        let confirmed = self.manager.start_discovery(self.dev_id, scan_type);
        let mut discovery = self.discovery.lock().unwrap();
        match confirmed {
            Ok(confirmed_type) if confirmed_type != ScanType::None => {
                discovery.scan_type = confirmed_type;
                let newly_active = discovery.status != DiscoveryStatus::Active;
                discovery.status = DiscoveryStatus::Active;
                let keep_alive = discovery.keep_alive;
                drop(discovery);
                if newly_active {
                    let ts = Env::get().elapsed_ms();
                    self.for_each_listener(|l| l.discovering_changed(self, true, keep_alive, ts));
                }
                Ok(true)
            }
            Ok(_) => {
                discovery.status = DiscoveryStatus::Stopped;
                Ok(false)
            }
            Err(e) => {
                discovery.status = DiscoveryStatus::Stopped;
                Err(e)
            }
        }
    }

    /// Stops device discovery, clearing any keep-alive request.
    pub fn stop_discovery(&self) -> Result<bool> {
        let scan_type = {
            let mut discovery = self.discovery.lock().unwrap();
            match discovery.status {
                DiscoveryStatus::Stopped | DiscoveryStatus::Stopping => return Ok(true),
                DiscoveryStatus::Starting | DiscoveryStatus::Active => {
                    discovery.status = DiscoveryStatus::Stopping;
                    discovery.keep_alive = false;
                    discovery.scan_type
                }
            }
        };

        let result = self.manager.stop_discovery(self.dev_id, scan_type);
        let mut discovery = self.discovery.lock().unwrap();
        discovery.status = DiscoveryStatus::Stopped;
        result
    }

    /// The discovered devices in insertion order.
    pub fn discovered_devices(&self) -> Vec<Arc<Device>> {
        self.discovered.lock().unwrap().clone()
    }

    /// The currently connected devices.
    pub fn connected_devices(&self) -> Vec<Arc<Device>> {
        self.connected.lock().unwrap().clone()
    }

    /// Finds a device by address in either registry.
    pub fn find_device(&self, address: Address) -> Option<Arc<Device>> {
        self.discovered
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.address() == address)
            .cloned()
            .or_else(|| {
                self.connected
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|d| d.address() == address)
                    .cloned()
            })
    }

    /// Detaches a device from both registries, dropping its GATT engine.
    pub fn remove_device(&self, address: Address) {
        if let Some(device) = self.find_device(address) {
            if let Some(gatt) = device.gatt_handler() {
                gatt.disconnect();
            }
        }
        self.discovered.lock().unwrap().retain(|d| d.address() != address);
        self.connected.lock().unwrap().retain(|d| d.address() != address);
    }

    /// Clears the discovered set. Returns how many devices were dropped.
    pub fn remove_discovered_devices(&self) -> usize {
        let mut discovered = self.discovered.lock().unwrap();
        let count = discovered.len();
        discovered.clear();
        count
    }

    /// Adds a peer to the kernel whitelist (duplicates rejected locally).
    pub fn add_device_to_whitelist(
        &self,
        address: Address,
        address_type: AddressType,
        ctype: WhitelistConnectType,
    ) -> Result<bool> {
        self.manager
            .add_device_to_whitelist(self.dev_id, address, address_type, ctype)
    }

    /// Removes a peer from the kernel whitelist.
    pub fn remove_device_from_whitelist(
        &self,
        address: Address,
        address_type: AddressType,
    ) -> bool {
        self.manager
            .remove_device_from_whitelist(self.dev_id, address, address_type)
    }

    /// Uploads preferred connection parameters for one peer.
    pub fn upload_conn_param(
        &self,
        address: Address,
        address_type: AddressType,
        param: ConnParam,
    ) -> Result<bool> {
        self.manager
            .upload_conn_param(self.dev_id, address, address_type, param)
    }

    /// Sets the adapter's local name.
    pub fn set_local_name(&self, name: &str, short_name: &str) -> Result<()> {
        self.manager.set_local_name(self.dev_id, name, short_name)
    }

    /// Notifies listeners that a device's record changed outside the
    /// discovery path (connection info, Generic Access merge).
    pub(crate) fn send_device_updated(&self, address: Address, mask: EirDataMask, timestamp_ms: u64) {
        if let Some(device) = self.find_device(address) {
            self.for_each_listener(|l| l.device_updated(&device, mask, timestamp_ms));
        }
    }

    /// Merges one inbound report into the registry, creating the device when
    /// unknown, and notifies listeners.
    fn process_eir_report(self: &Arc<Self>, report: EirReport) {
        let ts = report.timestamp_ms();
        let existing = self.find_device(report.address());
        match existing {
            Some(device) => {
                device.mark_discovered(ts);
                let changed = device.update_from_eir(&report);
                if !changed.is_empty() {
                    self.for_each_listener(|l| l.device_updated(&device, changed, ts));
                }
            }
            None => {
                let device = match Device::new(Arc::downgrade(self), &report) {
                    Ok(device) => Arc::new(device),
                    Err(e) => {
                        log::warn!("adapter {}: dropping found device: {e}", self.dev_id);
                        return;
                    }
                };
                self.discovered.lock().unwrap().push(Arc::clone(&device));
                self.for_each_listener(|l| l.device_found(&device, ts));
            }
        }
    }

    fn on_device_found(self: &Arc<Self>, event: &MgmtEvent) {
        let Some(found) = event.device_found() else {
            log::warn!("adapter {}: malformed DEVICE_FOUND", self.dev_id);
            return;
        };
        let mut report = EirReport::new(EirSource::Ad, Env::get().elapsed_ms());
        report.set_address(found.address);
        report.set_address_type(found.address_type);
        report.set_rssi(found.rssi);
        report.read_data(&found.eir);
        self.process_eir_report(report);
    }

    fn on_discovering(self: &Arc<Self>, event: &MgmtEvent) {
        let Some((scan_type, enabled)) = event.discovering() else {
            return;
        };
        let ts = Env::get().elapsed_ms();
        let (keep_alive, restart, changed) = {
            let mut discovery = self.discovery.lock().unwrap();
            if enabled {
                let was_active = discovery.status == DiscoveryStatus::Active;
                discovery.status = DiscoveryStatus::Active;
                discovery.scan_type = scan_type;
                (discovery.keep_alive, false, !was_active)
            } else {
                let was_stopped = discovery.status == DiscoveryStatus::Stopped;
                let kernel_initiated = discovery.status == DiscoveryStatus::Active;
                discovery.status = DiscoveryStatus::Stopped;
                (
                    discovery.keep_alive,
                    discovery.keep_alive && kernel_initiated,
                    !was_stopped,
                )
            }
        };
        log::debug!(
            "adapter {}: discovering {enabled} ({scan_type:?}), keep_alive {keep_alive}",
            self.dev_id
        );
        if changed {
            self.for_each_listener(|l| l.discovering_changed(self, enabled, keep_alive, ts));
        }
        if restart {
            // Round trip work; hand it to the worker, never run it here.
            self.post_task(AdapterTask::RestartDiscovery);
        }
    }

    fn on_device_connected(self: &Arc<Self>, event: &MgmtEvent) {
        let Some(connected) = event.device_connected() else {
            log::warn!("adapter {}: malformed DEVICE_CONNECTED", self.dev_id);
            return;
        };
        let ts = Env::get().elapsed_ms();
        let mut report = EirReport::new(EirSource::Ad, ts);
        report.set_address(connected.address);
        report.set_address_type(connected.address_type);
        report.read_data(&connected.eir);

        let device = match self.find_device(connected.address) {
            Some(device) => {
                let changed = device.update_from_eir(&report);
                if !changed.is_empty() {
                    self.for_each_listener(|l| l.device_updated(&device, changed, ts));
                }
                device
            }
            None => {
                let device = match Device::new(Arc::downgrade(self), &report) {
                    Ok(device) => Arc::new(device),
                    Err(e) => {
                        log::warn!("adapter {}: dropping connected device: {e}", self.dev_id);
                        return;
                    }
                };
                self.discovered.lock().unwrap().push(Arc::clone(&device));
                self.for_each_listener(|l| l.device_found(&device, ts));
                device
            }
        };

        let first_transition = !device.is_connected();
        if first_transition {
            device.notify_connected(HANDLE_UNKNOWN);
            let mut connected_set = self.connected.lock().unwrap();
            if !connected_set.iter().any(|d| d.address() == device.address()) {
                connected_set.push(Arc::clone(&device));
            }
        }
        if first_transition {
            let handle = device.connection_handle();
            self.for_each_listener(|l| l.device_connected(&device, handle, ts));
        }
    }

    fn on_device_disconnected(self: &Arc<Self>, event: &MgmtEvent) {
        let Some(gone) = event.device_disconnected() else {
            log::warn!("adapter {}: malformed DEVICE_DISCONNECTED", self.dev_id);
            return;
        };
        let Some(device) = self.find_device(gone.address) else {
            log::debug!(
                "adapter {}: DEVICE_DISCONNECTED for unknown {}",
                self.dev_id,
                gone.address
            );
            return;
        };
        let ts = Env::get().elapsed_ms();
        let handle = device.connection_handle();
        device.notify_disconnected();
        self.connected
            .lock()
            .unwrap()
            .retain(|d| d.address() != gone.address);
        self.for_each_listener(|l| l.device_disconnected(&device, gone.reason, handle, ts));
    }

    fn on_new_settings(&self, event: &MgmtEvent) {
        let Some(new) = event.new_settings() else {
            return;
        };
        let old = {
            let mut info = self.info.write().unwrap();
            let old = info.current_settings;
            info.current_settings = new;
            old
        };
        let changed = old.changes(new);
        let ts = Env::get().elapsed_ms();
        log::debug!("adapter {}: settings {old:?} -> {new:?}", self.dev_id);
        self.for_each_listener(|l| l.adapter_settings_changed(self, old, new, changed, ts));
    }

    fn on_index_removed(&self) {
        log::info!("adapter {}: removed by kernel", self.dev_id);
        self.valid.store(false, Ordering::SeqCst);
        self.manager.clear_adapter_slot(self.dev_id);
    }

    fn on_hci_le_meta(self: &Arc<Self>, event: &hci::HciEvent) {
        if let Some(conn) = event.le_connection_complete() {
            self.on_hci_connection_complete(conn);
            return;
        }
        match event.le_subevent() {
            Some((hci::le_subevent::ADVERTISING_REPORT, params)) => {
                for report in EirReport::read_ad_reports(params, Env::get().elapsed_ms()) {
                    self.process_eir_report(report);
                }
            }
            Some((hci::le_subevent::EXTENDED_ADVERTISING_REPORT, params)) => {
                for report in EirReport::read_ext_ad_reports(params, Env::get().elapsed_ms()) {
                    self.process_eir_report(report);
                }
            }
            _ => {}
        }
    }

    fn on_hci_connection_complete(self: &Arc<Self>, conn: hci::LeConnectionComplete) {
        if conn.status != HciStatus::Success {
            log::info!(
                "adapter {}: LE connect to {} failed: {:?}",
                self.dev_id,
                conn.address,
                conn.status
            );
            return;
        }
        let Some(device) = self.find_device(conn.address) else {
            log::debug!(
                "adapter {}: connection complete for unknown {}",
                self.dev_id,
                conn.address
            );
            return;
        };
        let first_transition = !device.is_connected();
        device.notify_connected(conn.handle);
        if first_transition {
            let mut connected_set = self.connected.lock().unwrap();
            if !connected_set.iter().any(|d| d.address() == device.address()) {
                connected_set.push(Arc::clone(&device));
            }
            drop(connected_set);
            let ts = Env::get().elapsed_ms();
            self.for_each_listener(|l| l.device_connected(&device, conn.handle, ts));
        }
    }

    fn post_task(&self, task: AdapterTask) {
        if let Some(tx) = self.worker_tx.lock().unwrap().as_ref() {
            let _ = tx.send(task);
        }
    }

    fn restart_discovery(&self) {
        let scan_type = {
            let mut discovery = self.discovery.lock().unwrap();
            if discovery.status != DiscoveryStatus::Stopped || !discovery.keep_alive {
                return;
            }
            discovery.status = DiscoveryStatus::Starting;
            discovery.scan_type
        };
        log::debug!("adapter {}: keep-alive discovery restart", self.dev_id);
        let confirmed = self.manager.start_discovery(self.dev_id, scan_type);
        let mut discovery = self.discovery.lock().unwrap();
        match confirmed {
            Ok(t) if t != ScanType::None => discovery.status = DiscoveryStatus::Active,
            _ => {
                log::warn!("adapter {}: keep-alive restart rejected", self.dev_id);
                discovery.status = DiscoveryStatus::Stopped;
            }
        }
    }

    /// Shuts the adapter down: discovery stopped, event subscriptions
    /// dropped, worker and HCI channel closed, registries cleared.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("adapter {}: close", self.dev_id);
        let _ = self.stop_discovery();
        for id in self.mgmt_callback_ids.lock().unwrap().drain(..) {
            self.manager.remove_event_callback(id);
        }
        self.post_task(AdapterTask::Quit);
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
        self.hci.close();
        self.discovered.lock().unwrap().clear();
        self.connected.lock().unwrap().clear();
        self.remove_all_status_listeners();
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(rx: mpsc::Receiver<AdapterTask>, adapter: Weak<Adapter>) {
    while let Ok(task) = rx.recv() {
        match task {
            AdapterTask::Quit => break,
            AdapterTask::RestartDiscovery => {
                let Some(adapter) = adapter.upgrade() else { break };
                adapter.restart_discovery();
            }
        }
    }
}
