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

//! Wire types of the kernel Bluetooth management (MGMT) protocol.
//!
//! Frames are little endian: `u16 opcode, u16 index, u16 param_len,
//! u8 params[param_len]`. Replies arrive as the two pseudo events
//! `Command Complete` and `Command Status`; everything else is asynchronous.
//!
//! The transport lives in [crate::mgmt::transport].

pub mod transport;

use crate::address::{Address, AddressType};
use crate::hci::HciStatus;
use bytes::BufMut;
use nom::number;
use std::fmt;
use strum::IntoEnumIterator;

/// Adapter index wildcard: no/any adapter.
pub const INDEX_NONE: u16 = 0xFFFF;

/// Longest adapter name on the wire, NUL padded.
pub const MAX_NAME_LENGTH: usize = 249;
/// Longest short adapter name on the wire, NUL padded.
pub const MAX_SHORT_NAME_LENGTH: usize = 11;

/// MGMT command opcodes consumed by this stack.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MgmtOpcode {
    ReadVersion,
    ReadCommands,
    ReadIndexList,
    ReadInfo,
    SetPowered,
    SetDiscoverable,
    SetConnectable,
    SetFastConnectable,
    SetSsp,
    SetLe,
    SetLocalName,
    Disconnect,
    StartDiscovery,
    StopDiscovery,
    SetBredr,
    GetConnInfo,
    AddDevice,
    RemoveDevice,
    LoadConnParam,
}

impl MgmtOpcode {
    /// The assigned command code.
    pub fn code(self) -> u16 {
        match self {
            MgmtOpcode::ReadVersion => 0x0001,
            MgmtOpcode::ReadCommands => 0x0002,
            MgmtOpcode::ReadIndexList => 0x0003,
            MgmtOpcode::ReadInfo => 0x0004,
            MgmtOpcode::SetPowered => 0x0005,
            MgmtOpcode::SetDiscoverable => 0x0006,
            MgmtOpcode::SetConnectable => 0x0007,
            MgmtOpcode::SetFastConnectable => 0x0008,
            MgmtOpcode::SetSsp => 0x000B,
            MgmtOpcode::SetLe => 0x000D,
            MgmtOpcode::SetLocalName => 0x000F,
            MgmtOpcode::Disconnect => 0x0014,
            MgmtOpcode::StartDiscovery => 0x0023,
            MgmtOpcode::StopDiscovery => 0x0024,
            MgmtOpcode::SetBredr => 0x002A,
            MgmtOpcode::GetConnInfo => 0x0031,
            MgmtOpcode::AddDevice => 0x0033,
            MgmtOpcode::RemoveDevice => 0x0034,
            MgmtOpcode::LoadConnParam => 0x0035,
        }
    }
}

/// MGMT command status, byte 3 of every reply.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtStatus {
    Success,
    UnknownCommand,
    NotConnected,
    Failed,
    ConnectFailed,
    AuthFailed,
    NotPaired,
    NoResources,
    Timeout,
    AlreadyConnected,
    Busy,
    Rejected,
    NotSupported,
    InvalidParams,
    Disconnected,
    NotPowered,
    Cancelled,
    InvalidIndex,
    RfKilled,
    AlreadyPaired,
    PermissionDenied,
    Unknown(u8),
}

impl From<u8> for MgmtStatus {
    fn from(code: u8) -> Self {
        match code {
            0x00 => MgmtStatus::Success,
            0x01 => MgmtStatus::UnknownCommand,
            0x02 => MgmtStatus::NotConnected,
            0x03 => MgmtStatus::Failed,
            0x04 => MgmtStatus::ConnectFailed,
            0x05 => MgmtStatus::AuthFailed,
            0x06 => MgmtStatus::NotPaired,
            0x07 => MgmtStatus::NoResources,
            0x08 => MgmtStatus::Timeout,
            0x09 => MgmtStatus::AlreadyConnected,
            0x0A => MgmtStatus::Busy,
            0x0B => MgmtStatus::Rejected,
            0x0C => MgmtStatus::NotSupported,
            0x0D => MgmtStatus::InvalidParams,
            0x0E => MgmtStatus::Disconnected,
            0x0F => MgmtStatus::NotPowered,
            0x10 => MgmtStatus::Cancelled,
            0x11 => MgmtStatus::InvalidIndex,
            0x12 => MgmtStatus::RfKilled,
            0x13 => MgmtStatus::AlreadyPaired,
            0x14 => MgmtStatus::PermissionDenied,
            other => MgmtStatus::Unknown(other),
        }
    }
}

/// MGMT event codes delivered on the control channel.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MgmtEventCode {
    CmdComplete,
    CmdStatus,
    ControllerError,
    IndexAdded,
    IndexRemoved,
    NewSettings,
    ClassOfDevChanged,
    LocalNameChanged,
    DeviceConnected,
    DeviceDisconnected,
    ConnectFailed,
    PinCodeRequest,
    UserConfirmRequest,
    UserPasskeyRequest,
    DeviceFound,
    Discovering,
    DeviceBlocked,
    DeviceUnblocked,
    DeviceUnpaired,
    DeviceWhitelistAdded,
    DeviceWhitelistRemoved,
    NewConnParam,
    Unknown(u16),
}

impl MgmtEventCode {
    /// The assigned event code.
    pub fn code(self) -> u16 {
        match self {
            MgmtEventCode::CmdComplete => 0x0001,
            MgmtEventCode::CmdStatus => 0x0002,
            MgmtEventCode::ControllerError => 0x0003,
            MgmtEventCode::IndexAdded => 0x0004,
            MgmtEventCode::IndexRemoved => 0x0005,
            MgmtEventCode::NewSettings => 0x0006,
            MgmtEventCode::ClassOfDevChanged => 0x0007,
            MgmtEventCode::LocalNameChanged => 0x0008,
            MgmtEventCode::DeviceConnected => 0x000B,
            MgmtEventCode::DeviceDisconnected => 0x000C,
            MgmtEventCode::ConnectFailed => 0x000D,
            MgmtEventCode::PinCodeRequest => 0x000E,
            MgmtEventCode::UserConfirmRequest => 0x000F,
            MgmtEventCode::UserPasskeyRequest => 0x0010,
            MgmtEventCode::DeviceFound => 0x0012,
            MgmtEventCode::Discovering => 0x0013,
            MgmtEventCode::DeviceBlocked => 0x0014,
            MgmtEventCode::DeviceUnblocked => 0x0015,
            MgmtEventCode::DeviceUnpaired => 0x0016,
            MgmtEventCode::DeviceWhitelistAdded => 0x001A,
            MgmtEventCode::DeviceWhitelistRemoved => 0x001B,
            MgmtEventCode::NewConnParam => 0x001C,
            MgmtEventCode::Unknown(code) => code,
        }
    }

    /// Maps an assigned code to its event, or [MgmtEventCode::Unknown].
    pub fn from_code(code: u16) -> MgmtEventCode {
        match code {
            0x0001 => MgmtEventCode::CmdComplete,
            0x0002 => MgmtEventCode::CmdStatus,
            0x0003 => MgmtEventCode::ControllerError,
            0x0004 => MgmtEventCode::IndexAdded,
            0x0005 => MgmtEventCode::IndexRemoved,
            0x0006 => MgmtEventCode::NewSettings,
            0x0007 => MgmtEventCode::ClassOfDevChanged,
            0x0008 => MgmtEventCode::LocalNameChanged,
            0x000B => MgmtEventCode::DeviceConnected,
            0x000C => MgmtEventCode::DeviceDisconnected,
            0x000D => MgmtEventCode::ConnectFailed,
            0x000E => MgmtEventCode::PinCodeRequest,
            0x000F => MgmtEventCode::UserConfirmRequest,
            0x0010 => MgmtEventCode::UserPasskeyRequest,
            0x0012 => MgmtEventCode::DeviceFound,
            0x0013 => MgmtEventCode::Discovering,
            0x0014 => MgmtEventCode::DeviceBlocked,
            0x0015 => MgmtEventCode::DeviceUnblocked,
            0x0016 => MgmtEventCode::DeviceUnpaired,
            0x001A => MgmtEventCode::DeviceWhitelistAdded,
            0x001B => MgmtEventCode::DeviceWhitelistRemoved,
            0x001C => MgmtEventCode::NewConnParam,
            other => MgmtEventCode::Unknown(other),
        }
    }
}

/// Host mode requested for an adapter at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtMode {
    /// Unset; treated as [BtMode::Le].
    None,
    /// BR/EDR only.
    Bredr,
    /// LE only.
    Le,
    /// BR/EDR and LE.
    Dual,
}

/// Discovery scan type bitmask handed to `Start Discovery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// No scanning.
    None,
    /// BR/EDR inquiry only.
    Bredr,
    /// LE scan, public and random addresses.
    Le,
    /// BR/EDR inquiry plus LE scan.
    Dual,
}

impl ScanType {
    /// The address-type bitmask on the wire.
    pub fn code(self) -> u8 {
        match self {
            ScanType::None => 0x00,
            ScanType::Bredr => 0x01,
            ScanType::Le => 0x06,
            ScanType::Dual => 0x07,
        }
    }

    /// Maps a wire bitmask back; unassigned combinations collapse to the
    /// nearest defined type.
    pub fn from_code(code: u8) -> ScanType {
        match (code & 0x01 != 0, code & 0x06 != 0) {
            (false, false) => ScanType::None,
            (true, false) => ScanType::Bredr,
            (false, true) => ScanType::Le,
            (true, true) => ScanType::Dual,
        }
    }

    /// The scan type matching a host mode.
    pub fn for_mode(mode: BtMode) -> ScanType {
        match mode {
            BtMode::None | BtMode::Le => ScanType::Le,
            BtMode::Bredr => ScanType::Bredr,
            BtMode::Dual => ScanType::Dual,
        }
    }
}

/// Individual adapter setting bits, combined into [AdapterSettings].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::EnumIter)]
pub enum AdapterSetting {
    Powered,
    Connectable,
    FastConnectable,
    Discoverable,
    Bondable,
    LinkSecurity,
    Ssp,
    Bredr,
    Hs,
    Le,
    Advertising,
    SecureConn,
    DebugKeys,
    Privacy,
    Configuration,
    StaticAddress,
}

impl AdapterSetting {
    fn as_bit_mask(&self) -> u32 {
        match self {
            AdapterSetting::Powered => 1 << 0,
            AdapterSetting::Connectable => 1 << 1,
            AdapterSetting::FastConnectable => 1 << 2,
            AdapterSetting::Discoverable => 1 << 3,
            AdapterSetting::Bondable => 1 << 4,
            AdapterSetting::LinkSecurity => 1 << 5,
            AdapterSetting::Ssp => 1 << 6,
            AdapterSetting::Bredr => 1 << 7,
            AdapterSetting::Hs => 1 << 8,
            AdapterSetting::Le => 1 << 9,
            AdapterSetting::Advertising => 1 << 10,
            AdapterSetting::SecureConn => 1 << 11,
            AdapterSetting::DebugKeys => 1 << 12,
            AdapterSetting::Privacy => 1 << 13,
            AdapterSetting::Configuration => 1 << 14,
            AdapterSetting::StaticAddress => 1 << 15,
        }
    }
}

/// Current or supported settings bitmask of an adapter.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterSettings {
    bits: u32,
}

impl AdapterSettings {
    /// Wraps a raw settings word.
    pub fn from_bits(bits: u32) -> AdapterSettings {
        AdapterSettings { bits }
    }

    /// Returns true iff `setting` is set.
    pub fn is_set(&self, setting: AdapterSetting) -> bool {
        self.bits & setting.as_bit_mask() != 0
    }

    /// Returns an iterator over the settings set in this mask.
    pub fn iter(&self) -> impl Iterator<Item = AdapterSetting> + '_ {
        AdapterSetting::iter().filter(|s| self.is_set(*s))
    }

    /// The bits set in `self` but not in `other`, or vice versa.
    pub fn changes(&self, other: AdapterSettings) -> AdapterSettings {
        AdapterSettings {
            bits: self.bits ^ other.bits,
        }
    }
}

impl fmt::Debug for AdapterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use itertools::Itertools;
        write!(f, "[{}]", self.iter().map(|s| format!("{s:?}")).join(", "))
    }
}

/// Static and current state of one adapter, from `Read Controller Info`.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Kernel adapter index.
    pub dev_id: u16,
    /// Controller public address.
    pub address: Address,
    /// Bluetooth core version of the controller.
    pub version: u8,
    /// Controller manufacturer id.
    pub manufacturer: u16,
    /// Settings the controller can support.
    pub supported_settings: AdapterSettings,
    /// Settings currently in effect.
    pub current_settings: AdapterSettings,
    /// Class of device (24-bit).
    pub dev_class: u32,
    /// Adapter name.
    pub name: String,
    /// Adapter short name.
    pub short_name: String,
}

impl AdapterInfo {
    /// Parses a `Read Controller Info` reply payload.
    pub fn parse(dev_id: u16, data: &[u8]) -> Option<AdapterInfo> {
        let (data, address) = crate::adv::parse_address(data).ok()?;
        let (data, version) = number::complete::u8::<_, nom::error::Error<_>>(data).ok()?;
        let (data, manufacturer) = number::complete::le_u16::<_, nom::error::Error<_>>(data).ok()?;
        let (data, supported) = number::complete::le_u32::<_, nom::error::Error<_>>(data).ok()?;
        let (data, current) = number::complete::le_u32::<_, nom::error::Error<_>>(data).ok()?;
        let (data, dev_class) = nom::bytes::complete::take::<_, _, nom::error::Error<_>>(3_usize)(data).ok()?;
        let name_end = data.len().min(MAX_NAME_LENGTH);
        let name = nul_terminated(&data[..name_end]);
        let short_name = if data.len() > MAX_NAME_LENGTH {
            nul_terminated(&data[MAX_NAME_LENGTH..])
        } else {
            String::new()
        };
        Some(AdapterInfo {
            dev_id,
            address,
            version,
            manufacturer,
            supported_settings: AdapterSettings::from_bits(supported),
            current_settings: AdapterSettings::from_bits(current),
            dev_class: dev_class[0] as u32 | (dev_class[1] as u32) << 8 | (dev_class[2] as u32) << 16,
            name,
            short_name,
        })
    }
}

fn nul_terminated(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// RSSI and transmit-power sample from `Get Connection Information`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Received signal strength, dBm.
    pub rssi: i8,
    /// Current transmit power, dBm.
    pub tx_power: i8,
    /// Maximum transmit power, dBm.
    pub max_tx_power: i8,
}

impl ConnectionInfo {
    /// Parses a `Get Connection Information` reply payload.
    pub fn parse(data: &[u8]) -> Option<ConnectionInfo> {
        // address + type precede the triple
        if data.len() < 10 {
            return None;
        }
        Some(ConnectionInfo {
            rssi: data[7] as i8,
            tx_power: data[8] as i8,
            max_tx_power: data[9] as i8,
        })
    }
}

/// Whitelist auto-connect action for `Add Device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistConnectType {
    /// Report only, never connect.
    None,
    /// Allow an incoming connection.
    AllowIncoming,
    /// Auto-connect whenever seen advertising.
    AutoConnect,
}

impl WhitelistConnectType {
    /// The `Add Device` action byte.
    pub fn code(self) -> u8 {
        match self {
            WhitelistConnectType::None => 0x00,
            WhitelistConnectType::AllowIncoming => 0x01,
            WhitelistConnectType::AutoConnect => 0x02,
        }
    }
}

/// Connection parameters for `Load Connection Parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParam {
    /// Minimum connection interval, 1.25 ms units.
    pub min_interval: u16,
    /// Maximum connection interval, 1.25 ms units.
    pub max_interval: u16,
    /// Slave latency, connection events.
    pub latency: u16,
    /// Supervision timeout, 10 ms units.
    pub timeout: u16,
}

/// One outbound MGMT command frame.
#[derive(Debug, Clone)]
pub struct MgmtCommand {
    /// The command.
    pub opcode: MgmtOpcode,
    /// Target adapter, or [INDEX_NONE].
    pub dev_id: u16,
    /// Raw command parameters.
    pub params: Vec<u8>,
}

impl MgmtCommand {
    /// A parameterless command.
    pub fn new(opcode: MgmtOpcode, dev_id: u16) -> MgmtCommand {
        MgmtCommand {
            opcode,
            dev_id,
            params: Vec::new(),
        }
    }

    /// A single-byte mode command, e.g. `Set Powered`.
    pub fn set_mode(opcode: MgmtOpcode, dev_id: u16, mode: u8) -> MgmtCommand {
        MgmtCommand {
            opcode,
            dev_id,
            params: vec![mode],
        }
    }

    /// `Start Discovery` / `Stop Discovery` with a scan-type bitmask.
    pub fn discovery(opcode: MgmtOpcode, dev_id: u16, scan_type: ScanType) -> MgmtCommand {
        MgmtCommand {
            opcode,
            dev_id,
            params: vec![scan_type.code()],
        }
    }

    /// A command addressing one remote device, e.g. `Disconnect`.
    pub fn with_address(
        opcode: MgmtOpcode,
        dev_id: u16,
        address: Address,
        address_type: AddressType,
    ) -> MgmtCommand {
        let mut params = Vec::with_capacity(7);
        params.put_slice(&address.to_le_bytes());
        params.put_u8(address_type.code());
        MgmtCommand {
            opcode,
            dev_id,
            params,
        }
    }

    /// `Add Device` to the kernel whitelist.
    pub fn add_device(
        dev_id: u16,
        address: Address,
        address_type: AddressType,
        ctype: WhitelistConnectType,
    ) -> MgmtCommand {
        let mut cmd = Self::with_address(MgmtOpcode::AddDevice, dev_id, address, address_type);
        cmd.params.put_u8(ctype.code());
        cmd
    }

    /// `Load Connection Parameters` for a single peer.
    pub fn load_conn_param(
        dev_id: u16,
        address: Address,
        address_type: AddressType,
        param: ConnParam,
    ) -> MgmtCommand {
        let mut params = Vec::with_capacity(2 + 7 + 8);
        params.put_u16_le(1); // one parameter record
        params.put_slice(&address.to_le_bytes());
        params.put_u8(address_type.code());
        params.put_u16_le(param.min_interval);
        params.put_u16_le(param.max_interval);
        params.put_u16_le(param.latency);
        params.put_u16_le(param.timeout);
        MgmtCommand {
            opcode: MgmtOpcode::LoadConnParam,
            dev_id,
            params,
        }
    }

    /// `Set Local Name`; both names are truncated and NUL padded on the wire.
    pub fn set_local_name(dev_id: u16, name: &str, short_name: &str) -> MgmtCommand {
        let mut params = vec![0_u8; MAX_NAME_LENGTH + MAX_SHORT_NAME_LENGTH];
        let name = name.as_bytes();
        let n = name.len().min(MAX_NAME_LENGTH - 1);
        params[..n].copy_from_slice(&name[..n]);
        let short = short_name.as_bytes();
        let n = short.len().min(MAX_SHORT_NAME_LENGTH - 1);
        params[MAX_NAME_LENGTH..MAX_NAME_LENGTH + n].copy_from_slice(&short[..n]);
        MgmtCommand {
            opcode: MgmtOpcode::SetLocalName,
            dev_id,
            params,
        }
    }

    /// The full frame, header plus parameters.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(6 + self.params.len());
        frame.put_u16_le(self.opcode.code());
        frame.put_u16_le(self.dev_id);
        frame.put_u16_le(self.params.len() as u16);
        frame.put_slice(&self.params);
        frame
    }
}

/// One inbound MGMT frame.
#[derive(Debug, Clone)]
pub struct MgmtEvent {
    code: u16,
    dev_id: u16,
    params: Vec<u8>,
    synthetic: bool,
}

/// `Device Found` payload.
#[derive(Debug, Clone)]
pub struct DeviceFoundParams {
    /// Remote address.
    pub address: Address,
    /// Remote address type.
    pub address_type: AddressType,
    /// Received signal strength, dBm.
    pub rssi: i8,
    /// Kernel report flags.
    pub flags: u32,
    /// Raw EIR/AD payload.
    pub eir: Vec<u8>,
}

/// `Device Connected` payload.
#[derive(Debug, Clone)]
pub struct DeviceConnectedParams {
    /// Remote address.
    pub address: Address,
    /// Remote address type.
    pub address_type: AddressType,
    /// Kernel connection flags.
    pub flags: u32,
    /// Raw EIR/AD payload sampled at connect time.
    pub eir: Vec<u8>,
}

/// `Device Disconnected` payload.
#[derive(Debug, Clone)]
pub struct DeviceDisconnectedParams {
    /// Remote address.
    pub address: Address,
    /// Remote address type.
    pub address_type: AddressType,
    /// Why the link dropped.
    pub reason: HciStatus,
}

impl MgmtEvent {
    /// Parses one inbound frame. `frame` must hold the header and the full
    /// parameter run; a short frame yields `None`.
    pub fn parse(frame: &[u8]) -> Option<MgmtEvent> {
        if frame.len() < 6 {
            return None;
        }
        let code = u16::from_le_bytes([frame[0], frame[1]]);
        let dev_id = u16::from_le_bytes([frame[2], frame[3]]);
        let param_len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
        if frame.len() < 6 + param_len {
            return None;
        }
        Some(MgmtEvent {
            code,
            dev_id,
            params: frame[6..6 + param_len].to_vec(),
            synthetic: false,
        })
    }

    /// A locally synthesized `Device Disconnected`, used when an I/O error
    /// replaces the wire command.
    pub fn synthetic_device_disconnected(
        dev_id: u16,
        address: Address,
        address_type: AddressType,
        reason: HciStatus,
    ) -> MgmtEvent {
        let mut params = Vec::with_capacity(8);
        params.put_slice(&address.to_le_bytes());
        params.put_u8(address_type.code());
        params.put_u8(reason.code());
        MgmtEvent {
            code: MgmtEventCode::DeviceDisconnected.code(),
            dev_id,
            params,
            synthetic: true,
        }
    }

    /// A locally synthesized `Local Name Changed`, posted after a successful
    /// `Set Local Name`.
    pub fn synthetic_local_name_changed(dev_id: u16, name: &str, short_name: &str) -> MgmtEvent {
        let cmd = MgmtCommand::set_local_name(dev_id, name, short_name);
        MgmtEvent {
            code: MgmtEventCode::LocalNameChanged.code(),
            dev_id,
            params: cmd.params,
            synthetic: true,
        }
    }

    /// The event code.
    pub fn event_code(&self) -> MgmtEventCode {
        MgmtEventCode::from_code(self.code)
    }

    /// The raw event code on the wire.
    pub fn raw_code(&self) -> u16 {
        self.code
    }

    /// Originating adapter index, or [INDEX_NONE].
    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Raw event parameters.
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// True for locally synthesized events.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// True for the two command reply pseudo events.
    pub fn is_cmd_reply(&self) -> bool {
        matches!(
            self.event_code(),
            MgmtEventCode::CmdComplete | MgmtEventCode::CmdStatus
        )
    }

    /// `Command Complete` content: answered opcode, status and return data.
    pub fn cmd_complete(&self) -> Option<(u16, MgmtStatus, &[u8])> {
        if self.event_code() != MgmtEventCode::CmdComplete || self.params.len() < 3 {
            return None;
        }
        let opcode = u16::from_le_bytes([self.params[0], self.params[1]]);
        Some((opcode, self.params[2].into(), &self.params[3..]))
    }

    /// `Command Status` content: answered opcode and status.
    pub fn cmd_status(&self) -> Option<(u16, MgmtStatus)> {
        if self.event_code() != MgmtEventCode::CmdStatus || self.params.len() < 3 {
            return None;
        }
        let opcode = u16::from_le_bytes([self.params[0], self.params[1]]);
        Some((opcode, self.params[2].into()))
    }

    /// The reply status of either reply pseudo event.
    pub fn status(&self) -> Option<MgmtStatus> {
        self.cmd_complete()
            .map(|(_, status, _)| status)
            .or_else(|| self.cmd_status().map(|(_, status)| status))
    }

    /// True iff this frame answers `req`: a reply pseudo event naming the
    /// request's opcode on the request's adapter.
    pub fn validate(&self, req: &MgmtCommand) -> bool {
        if self.dev_id != req.dev_id {
            return false;
        }
        let answered = self
            .cmd_complete()
            .map(|(opcode, _, _)| opcode)
            .or_else(|| self.cmd_status().map(|(opcode, _)| opcode));
        answered == Some(req.opcode.code())
    }

    /// Parses a `Device Found` payload.
    pub fn device_found(&self) -> Option<DeviceFoundParams> {
        if self.event_code() != MgmtEventCode::DeviceFound || self.params.len() < 14 {
            return None;
        }
        let address = Address::from_le_bytes(self.params[..6].try_into().ok()?);
        let address_type = AddressType::from_code(self.params[6]);
        let rssi = self.params[7] as i8;
        let flags = u32::from_le_bytes(self.params[8..12].try_into().ok()?);
        let eir_len = u16::from_le_bytes([self.params[12], self.params[13]]) as usize;
        let eir = self.params.get(14..14 + eir_len)?.to_vec();
        Some(DeviceFoundParams {
            address,
            address_type,
            rssi,
            flags,
            eir,
        })
    }

    /// Parses a `Device Connected` payload.
    pub fn device_connected(&self) -> Option<DeviceConnectedParams> {
        if self.event_code() != MgmtEventCode::DeviceConnected || self.params.len() < 13 {
            return None;
        }
        let address = Address::from_le_bytes(self.params[..6].try_into().ok()?);
        let address_type = AddressType::from_code(self.params[6]);
        let flags = u32::from_le_bytes(self.params[7..11].try_into().ok()?);
        let eir_len = u16::from_le_bytes([self.params[11], self.params[12]]) as usize;
        let eir = self.params.get(13..13 + eir_len)?.to_vec();
        Some(DeviceConnectedParams {
            address,
            address_type,
            flags,
            eir,
        })
    }

    /// Parses a `Device Disconnected` payload.
    ///
    /// Kernel frames carry the MGMT reason code; synthetic frames carry the
    /// HCI status directly.
    pub fn device_disconnected(&self) -> Option<DeviceDisconnectedParams> {
        if self.event_code() != MgmtEventCode::DeviceDisconnected || self.params.len() < 8 {
            return None;
        }
        let address = Address::from_le_bytes(self.params[..6].try_into().ok()?);
        let address_type = AddressType::from_code(self.params[6]);
        let reason = if self.synthetic {
            HciStatus::from_code(self.params[7])
        } else {
            HciStatus::from_mgmt_disconnect_reason(self.params[7])
        };
        Some(DeviceDisconnectedParams {
            address,
            address_type,
            reason,
        })
    }

    /// Parses a `Discovering` payload into `(scan type, enabled)`.
    pub fn discovering(&self) -> Option<(ScanType, bool)> {
        if self.event_code() != MgmtEventCode::Discovering || self.params.len() < 2 {
            return None;
        }
        Some((ScanType::from_code(self.params[0]), self.params[1] != 0))
    }

    /// Parses a `New Settings` payload.
    pub fn new_settings(&self) -> Option<AdapterSettings> {
        if self.event_code() != MgmtEventCode::NewSettings || self.params.len() < 4 {
            return None;
        }
        Some(AdapterSettings::from_bits(u32::from_le_bytes(
            self.params[..4].try_into().ok()?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: u16, dev_id: u16, params: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        f.put_u16_le(code);
        f.put_u16_le(dev_id);
        f.put_u16_le(params.len() as u16);
        f.put_slice(params);
        f
    }

    #[test]
    fn command_frame_layout() {
        let cmd = MgmtCommand::set_mode(MgmtOpcode::SetPowered, 0, 1);
        assert_eq!(vec![0x05, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01], cmd.to_bytes());
    }

    #[test]
    fn cmd_complete_parse_and_validate() {
        let req = MgmtCommand::new(MgmtOpcode::ReadVersion, INDEX_NONE);
        let evt = MgmtEvent::parse(&frame(0x0001, INDEX_NONE, &[0x01, 0x00, 0x00, 0x01, 0x16, 0x00]))
            .unwrap();
        let (opcode, status, data) = evt.cmd_complete().unwrap();
        assert_eq!(0x0001, opcode);
        assert_eq!(MgmtStatus::Success, status);
        assert_eq!(&[0x01, 0x16, 0x00], data);
        assert!(evt.validate(&req));

        // Same reply does not answer a different command or adapter.
        let other = MgmtCommand::new(MgmtOpcode::ReadIndexList, INDEX_NONE);
        assert!(!evt.validate(&other));
        let other_adapter = MgmtCommand::new(MgmtOpcode::ReadVersion, 0);
        assert!(!evt.validate(&other_adapter));
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(MgmtEvent::parse(&[0x01, 0x00, 0x00]).is_none());
        // Header claims more parameters than present.
        assert!(MgmtEvent::parse(&[0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x01]).is_none());
    }

    #[test]
    fn device_found_payload() {
        let mut params = vec![0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0, 0x01, 0xC8];
        params.put_u32_le(0);
        params.put_u16_le(3);
        params.put_slice(&[0x02, 0x01, 0x06]);
        let evt = MgmtEvent::parse(&frame(0x0012, 0, &params)).unwrap();
        let found = evt.device_found().unwrap();
        assert_eq!("C0:26:DA:01:DA:B1", found.address.to_string());
        assert_eq!(AddressType::LePublic, found.address_type);
        assert_eq!(-56, found.rssi);
        assert_eq!(vec![0x02, 0x01, 0x06], found.eir);
    }

    #[test]
    fn synthetic_disconnect_keeps_hci_reason() {
        let addr: Address = "C0:26:DA:01:DA:B1".parse().unwrap();
        let evt = MgmtEvent::synthetic_device_disconnected(
            0,
            addr,
            AddressType::LePublic,
            HciStatus::RemoteUserTerminatedConnection,
        );
        assert!(evt.is_synthetic());
        let parsed = evt.device_disconnected().unwrap();
        assert_eq!(HciStatus::RemoteUserTerminatedConnection, parsed.reason);
    }

    #[test]
    fn kernel_disconnect_reason_is_mapped() {
        let mut params = vec![0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0, 0x01];
        params.push(0x02); // MGMT: connection terminated by local host
        let evt = MgmtEvent::parse(&frame(0x000C, 0, &params)).unwrap();
        let parsed = evt.device_disconnected().unwrap();
        assert_eq!(HciStatus::ConnectionTerminatedByLocalHost, parsed.reason);
    }

    #[test]
    fn adapter_info_parse() {
        let mut data = Vec::new();
        data.put_slice(&[0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0]);
        data.put_u8(0x08); // core 4.2
        data.put_u16_le(0x0002);
        data.put_u32_le(0x0000_02FF);
        data.put_u32_le(0x0000_0201); // powered + LE
        data.put_slice(&[0x0C, 0x02, 0x7A]);
        let mut names = vec![0_u8; MAX_NAME_LENGTH + MAX_SHORT_NAME_LENGTH];
        names[..4].copy_from_slice(b"hci0");
        data.extend_from_slice(&names);

        let info = AdapterInfo::parse(0, &data).unwrap();
        assert_eq!("C0:26:DA:01:DA:B1", info.address.to_string());
        assert_eq!("hci0", info.name);
        assert!(info.current_settings.is_set(AdapterSetting::Powered));
        assert!(info.current_settings.is_set(AdapterSetting::Le));
        assert!(!info.current_settings.is_set(AdapterSetting::Bredr));
        assert_eq!(0x7A020C, info.dev_class);
    }

    #[test]
    fn scan_type_codes() {
        assert_eq!(0x06, ScanType::Le.code());
        assert_eq!(ScanType::Le, ScanType::from_code(0x06));
        assert_eq!(ScanType::Dual, ScanType::from_code(0x07));
        assert_eq!(ScanType::Le, ScanType::for_mode(BtMode::None));
        assert_eq!(ScanType::Dual, ScanType::for_mode(BtMode::Dual));
    }
}
