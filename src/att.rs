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

//! Attribute Protocol PDUs: opcodes, request serialization and response
//! parsing.
//!
//! Every PDU is an opcode byte followed by opcode-specific fields in little
//! endian. The request/response pairing is strict: at most one request may be
//! outstanding per connection.

use crate::core::{Uuid, Uuid128, Uuid16};
use bytes::BufMut;
use nom::number;

/// ATT opcodes used by the client role.
#[allow(missing_docs)]
pub mod opcode {
    pub const ERROR_RSP: u8 = 0x01;
    pub const EXCHANGE_MTU_REQ: u8 = 0x02;
    pub const EXCHANGE_MTU_RSP: u8 = 0x03;
    pub const FIND_INFORMATION_REQ: u8 = 0x04;
    pub const FIND_INFORMATION_RSP: u8 = 0x05;
    pub const READ_BY_TYPE_REQ: u8 = 0x08;
    pub const READ_BY_TYPE_RSP: u8 = 0x09;
    pub const READ_REQ: u8 = 0x0A;
    pub const READ_RSP: u8 = 0x0B;
    pub const READ_BLOB_REQ: u8 = 0x0C;
    pub const READ_BLOB_RSP: u8 = 0x0D;
    pub const READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
    pub const READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
    pub const WRITE_REQ: u8 = 0x12;
    pub const WRITE_RSP: u8 = 0x13;
    pub const PREPARE_WRITE_REQ: u8 = 0x16;
    pub const PREPARE_WRITE_RSP: u8 = 0x17;
    pub const EXECUTE_WRITE_REQ: u8 = 0x18;
    pub const EXECUTE_WRITE_RSP: u8 = 0x19;
    pub const HANDLE_VALUE_NOTIFICATION: u8 = 0x1B;
    pub const HANDLE_VALUE_INDICATION: u8 = 0x1D;
    pub const HANDLE_VALUE_CONFIRMATION: u8 = 0x1E;
    pub const WRITE_CMD: u8 = 0x52;
}

/// The response opcode answering `req`, for every request this client sends.
pub fn rsp_for_req(req: u8) -> u8 {
    req + 1
}

/// Error codes carried by an ATT `Error Response`, Vol 3 Part F 3.4.1.1.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// Application or reserved code.
    Other(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => AttErrorCode::InvalidHandle,
            0x02 => AttErrorCode::ReadNotPermitted,
            0x03 => AttErrorCode::WriteNotPermitted,
            0x04 => AttErrorCode::InvalidPdu,
            0x05 => AttErrorCode::InsufficientAuthentication,
            0x06 => AttErrorCode::RequestNotSupported,
            0x07 => AttErrorCode::InvalidOffset,
            0x08 => AttErrorCode::InsufficientAuthorization,
            0x09 => AttErrorCode::PrepareQueueFull,
            0x0A => AttErrorCode::AttributeNotFound,
            0x0B => AttErrorCode::AttributeNotLong,
            0x0C => AttErrorCode::InsufficientEncryptionKeySize,
            0x0D => AttErrorCode::InvalidAttributeValueLength,
            0x0E => AttErrorCode::UnlikelyError,
            0x0F => AttErrorCode::InsufficientEncryption,
            0x10 => AttErrorCode::UnsupportedGroupType,
            0x11 => AttErrorCode::InsufficientResources,
            other => AttErrorCode::Other(other),
        }
    }
}

/// A parsed `Error Response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRsp {
    /// The request opcode the error answers.
    pub req_opcode: u8,
    /// The attribute handle the request referred to, 0 when not applicable.
    pub handle: u16,
    /// The error code.
    pub code: AttErrorCode,
}

/// One entry of a `Read By Group Type Response`: a service handle range plus
/// its group-member UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// First attribute handle of the group.
    pub start_handle: u16,
    /// Last attribute handle of the group.
    pub end_handle: u16,
    /// Group member attribute value, e.g. the service UUID.
    pub uuid: Uuid,
}

/// One entry of a `Read By Type Response`: the attribute handle plus its
/// uninterpreted value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    /// The attribute handle.
    pub handle: u16,
    /// The attribute value, fixed-width per response.
    pub value: Vec<u8>,
}

// --- request serialization ---

/// `Exchange MTU Request` announcing the client receive MTU.
pub fn exchange_mtu_req(client_mtu: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(3);
    pdu.put_u8(opcode::EXCHANGE_MTU_REQ);
    pdu.put_u16_le(client_mtu);
    pdu
}

/// `Read By Group Type Request` over `[start..=end]` for a 16-bit group type.
pub fn read_by_group_type_req(start: u16, end: u16, group_type: Uuid16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(7);
    pdu.put_u8(opcode::READ_BY_GROUP_TYPE_REQ);
    pdu.put_u16_le(start);
    pdu.put_u16_le(end);
    pdu.put_slice(&group_type.as_le_bytes());
    pdu
}

/// `Read By Type Request` over `[start..=end]` for a 16-bit attribute type.
pub fn read_by_type_req(start: u16, end: u16, attr_type: Uuid16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(7);
    pdu.put_u8(opcode::READ_BY_TYPE_REQ);
    pdu.put_u16_le(start);
    pdu.put_u16_le(end);
    pdu.put_slice(&attr_type.as_le_bytes());
    pdu
}

/// `Find Information Request` over `[start..=end]`.
pub fn find_information_req(start: u16, end: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.put_u8(opcode::FIND_INFORMATION_REQ);
    pdu.put_u16_le(start);
    pdu.put_u16_le(end);
    pdu
}

/// `Read Request` for one attribute value.
pub fn read_req(handle: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(3);
    pdu.put_u8(opcode::READ_REQ);
    pdu.put_u16_le(handle);
    pdu
}

/// `Read Blob Request` continuing a long read at `offset`.
pub fn read_blob_req(handle: u16, offset: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.put_u8(opcode::READ_BLOB_REQ);
    pdu.put_u16_le(handle);
    pdu.put_u16_le(offset);
    pdu
}

/// Confirmed `Write Request`.
pub fn write_req(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(3 + value.len());
    pdu.put_u8(opcode::WRITE_REQ);
    pdu.put_u16_le(handle);
    pdu.put_slice(value);
    pdu
}

/// Unconfirmed `Write Command`; the server never replies.
pub fn write_cmd(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(3 + value.len());
    pdu.put_u8(opcode::WRITE_CMD);
    pdu.put_u16_le(handle);
    pdu.put_slice(value);
    pdu
}

/// `Prepare Write Request` queueing one part of a long write.
pub fn prepare_write_req(handle: u16, offset: u16, part: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5 + part.len());
    pdu.put_u8(opcode::PREPARE_WRITE_REQ);
    pdu.put_u16_le(handle);
    pdu.put_u16_le(offset);
    pdu.put_slice(part);
    pdu
}

/// `Execute Write Request`; `commit` false cancels the queue.
pub fn execute_write_req(commit: bool) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(2);
    pdu.put_u8(opcode::EXECUTE_WRITE_REQ);
    pdu.put_u8(commit as u8);
    pdu
}

/// `Handle Value Confirmation` acknowledging an indication.
pub fn handle_value_confirmation() -> Vec<u8> {
    vec![opcode::HANDLE_VALUE_CONFIRMATION]
}

// --- response parsing ---
//
// Parsers take the PDU parameters, i.e. everything after the opcode byte.

/// Parses an `Error Response`.
pub fn parse_error_rsp(params: &[u8]) -> Option<ErrorRsp> {
    let (params, req_opcode) = number::complete::u8::<_, nom::error::Error<_>>(params).ok()?;
    let (params, handle) = number::complete::le_u16::<_, nom::error::Error<_>>(params).ok()?;
    let (_, code) = number::complete::u8::<_, nom::error::Error<_>>(params).ok()?;
    Some(ErrorRsp {
        req_opcode,
        handle,
        code: code.into(),
    })
}

/// Parses an `Exchange MTU Response` into the server receive MTU.
pub fn parse_exchange_mtu_rsp(params: &[u8]) -> Option<u16> {
    number::complete::le_u16::<_, nom::error::Error<_>>(params)
        .ok()
        .map(|(_, mtu)| mtu)
}

/// Parses a `Read By Group Type Response` into group entries.
///
/// The leading byte gives the per-entry length; 6 carries 16-bit UUIDs and
/// 20 carries 128-bit UUIDs.
pub fn parse_read_by_group_type_rsp(params: &[u8]) -> Option<Vec<GroupEntry>> {
    let (entries, entry_len) = number::complete::u8::<_, nom::error::Error<_>>(params).ok()?;
    if entry_len != 6 && entry_len != 20 {
        return None;
    }
    let mut list = Vec::new();
    for chunk in entries.chunks(entry_len as usize) {
        if chunk.len() < entry_len as usize {
            return None;
        }
        let start_handle = u16::from_le_bytes([chunk[0], chunk[1]]);
        let end_handle = u16::from_le_bytes([chunk[2], chunk[3]]);
        let uuid = if entry_len == 6 {
            Uuid::from(Uuid16::from_le_bytes([chunk[4], chunk[5]]))
        } else {
            let (_, uuid) = Uuid128::parse_le(&chunk[4..]).ok()?;
            Uuid::from(uuid)
        };
        list.push(GroupEntry {
            start_handle,
            end_handle,
            uuid,
        });
    }
    if list.is_empty() {
        return None;
    }
    Some(list)
}

/// Parses a `Read By Type Response` into handle/value entries.
pub fn parse_read_by_type_rsp(params: &[u8]) -> Option<Vec<TypeEntry>> {
    let (entries, entry_len) = number::complete::u8::<_, nom::error::Error<_>>(params).ok()?;
    if entry_len < 3 {
        return None;
    }
    let mut list = Vec::new();
    for chunk in entries.chunks(entry_len as usize) {
        if chunk.len() < entry_len as usize {
            return None;
        }
        list.push(TypeEntry {
            handle: u16::from_le_bytes([chunk[0], chunk[1]]),
            value: chunk[2..].to_vec(),
        });
    }
    if list.is_empty() {
        return None;
    }
    Some(list)
}

/// Parses a `Find Information Response` into handle/type pairs.
pub fn parse_find_information_rsp(params: &[u8]) -> Option<Vec<(u16, Uuid)>> {
    let (entries, format) = number::complete::u8::<_, nom::error::Error<_>>(params).ok()?;
    let entry_len = match format {
        0x01 => 4,
        0x02 => 18,
        _ => return None,
    };
    let mut list = Vec::new();
    for chunk in entries.chunks(entry_len) {
        if chunk.len() < entry_len {
            return None;
        }
        let handle = u16::from_le_bytes([chunk[0], chunk[1]]);
        let uuid = if format == 0x01 {
            Uuid::from(Uuid16::from_le_bytes([chunk[2], chunk[3]]))
        } else {
            let (_, uuid) = Uuid128::parse_le(&chunk[2..]).ok()?;
            Uuid::from(uuid)
        };
        list.push((handle, uuid));
    }
    if list.is_empty() {
        return None;
    }
    Some(list)
}

/// Parses a `Handle Value Notification`/`Indication` into handle and value.
pub fn parse_handle_value(params: &[u8]) -> Option<(u16, &[u8])> {
    number::complete::le_u16::<_, nom::error::Error<_>>(params)
        .ok()
        .map(|(value, handle)| (handle, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_request_wire_form() {
        assert_eq!(vec![0x02, 0x00, 0x02], exchange_mtu_req(512));
    }

    #[test]
    fn error_rsp_roundtrip() {
        let rsp = parse_error_rsp(&[0x10, 0x01, 0x00, 0x0A]).unwrap();
        assert_eq!(opcode::READ_BY_GROUP_TYPE_REQ, rsp.req_opcode);
        assert_eq!(0x0001, rsp.handle);
        assert_eq!(AttErrorCode::AttributeNotFound, rsp.code);
    }

    #[test]
    fn group_type_rsp_with_16_bit_uuids() {
        let params = [
            0x06, // entry length
            0x01, 0x00, 0x07, 0x00, 0x00, 0x18, // GAP service 0x1800
            0x08, 0x00, 0xFF, 0xFF, 0x0D, 0x18, // heart rate to end of table
        ];
        let entries = parse_read_by_group_type_rsp(&params).unwrap();
        assert_eq!(2, entries.len());
        assert_eq!(0x0001, entries[0].start_handle);
        assert_eq!(0x0007, entries[0].end_handle);
        assert_eq!(Uuid::from(Uuid16::from(0x1800_u16)), entries[0].uuid);
        assert_eq!(0xFFFF, entries[1].end_handle);
    }

    #[test]
    fn group_type_rsp_rejects_odd_entry_length() {
        assert!(parse_read_by_group_type_rsp(&[0x05, 0x01, 0x00, 0x07, 0x00, 0x00]).is_none());
    }

    #[test]
    fn read_by_type_rsp_splits_entries() {
        let params = [
            0x07, // entry length: handle + 5 value bytes
            0x02, 0x00, 0x02, 0x03, 0x00, 0x00, 0x2A,
            0x04, 0x00, 0x10, 0x05, 0x00, 0x0D, 0x2A,
        ];
        let entries = parse_read_by_type_rsp(&params).unwrap();
        assert_eq!(2, entries.len());
        assert_eq!(0x0002, entries[0].handle);
        assert_eq!(vec![0x02, 0x03, 0x00, 0x00, 0x2A], entries[0].value);
    }

    #[test]
    fn find_information_rsp_both_formats() {
        let short = parse_find_information_rsp(&[0x01, 0x05, 0x00, 0x02, 0x29]).unwrap();
        assert_eq!(vec![(0x0005, Uuid::from(Uuid16::from(0x2902_u16)))], short);

        let mut long = vec![0x02, 0x06, 0x00];
        long.extend(Uuid128::parse_str("F000AA01-0451-4000-B000-000000000000")
            .unwrap()
            .as_le_bytes());
        let parsed = parse_find_information_rsp(&long).unwrap();
        assert_eq!(0x0006, parsed[0].0);
    }

    #[test]
    fn notification_split() {
        let (handle, value) = parse_handle_value(&[0x21, 0x00, 0xDE, 0xAD]).unwrap();
        assert_eq!(0x0021, handle);
        assert_eq!(&[0xDE, 0xAD], value);
    }

    #[test]
    fn every_request_pairs_with_the_next_opcode() {
        assert_eq!(opcode::EXCHANGE_MTU_RSP, rsp_for_req(opcode::EXCHANGE_MTU_REQ));
        assert_eq!(opcode::READ_BY_GROUP_TYPE_RSP, rsp_for_req(opcode::READ_BY_GROUP_TYPE_REQ));
        assert_eq!(opcode::WRITE_RSP, rsp_for_req(opcode::WRITE_REQ));
        assert_eq!(opcode::EXECUTE_WRITE_RSP, rsp_for_req(opcode::EXECUTE_WRITE_REQ));
    }
}
