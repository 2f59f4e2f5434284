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

//! Decoding of Advertising Data (AD) and Extended Inquiry Response (EIR)
//! records into a typed report.
//!
//! Both formats share the same block layout, a sequence of
//! `(len: u8) (type: u8) (data: len-1 bytes)` records where a zero length
//! terminates early. Unknown record types are skipped; a malformed record is
//! dropped without aborting the remaining records.

use crate::address::{Address, AddressType};
use crate::core::{Uuid, Uuid128, Uuid16, Uuid32};
use itertools::Itertools;
use nom::{combinator, multi, number};
use std::fmt;
use strum::IntoEnumIterator;

/// The numeric code of an AD/EIR record type.
///
/// For the types this decoder extracts, see [AdType]; other assigned codes
/// pass through as opaque values and are skipped.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub struct AdTypeCode(u8);

impl From<AdType> for AdTypeCode {
    fn from(value: AdType) -> Self {
        let byte = match value {
            AdType::Flags => 0x01,
            AdType::Uuid16Incomplete => 0x02,
            AdType::Uuid16Complete => 0x03,
            AdType::Uuid32Incomplete => 0x04,
            AdType::Uuid32Complete => 0x05,
            AdType::Uuid128Incomplete => 0x06,
            AdType::Uuid128Complete => 0x07,
            AdType::NameShort => 0x08,
            AdType::NameComplete => 0x09,
            AdType::TxPower => 0x0A,
            AdType::DeviceClass => 0x0D,
            AdType::HashC192 => 0x0E,
            AdType::RandomizerR192 => 0x0F,
            AdType::DeviceId => 0x10,
            AdType::ServiceData16 => 0x16,
            AdType::Appearance => 0x19,
            AdType::Manufacturer => 0xFF,
        };
        Self(byte)
    }
}

impl From<u8> for AdTypeCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<AdTypeCode> for u8 {
    fn from(value: AdTypeCode) -> Self {
        value.0
    }
}

/// Record types extracted by the decoder.
///
/// See Bluetooth Assigned Numbers § 2.3.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumIter)]
pub enum AdType {
    Flags,
    Uuid16Incomplete,
    Uuid16Complete,
    Uuid32Incomplete,
    Uuid32Complete,
    Uuid128Incomplete,
    Uuid128Complete,
    NameShort,
    NameComplete,
    TxPower,
    DeviceClass,
    HashC192,
    RandomizerR192,
    DeviceId,
    ServiceData16,
    Appearance,
    Manufacturer,
}

impl AdType {
    /// The matching type for the provided code, if the decoder handles it.
    pub fn for_type_code(code: AdTypeCode) -> Option<AdType> {
        Self::iter().find(|t| AdTypeCode::from(*t) == code)
    }
}

/// Where a report originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EirSource {
    /// Not available.
    Na,
    /// Advertising Data.
    Ad,
    /// Extended Inquiry Response.
    Eir,
}

/// Individual report attributes, combined into an [EirDataMask].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::EnumIter)]
pub enum EirDataField {
    EvtType,
    AddressType,
    Address,
    Flags,
    Name,
    NameShort,
    Rssi,
    TxPower,
    ManufacturerData,
    DeviceClass,
    Appearance,
    Hash,
    Randomizer,
    DeviceId,
    ServiceUuid,
}

impl EirDataField {
    fn as_bit_mask(&self) -> u32 {
        match self {
            EirDataField::EvtType => 1 << 0,
            EirDataField::AddressType => 1 << 1,
            EirDataField::Address => 1 << 2,
            EirDataField::Flags => 1 << 3,
            EirDataField::Name => 1 << 4,
            EirDataField::NameShort => 1 << 5,
            EirDataField::Rssi => 1 << 6,
            EirDataField::TxPower => 1 << 7,
            EirDataField::ManufacturerData => 1 << 8,
            EirDataField::DeviceClass => 1 << 9,
            EirDataField::Appearance => 1 << 10,
            EirDataField::Hash => 1 << 11,
            EirDataField::Randomizer => 1 << 12,
            EirDataField::DeviceId => 1 << 13,
            EirDataField::ServiceUuid => 1 << 14,
        }
    }
}

impl std::ops::BitOr for EirDataField {
    type Output = EirDataMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EirDataMask {
            bits: self.as_bit_mask() | rhs.as_bit_mask(),
        }
    }
}

/// Set of report attributes that carry data, the report's "data-set mask".
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EirDataMask {
    bits: u32,
}

impl EirDataMask {
    /// The empty mask.
    pub const NONE: EirDataMask = EirDataMask { bits: 0 };

    /// Returns true iff `field` is set.
    pub fn is_set(&self, field: EirDataField) -> bool {
        self.bits & field.as_bit_mask() != 0
    }

    /// Returns true iff no field is set.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns an iterator over the fields set in this mask.
    pub fn iter(&self) -> impl Iterator<Item = EirDataField> + '_ {
        EirDataField::iter().filter(|f| self.is_set(*f))
    }

    pub(crate) fn set(&mut self, field: EirDataField) {
        self.bits |= field.as_bit_mask();
    }
}

impl From<EirDataField> for EirDataMask {
    fn from(value: EirDataField) -> Self {
        Self {
            bits: value.as_bit_mask(),
        }
    }
}

impl std::ops::BitOr<EirDataField> for EirDataMask {
    type Output = Self;

    fn bitor(self, rhs: EirDataField) -> Self::Output {
        Self {
            bits: self.bits | rhs.as_bit_mask(),
        }
    }
}

impl std::ops::BitOrAssign<EirDataField> for EirDataMask {
    fn bitor_assign(&mut self, rhs: EirDataField) {
        self.bits |= rhs.as_bit_mask();
    }
}

impl std::ops::BitOrAssign for EirDataMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl fmt::Debug for EirDataMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.iter().map(|field| format!("{field:?}")).join(", "))
    }
}

/// Manufacturer-specific advertising data: company id plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    /// Assigned 16-bit company identifier.
    pub company: u16,
    /// Opaque vendor payload.
    pub data: Vec<u8>,
}

/// One parsed AD or EIR record set.
///
/// Built by the decoder, immutable afterwards; the owning device merges the
/// set fields into its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EirReport {
    source: EirSource,
    timestamp_ms: u64,
    mask: EirDataMask,

    evt_type: u8,
    address: Address,
    address_type: AddressType,
    flags: u8,
    name: String,
    name_short: String,
    rssi: i8,
    tx_power: i8,
    manufacturer_data: Option<ManufacturerData>,
    services: Vec<Uuid>,
    device_class: u32,
    appearance: u16,
    hash: [u8; 16],
    randomizer: [u8; 16],
    did_source: u16,
    did_vendor: u16,
    did_product: u16,
    did_version: u16,
}

impl EirReport {
    /// An empty report with the given source and arrival timestamp
    /// (milliseconds since process start).
    pub fn new(source: EirSource, timestamp_ms: u64) -> EirReport {
        EirReport {
            source,
            timestamp_ms,
            mask: EirDataMask::NONE,
            evt_type: 0,
            address: crate::address::ANY,
            address_type: AddressType::Undefined,
            flags: 0,
            name: String::new(),
            name_short: String::new(),
            rssi: 0,
            tx_power: 0,
            manufacturer_data: None,
            services: Vec::new(),
            device_class: 0,
            appearance: 0,
            hash: [0; 16],
            randomizer: [0; 16],
            did_source: 0,
            did_vendor: 0,
            did_product: 0,
            did_version: 0,
        }
    }

    /// Where the record set came from.
    pub fn source(&self) -> EirSource {
        self.source
    }

    /// Arrival time, milliseconds since process start.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// The data-set mask: which attributes carry data.
    pub fn mask(&self) -> EirDataMask {
        self.mask
    }

    /// Returns true iff `field` carries data.
    pub fn is_set(&self, field: EirDataField) -> bool {
        self.mask.is_set(field)
    }

    /// Advertising event type byte, when sourced from an advertising report.
    pub fn evt_type(&self) -> u8 {
        self.evt_type
    }

    /// Remote device address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Remote device address type.
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// AD flags byte.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Complete local name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shortened local name.
    pub fn name_short(&self) -> &str {
        &self.name_short
    }

    /// Received signal strength, dBm.
    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    /// Advertised transmit power, dBm.
    pub fn tx_power(&self) -> i8 {
        self.tx_power
    }

    /// Manufacturer-specific data.
    pub fn manufacturer_data(&self) -> Option<&ManufacturerData> {
        self.manufacturer_data.as_ref()
    }

    /// Advertised service UUIDs, deduplicated, in order of appearance.
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    /// Class of device (24-bit).
    pub fn device_class(&self) -> u32 {
        self.device_class
    }

    /// GAP appearance value.
    pub fn appearance(&self) -> u16 {
        self.appearance
    }

    /// Simple Pairing Hash C-192.
    pub fn hash(&self) -> &[u8; 16] {
        &self.hash
    }

    /// Simple Pairing Randomizer R-192.
    pub fn randomizer(&self) -> &[u8; 16] {
        &self.randomizer
    }

    /// Device-ID quadruple `(source, vendor, product, version)`.
    pub fn device_id(&self) -> (u16, u16, u16, u16) {
        (self.did_source, self.did_vendor, self.did_product, self.did_version)
    }

    pub(crate) fn set_address(&mut self, address: Address) {
        self.address = address;
        self.mask.set(EirDataField::Address);
    }

    pub(crate) fn set_address_type(&mut self, address_type: AddressType) {
        self.address_type = address_type;
        self.mask.set(EirDataField::AddressType);
    }

    pub(crate) fn set_rssi(&mut self, rssi: i8) {
        self.rssi = rssi;
        self.mask.set(EirDataField::Rssi);
    }

    pub(crate) fn set_evt_type(&mut self, evt_type: u8) {
        self.evt_type = evt_type;
        self.mask.set(EirDataField::EvtType);
    }

    fn set_tx_power(&mut self, tx_power: i8) {
        self.tx_power = tx_power;
        self.mask.set(EirDataField::TxPower);
    }

    fn add_service(&mut self, uuid: Uuid) {
        if !self.services.contains(&uuid) {
            self.services.push(uuid);
        }
        self.mask.set(EirDataField::ServiceUuid);
    }

    /// Reads EIR/AD records from `data` into this report.
    ///
    /// Returns the number of records that contributed data. A record of
    /// length zero terminates early; a record whose declared length overruns
    /// the input ends decoding with a warning; a record whose payload is too
    /// short for its type is skipped.
    pub fn read_data(&mut self, data: &[u8]) -> usize {
        let mut count = 0;
        let mut offset = 0;
        while offset < data.len() {
            let elen = data[offset] as usize;
            if elen == 0 {
                break;
            }
            if offset + 1 + elen > data.len() {
                log::warn!(
                    "EIR record at offset {offset} overruns input: len {elen}, {} bytes left",
                    data.len() - offset - 1
                );
                break;
            }
            let etype = data[offset + 1];
            let payload = &data[offset + 2..offset + 1 + elen];
            if self.read_record(etype, payload) {
                count += 1;
            }
            offset += 1 + elen;
        }
        count
    }

    /// Applies one record, returning false when the type is unknown or the
    /// payload is too short for it.
    fn read_record(&mut self, etype: u8, payload: &[u8]) -> bool {
        let Some(ad_type) = AdType::for_type_code(etype.into()) else {
            log::debug!("skipping unknown EIR type {etype:#04x} ({} bytes)", payload.len());
            return false;
        };
        match ad_type {
            AdType::Flags => match payload.first() {
                Some(f) => {
                    self.flags = *f;
                    self.mask.set(EirDataField::Flags);
                }
                None => return false,
            },
            AdType::Uuid16Incomplete | AdType::Uuid16Complete => {
                match combinator::complete(multi::many0(Uuid16::parse_le))(payload) {
                    Ok((_rest, uuids)) => uuids.into_iter().for_each(|u| self.add_service(u.into())),
                    Err(_) => return false,
                }
            }
            AdType::Uuid32Incomplete | AdType::Uuid32Complete => {
                match combinator::complete(multi::many0(Uuid32::parse_le))(payload) {
                    Ok((_rest, uuids)) => uuids.into_iter().for_each(|u| self.add_service(u.into())),
                    Err(_) => return false,
                }
            }
            AdType::Uuid128Incomplete | AdType::Uuid128Complete => {
                match combinator::complete(multi::many0(Uuid128::parse_le))(payload) {
                    Ok((_rest, uuids)) => uuids.into_iter().for_each(|u| self.add_service(u.into())),
                    Err(_) => return false,
                }
            }
            AdType::NameShort => {
                self.name_short = decode_name(payload);
                self.mask.set(EirDataField::NameShort);
            }
            AdType::NameComplete => {
                self.name = decode_name(payload);
                self.mask.set(EirDataField::Name);
            }
            AdType::TxPower => match payload.first() {
                Some(p) => self.set_tx_power(*p as i8),
                None => return false,
            },
            AdType::DeviceClass => {
                if payload.len() < 3 {
                    return false;
                }
                self.device_class =
                    payload[0] as u32 | (payload[1] as u32) << 8 | (payload[2] as u32) << 16;
                self.mask.set(EirDataField::DeviceClass);
            }
            AdType::HashC192 => match payload.try_into() {
                Ok(hash) => {
                    self.hash = hash;
                    self.mask.set(EirDataField::Hash);
                }
                Err(_) => return false,
            },
            AdType::RandomizerR192 => match payload.try_into() {
                Ok(randomizer) => {
                    self.randomizer = randomizer;
                    self.mask.set(EirDataField::Randomizer);
                }
                Err(_) => return false,
            },
            AdType::DeviceId => {
                let le_u16 = number::complete::le_u16::<_, nom::error::Error<_>>;
                let parsed = le_u16(payload).and_then(|(rest, source)| {
                    le_u16(rest).and_then(|(rest, vendor)| {
                        le_u16(rest).and_then(|(rest, product)| {
                            le_u16(rest).map(|(_, version)| (source, vendor, product, version))
                        })
                    })
                });
                match parsed {
                    Ok((source, vendor, product, version)) => {
                        self.did_source = source;
                        self.did_vendor = vendor;
                        self.did_product = product;
                        self.did_version = version;
                        self.mask.set(EirDataField::DeviceId);
                    }
                    Err(_) => return false,
                }
            }
            AdType::ServiceData16 => match Uuid16::parse_le(payload) {
                Ok((_service_data, uuid)) => self.add_service(uuid.into()),
                Err(_) => return false,
            },
            AdType::Appearance => {
                match number::complete::le_u16::<_, nom::error::Error<_>>(payload) {
                    Ok((_, appearance)) => {
                        self.appearance = appearance;
                        self.mask.set(EirDataField::Appearance);
                    }
                    Err(_) => return false,
                }
            }
            AdType::Manufacturer => match Uuid16::parse_le(payload) {
                Ok((data, company)) => {
                    self.manufacturer_data = Some(ManufacturerData {
                        company: u16::from_be_bytes(company.as_be_bytes()),
                        data: data.to_vec(),
                    });
                    self.mask.set(EirDataField::ManufacturerData);
                }
                Err(_) => return false,
            },
        }
        true
    }

    /// Parses an HCI `LE Advertising Report` payload (legacy framing) into
    /// one report per contained advertisement.
    ///
    /// Layout per report: event type, address type, address, data length,
    /// data, RSSI. A malformed tail truncates the result.
    pub fn read_ad_reports(data: &[u8], timestamp_ms: u64) -> Vec<EirReport> {
        let Some((&num_reports, mut rest)) = data.split_first() else {
            return Vec::new();
        };
        let mut reports = Vec::with_capacity(num_reports as usize);
        for _ in 0..num_reports {
            let parsed = legacy_report_header(rest)
                .and_then(|(after, header)| {
                    number::complete::i8(after).map(|(after, rssi)| (after, header, rssi))
                });
            let Ok((after, (evt_type, addr_type, addr, ad), rssi)) = parsed else {
                log::warn!("truncated LE advertising report after {} reports", reports.len());
                break;
            };
            let mut report = EirReport::new(EirSource::Ad, timestamp_ms);
            report.set_evt_type(evt_type);
            report.set_address(addr);
            report.set_address_type(le_address_type(addr_type));
            if rssi != 0x7f {
                report.set_rssi(rssi);
            }
            report.read_data(ad);
            reports.push(report);
            rest = after;
        }
        reports
    }

    /// Parses an HCI `LE Extended Advertising Report` payload into one report
    /// per contained advertisement.
    pub fn read_ext_ad_reports(data: &[u8], timestamp_ms: u64) -> Vec<EirReport> {
        let Some((&num_reports, mut rest)) = data.split_first() else {
            return Vec::new();
        };
        let mut reports = Vec::with_capacity(num_reports as usize);
        for _ in 0..num_reports {
            let Ok((after, parsed)) = extended_report(rest) else {
                log::warn!(
                    "truncated LE extended advertising report after {} reports",
                    reports.len()
                );
                break;
            };
            let (evt_type, addr_type, addr, tx_power, rssi, ad) = parsed;
            let mut report = EirReport::new(EirSource::Ad, timestamp_ms);
            report.set_evt_type(evt_type as u8);
            report.set_address(addr);
            report.set_address_type(le_address_type(addr_type));
            if rssi != 0x7f {
                report.set_rssi(rssi);
            }
            if tx_power != 0x7f {
                report.set_tx_power(tx_power);
            }
            report.read_data(ad);
            reports.push(report);
            rest = after;
        }
        reports
    }
}

/// Names are zero-padded on the wire; anything past the first NUL is dropped.
fn decode_name(payload: &[u8]) -> String {
    let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Maps an HCI LE address type code (Vol 4 Part E) to an [AddressType].
fn le_address_type(code: u8) -> AddressType {
    match code {
        0x00 | 0x02 => AddressType::LePublic,
        0x01 | 0x03 => AddressType::LeRandom,
        _ => AddressType::Undefined,
    }
}

type LegacyHeader<'a> = (u8, u8, Address, &'a [u8]);

fn legacy_report_header(input: &[u8]) -> nom::IResult<&[u8], LegacyHeader<'_>> {
    let (input, evt_type) = number::complete::u8(input)?;
    let (input, addr_type) = number::complete::u8(input)?;
    let (input, addr) = parse_address(input)?;
    let (input, ad) = multi::length_data(number::complete::u8)(input)?;
    Ok((input, (evt_type, addr_type, addr, ad)))
}

type ExtendedReport<'a> = (u16, u8, Address, i8, i8, &'a [u8]);

fn extended_report(input: &[u8]) -> nom::IResult<&[u8], ExtendedReport<'_>> {
    let (input, evt_type) = number::complete::le_u16(input)?;
    let (input, addr_type) = number::complete::u8(input)?;
    let (input, addr) = parse_address(input)?;
    // primary PHY, secondary PHY, advertising SID
    let (input, _) = nom::bytes::complete::take(3_usize)(input)?;
    let (input, tx_power) = number::complete::i8(input)?;
    let (input, rssi) = number::complete::i8(input)?;
    // periodic advertising interval, direct address type, direct address
    let (input, _) = nom::bytes::complete::take(9_usize)(input)?;
    let (input, ad) = multi::length_data(number::complete::u8)(input)?;
    Ok((input, (evt_type, addr_type, addr, tx_power, rssi, ad)))
}

pub(crate) fn parse_address(input: &[u8]) -> nom::IResult<&[u8], Address> {
    combinator::map_res(nom::bytes::complete::take(6_usize), |b: &[u8]| {
        b.try_into().map(Address::from_le_bytes)
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_complete_name() {
        // Flags 0x06 plus complete name "Test"; the trailing 0x00 terminates.
        let data = [0x02, 0x01, 0x06, 0x05, 0x09, 0x54, 0x65, 0x73, 0x74, 0x00];
        let mut report = EirReport::new(EirSource::Ad, 0);
        assert_eq!(2, report.read_data(&data));
        assert_eq!(0x06, report.flags());
        assert_eq!("Test", report.name());
        assert!(report.is_set(EirDataField::Flags));
        assert!(report.is_set(EirDataField::Name));
        assert!(!report.is_set(EirDataField::NameShort));
    }

    #[test]
    fn zero_padded_tail_yields_prefix_of_report_set() {
        let full = [0x02, 0x01, 0x06, 0x05, 0x09, 0x54, 0x65, 0x73, 0x74];
        let mut truncated = full;
        truncated[3] = 0x00;

        let mut full_report = EirReport::new(EirSource::Ad, 0);
        full_report.read_data(&full);
        let mut short_report = EirReport::new(EirSource::Ad, 0);
        short_report.read_data(&truncated);

        assert!(short_report.is_set(EirDataField::Flags));
        assert!(!short_report.is_set(EirDataField::Name));
        assert_eq!(full_report.flags(), short_report.flags());
    }

    #[test]
    fn unknown_types_are_skipped() {
        // URI record (0x24) is not extracted, but the following tx-power is.
        let data = [0x03, 0x24, 0x16, 0x2F, 0x02, 0x0A, 0xF4];
        let mut report = EirReport::new(EirSource::Eir, 0);
        assert_eq!(1, report.read_data(&data));
        assert_eq!(-12, report.tx_power());
    }

    #[test]
    fn overrunning_length_stops_decoding() {
        let data = [0x02, 0x01, 0x06, 0x30, 0x09, 0x54];
        let mut report = EirReport::new(EirSource::Ad, 0);
        assert_eq!(1, report.read_data(&data));
        assert!(report.is_set(EirDataField::Flags));
        assert!(!report.is_set(EirDataField::Name));
    }

    #[test]
    fn short_record_is_skipped_but_following_records_parse() {
        // Manufacturer data with a one-byte payload cannot hold a company id;
        // the name record after it must still be extracted.
        let data = [0x02, 0xFF, 0x4C, 0x03, 0x08, 0x41, 0x42];
        let mut report = EirReport::new(EirSource::Ad, 0);
        assert_eq!(1, report.read_data(&data));
        assert!(report.manufacturer_data().is_none());
        assert_eq!("AB", report.name_short());
    }

    #[test]
    fn uuid_lists_deduplicate() {
        let data = [
            0x05, 0x02, 0x0D, 0x18, 0x0D, 0x18, // 16-bit list with duplicate 0x180D
            0x03, 0x03, 0x0F, 0x18, // complete list adds 0x180F
        ];
        let mut report = EirReport::new(EirSource::Ad, 0);
        assert_eq!(2, report.read_data(&data));
        assert_eq!(
            vec![
                Uuid::from(Uuid16::from(0x180D_u16)),
                Uuid::from(Uuid16::from(0x180F_u16))
            ],
            report.services().to_vec()
        );
    }

    #[test]
    fn manufacturer_data_company_is_little_endian() {
        let data = [0x05, 0xFF, 0x4C, 0x00, 0xAA, 0xBB];
        let mut report = EirReport::new(EirSource::Ad, 0);
        report.read_data(&data);
        let msd = report.manufacturer_data().unwrap();
        assert_eq!(0x004C, msd.company);
        assert_eq!(vec![0xAA, 0xBB], msd.data);
    }

    #[test]
    fn legacy_ad_report_parses_all_fields() {
        let data = [
            0x01, // one report
            0x00, // ADV_IND
            0x01, // random address
            0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0, // address, little-endian
            0x03, // AD length
            0x02, 0x01, 0x06, // flags record
            0xC8, // RSSI -56
        ];
        let reports = EirReport::read_ad_reports(&data, 42);
        assert_eq!(1, reports.len());
        let report = &reports[0];
        assert_eq!("C0:26:DA:01:DA:B1", report.address().to_string());
        assert_eq!(AddressType::LeRandom, report.address_type());
        assert_eq!(-56, report.rssi());
        assert_eq!(0x06, report.flags());
        assert_eq!(42, report.timestamp_ms());
        assert_eq!(EirSource::Ad, report.source());
    }

    #[test]
    fn truncated_second_report_keeps_first() {
        let data = [
            0x02, // claims two reports
            0x00, 0x00, 0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0, 0x00, 0xC8, // complete, no AD
            0x00, 0x01, // second report cut short
        ];
        let reports = EirReport::read_ad_reports(&data, 0);
        assert_eq!(1, reports.len());
        assert_eq!(AddressType::LePublic, reports[0].address_type());
    }
}
