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

//! Core GATT types: services, characteristics, descriptors and the
//! notification/indication listener surface.

use crate::core::{Uuid, Uuid16};
use std::ops;
use std::sync::Arc;
use strum::IntoEnumIterator;

pub mod client;

/// Well-known 16-bit GATT UUIDs used by the client engine.
#[allow(missing_docs)]
pub mod uuids {
    use crate::core::Uuid16;

    pub const PRIMARY_SERVICE: Uuid16 = Uuid16::from_be_bytes([0x28, 0x00]);
    pub const SECONDARY_SERVICE: Uuid16 = Uuid16::from_be_bytes([0x28, 0x01]);
    pub const CHARACTERISTIC: Uuid16 = Uuid16::from_be_bytes([0x28, 0x03]);
    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid16 = Uuid16::from_be_bytes([0x29, 0x01]);
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = Uuid16::from_be_bytes([0x29, 0x02]);
    pub const GENERIC_ACCESS_SERVICE: Uuid16 = Uuid16::from_be_bytes([0x18, 0x00]);
    pub const DEVICE_NAME: Uuid16 = Uuid16::from_be_bytes([0x2A, 0x00]);
    pub const APPEARANCE: Uuid16 = Uuid16::from_be_bytes([0x2A, 0x01]);
}

/// Combined properties of a GATT characteristic.
/// See [CharacteristicProperty] for the individual bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProperties {
    /// Bit vector of properties `OR`d together.
    pub(crate) bits: u8,
}

impl CharacteristicProperties {
    /// Wraps the raw declaration byte.
    pub fn from_bits(bits: u8) -> CharacteristicProperties {
        CharacteristicProperties { bits }
    }

    /// Returns an iterator over the individual properties set.
    pub fn iter(&self) -> impl Iterator<Item = CharacteristicProperty> + '_ {
        CharacteristicProperty::iter().filter(|p| self.has_property(*p))
    }

    /// Returns true iff the specified property is set.
    pub fn has_property(&self, p: CharacteristicProperty) -> bool {
        self.bits & p.as_bit_mask() > 0
    }
}

impl From<CharacteristicProperty> for CharacteristicProperties {
    fn from(value: CharacteristicProperty) -> Self {
        Self {
            bits: value.as_bit_mask(),
        }
    }
}

impl ops::BitOr<CharacteristicProperty> for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: CharacteristicProperty) -> Self::Output {
        Self {
            bits: self.bits | rhs.as_bit_mask(),
        }
    }
}

impl ops::BitOrAssign<CharacteristicProperty> for CharacteristicProperties {
    fn bitor_assign(&mut self, rhs: CharacteristicProperty) {
        self.bits |= rhs.as_bit_mask()
    }
}

/// Individual operations permitted on a characteristic value, Vol 3 Part G
/// 3.3.1.1. Combined into [CharacteristicProperties].
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, strum_macros::EnumIter)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthnSignedWrites,
    ExtendedProps,
}

impl CharacteristicProperty {
    /// Returns the assigned bit for the property.
    fn as_bit_mask(&self) -> u8 {
        match self {
            CharacteristicProperty::Broadcast => 0x01,
            CharacteristicProperty::Read => 0x02,
            CharacteristicProperty::WriteWithoutResponse => 0x04,
            CharacteristicProperty::Write => 0x08,
            CharacteristicProperty::Notify => 0x10,
            CharacteristicProperty::Indicate => 0x20,
            CharacteristicProperty::AuthnSignedWrites => 0x40,
            CharacteristicProperty::ExtendedProps => 0x80,
        }
    }
}

impl ops::BitOr for CharacteristicProperty {
    type Output = CharacteristicProperties;

    fn bitor(self, rhs: Self) -> Self::Output {
        CharacteristicProperties::from(self) | rhs
    }
}

/// Client Characteristic Configuration value: two little-endian bytes where
/// bit 0 enables notifications and bit 1 enables indications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CccdValue {
    /// Notifications enabled.
    pub notify: bool,
    /// Indications enabled.
    pub indicate: bool,
}

impl CccdValue {
    /// The wire form written to the descriptor.
    pub fn to_bytes(self) -> [u8; 2] {
        [(self.indicate as u8) << 1 | self.notify as u8, 0x00]
    }

    /// Decodes the wire form; extra bytes are ignored, missing bytes read as
    /// disabled.
    pub fn from_bytes(value: &[u8]) -> CccdValue {
        let bits = value.first().copied().unwrap_or(0);
        CccdValue {
            notify: bits & 0x01 != 0,
            indicate: bits & 0x02 != 0,
        }
    }
}

/// A discovered GATT descriptor.
#[derive(Debug, Clone)]
pub struct GattDescriptor {
    /// Attribute handle.
    pub handle: u16,
    /// Descriptor type.
    pub uuid: Uuid,
    /// Last value read or written, empty until touched.
    pub value: Vec<u8>,
}

/// A discovered GATT characteristic with its descriptors.
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    /// Handle of the characteristic declaration.
    pub decl_handle: u16,
    /// Handle of the characteristic value attribute.
    pub value_handle: u16,
    /// Last attribute handle belonging to this characteristic.
    pub end_handle: u16,
    /// Permitted operations.
    pub properties: CharacteristicProperties,
    /// Value type.
    pub uuid: Uuid,
    /// Descriptors in handle order.
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    /// The Client Characteristic Configuration descriptor, when present.
    pub fn cccd(&self) -> Option<&GattDescriptor> {
        self.find_descriptor(uuids::CLIENT_CHARACTERISTIC_CONFIGURATION)
    }

    /// The User Description descriptor, when present.
    pub fn user_description(&self) -> Option<&GattDescriptor> {
        self.find_descriptor(uuids::CHARACTERISTIC_USER_DESCRIPTION)
    }

    fn find_descriptor(&self, uuid: Uuid16) -> Option<&GattDescriptor> {
        let uuid = Uuid::from(uuid);
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

/// A discovered primary service with its characteristics.
#[derive(Debug, Clone)]
pub struct GattService {
    /// First attribute handle of the service.
    pub start_handle: u16,
    /// Last attribute handle of the service.
    pub end_handle: u16,
    /// Service type.
    pub uuid: Uuid,
    /// Characteristics in declaration order.
    pub characteristics: Vec<Arc<GattCharacteristic>>,
}

impl GattService {
    /// Finds a characteristic by value type.
    pub fn find_characteristic(&self, uuid: Uuid) -> Option<&Arc<GattCharacteristic>> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Device name and appearance read from the Generic Access service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericAccess {
    /// `Device Name` characteristic value.
    pub device_name: String,
    /// `Appearance` characteristic value.
    pub appearance: u16,
}

/// Receiver of characteristic value notifications and indications.
///
/// Invoked on the per-device receive thread; implementations must not block
/// and must not issue ATT requests from the callback. Panics are caught and
/// logged without interrupting other listeners.
pub trait CharacteristicListener: Send + Sync {
    /// An unconfirmed `Handle Value Notification` arrived.
    fn notification_received(
        &self,
        characteristic: &Arc<GattCharacteristic>,
        value: &[u8],
        timestamp_ms: u64,
    ) {
        let _ = (characteristic, value, timestamp_ms);
    }

    /// A `Handle Value Indication` arrived; `confirmation_sent` tells whether
    /// the confirmation already went out.
    fn indication_received(
        &self,
        characteristic: &Arc<GattCharacteristic>,
        value: &[u8],
        timestamp_ms: u64,
        confirmation_sent: bool,
    ) {
        let _ = (characteristic, value, timestamp_ms, confirmation_sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_into_properties_works() {
        let props = CharacteristicProperty::Indicate | CharacteristicProperty::Read;
        assert!(props.has_property(CharacteristicProperty::Indicate));
        assert!(props.has_property(CharacteristicProperty::Read));
        assert!(!props.has_property(CharacteristicProperty::Notify));
    }

    #[test]
    fn properties_from_declaration_byte() {
        let props = CharacteristicProperties::from_bits(0x1A);
        let set: Vec<_> = props.iter().collect();
        assert_eq!(
            vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Write,
                CharacteristicProperty::Notify
            ],
            set
        );
    }

    #[test]
    fn cccd_roundtrip() {
        for (notify, indicate) in [(false, false), (true, false), (false, true), (true, true)] {
            let value = CccdValue { notify, indicate };
            let decoded = CccdValue::from_bytes(&value.to_bytes());
            assert_eq!(value, decoded);
        }
        assert_eq!([0x03, 0x00], CccdValue { notify: true, indicate: true }.to_bytes());
    }

    #[test]
    fn cccd_finder_by_well_known_uuid() {
        let characteristic = GattCharacteristic {
            decl_handle: 0x0010,
            value_handle: 0x0011,
            end_handle: 0x0013,
            properties: CharacteristicProperty::Notify.into(),
            uuid: Uuid16::from(0x2A37_u16).into(),
            descriptors: vec![
                GattDescriptor {
                    handle: 0x0012,
                    uuid: Uuid16::from(0x2902_u16).into(),
                    value: Vec::new(),
                },
                GattDescriptor {
                    handle: 0x0013,
                    uuid: Uuid16::from(0x2901_u16).into(),
                    value: Vec::new(),
                },
            ],
        };
        assert_eq!(0x0012, characteristic.cccd().unwrap().handle);
        assert_eq!(0x0013, characteristic.user_description().unwrap().handle);
    }
}
