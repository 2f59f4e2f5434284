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

//! Bluetooth device addresses (EUI-48) and their type tags.

use std::{fmt, str::FromStr};

/// The any-device placeholder address, `00:00:00:00:00:00`.
pub const ANY: Address = Address {
    inner: [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
};

/// 48-bit address of a Bluetooth device.
///
/// Stored in little-endian wire order; displayed big-endian colon-separated.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Little-endian.
    inner: [u8; 6],
}

impl Address {
    /// Builds an `Address` from little-endian bytes, as found on the wire.
    pub const fn from_le_bytes(bytes: [u8; 6]) -> Address {
        Address { inner: bytes }
    }

    /// Builds an `Address` from big-endian bytes, as written by humans.
    pub const fn from_be_bytes(bytes: [u8; 6]) -> Address {
        Address {
            inner: [bytes[5], bytes[4], bytes[3], bytes[2], bytes[1], bytes[0]],
        }
    }

    /// The bytes in little-endian wire order.
    pub fn to_le_bytes(self) -> [u8; 6] {
        self.inner
    }

    /// The bytes in big-endian display order.
    pub fn to_be_bytes(self) -> [u8; 6] {
        let mut b = self.inner;
        b.reverse();
        b
    }

    /// The LE random-address sub-type, derived from the top two address bits.
    ///
    /// Only defined for [AddressType::LeRandom]; every other address type
    /// yields [RandomAddressType::Undefined].
    pub fn random_address_type(&self, address_type: AddressType) -> RandomAddressType {
        if address_type != AddressType::LeRandom {
            return RandomAddressType::Undefined;
        }
        match self.inner[5] >> 6 {
            0b11 => RandomAddressType::StaticPublic,
            0b01 => RandomAddressType::ResolvablePrivate,
            0b00 => RandomAddressType::UnresolvablePrivate,
            _ => RandomAddressType::Undefined,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.inner[5], self.inner[4], self.inner[3], self.inner[2], self.inner[1], self.inner[0]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0; 6];
        {
            let mut bytes = s.split(':');
            let mut out_iter = out.iter_mut();
            for (byte, o) in bytes.by_ref().zip(out_iter.by_ref()) {
                *o = u8::from_str_radix(byte, 16).map_err(|_| InvalidAddress)?;
            }
            if out_iter.next().is_some() || bytes.next().is_some() {
                return Err(InvalidAddress);
            }
        }
        Ok(Address::from_be_bytes(out))
    }
}

/// The input was not a colon-separated six-byte hex address.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid Bluetooth address")]
pub struct InvalidAddress;

/// Address type as used by the kernel management protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    /// BR/EDR (classic) public address.
    Bredr,
    /// LE public address.
    LePublic,
    /// LE random address; see [RandomAddressType] for its sub-type.
    LeRandom,
    /// Not (yet) known.
    Undefined,
}

impl AddressType {
    /// The MGMT/L2CAP wire code for this address type.
    pub fn code(self) -> u8 {
        match self {
            AddressType::Bredr => 0x00,
            AddressType::LePublic => 0x01,
            AddressType::LeRandom => 0x02,
            AddressType::Undefined => 0xff,
        }
    }

    /// Maps an MGMT/L2CAP wire code to an address type.
    pub fn from_code(code: u8) -> AddressType {
        match code {
            0x00 => AddressType::Bredr,
            0x01 => AddressType::LePublic,
            0x02 => AddressType::LeRandom,
            _ => AddressType::Undefined,
        }
    }

    /// True for the two LE address types.
    pub fn is_le(self) -> bool {
        matches!(self, AddressType::LePublic | AddressType::LeRandom)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Bredr => write!(f, "BR/EDR"),
            AddressType::LePublic => write!(f, "LE public"),
            AddressType::LeRandom => write!(f, "LE random"),
            AddressType::Undefined => write!(f, "undefined"),
        }
    }
}

/// Sub-type of an LE random address, Vol 6 Part B 1.3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RandomAddressType {
    /// Static device address, top bits `11`.
    StaticPublic,
    /// Resolvable private address, top bits `01`.
    ResolvablePrivate,
    /// Non-resolvable private address, top bits `00`.
    UnresolvablePrivate,
    /// Reserved bit pattern, or the address is not LE random at all.
    Undefined,
}

impl fmt::Display for RandomAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandomAddressType::StaticPublic => write!(f, "static public"),
            RandomAddressType::ResolvablePrivate => write!(f, "resolvable private"),
            RandomAddressType::UnresolvablePrivate => write!(f, "unresolvable private"),
            RandomAddressType::Undefined => write!(f, "undefined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_roundtrip() {
        let addr: Address = "C0:26:DA:01:DA:B1".parse().unwrap();
        assert_eq!("C0:26:DA:01:DA:B1", addr.to_string());
        assert_eq!([0xB1, 0xDA, 0x01, 0xDA, 0x26, 0xC0], addr.to_le_bytes());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(Err(InvalidAddress), "C0:26:DA:01:DA".parse::<Address>());
        assert_eq!(Err(InvalidAddress), "C0:26:DA:01:DA:B1:00".parse::<Address>());
        assert_eq!(Err(InvalidAddress), "C0:26:DA:01:DA:ZZ".parse::<Address>());
    }

    #[test]
    fn random_sub_type_from_top_bits() {
        let static_pub: Address = "C0:00:00:00:00:01".parse().unwrap();
        let resolvable: Address = "7F:00:00:00:00:01".parse().unwrap();
        let unresolvable: Address = "3F:00:00:00:00:01".parse().unwrap();
        let reserved: Address = "BF:00:00:00:00:01".parse().unwrap();

        assert_eq!(
            RandomAddressType::StaticPublic,
            static_pub.random_address_type(AddressType::LeRandom)
        );
        assert_eq!(
            RandomAddressType::ResolvablePrivate,
            resolvable.random_address_type(AddressType::LeRandom)
        );
        assert_eq!(
            RandomAddressType::UnresolvablePrivate,
            unresolvable.random_address_type(AddressType::LeRandom)
        );
        assert_eq!(
            RandomAddressType::Undefined,
            reserved.random_address_type(AddressType::LeRandom)
        );
        // The sub-type is only ever defined for LE random addresses.
        assert_eq!(
            RandomAddressType::Undefined,
            static_pub.random_address_type(AddressType::LePublic)
        );
    }
}
