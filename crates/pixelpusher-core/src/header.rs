//! Discovery header decoding
//!
//! Every device on the network broadcasts a discovery datagram once a
//! second. The first 24 bytes identify the device; everything after is a
//! device-type-specific remainder (for PixelPushers, the capability block
//! decoded by [`crate::capabilities`]).
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ Bytes 0-5:   MAC address                              │
//! │ Bytes 6-9:   IPv4 address                             │
//! │ Byte  10:    Device type                              │
//! │ Byte  11:    Protocol version                         │
//! │ Bytes 12-13: Vendor ID (uint16 little-endian)         │
//! │ Bytes 14-15: Product ID (uint16 little-endian)        │
//! │ Bytes 16-17: Hardware revision (uint16 little-endian) │
//! │ Bytes 18-19: Software revision (uint16 little-endian) │
//! │ Bytes 20-23: Link speed (uint32 little-endian)        │
//! ├───────────────────────────────────────────────────────┤
//! │ Bytes 24..:  Device-specific remainder                │
//! └───────────────────────────────────────────────────────┘
//! ```

use std::net::Ipv4Addr;

use bytes::Bytes;
use tracing::warn;

use crate::error::{Error, Result};
use crate::{HEADER_LEN, MIN_SOFTWARE_REVISION};

/// Device type byte of a discovery datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    EtherDream,
    LumiaBridge,
    PixelPusher,
    /// Anything this library does not recognize; carried so callers can log it
    Unknown(u8),
}

impl DeviceType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => DeviceType::EtherDream,
            1 => DeviceType::LumiaBridge,
            2 => DeviceType::PixelPusher,
            other => DeviceType::Unknown(other),
        }
    }
}

/// Identity block decoded from one discovery datagram
#[derive(Debug, Clone)]
pub struct DeviceHeader {
    pub mac_address: [u8; 6],
    pub ip_address: [u8; 4],
    pub device_type: DeviceType,
    pub protocol_version: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub hardware_revision: u16,
    pub software_revision: u16,
    pub link_speed: u32,
    /// Device-specific bytes following the fixed header
    pub remainder: Bytes,
}

impl DeviceHeader {
    /// Decode a discovery datagram.
    ///
    /// Datagrams shorter than the 24-byte header are rejected with
    /// [`Error::MalformedHeader`]. Firmware older than
    /// [`MIN_SOFTWARE_REVISION`] still decodes, but is logged and reported
    /// by [`DeviceHeader::firmware_supported`].
    pub fn decode(packet: &[u8]) -> Result<Self> {
        if packet.len() < HEADER_LEN {
            return Err(Error::MalformedHeader {
                needed: HEADER_LEN,
                have: packet.len(),
            });
        }

        let mut mac_address = [0u8; 6];
        mac_address.copy_from_slice(&packet[0..6]);
        let mut ip_address = [0u8; 4];
        ip_address.copy_from_slice(&packet[6..10]);

        let header = Self {
            mac_address,
            ip_address,
            device_type: DeviceType::from_byte(packet[10]),
            protocol_version: packet[11],
            vendor_id: u16::from_le_bytes([packet[12], packet[13]]),
            product_id: u16::from_le_bytes([packet[14], packet[15]]),
            hardware_revision: u16::from_le_bytes([packet[16], packet[17]]),
            software_revision: u16::from_le_bytes([packet[18], packet[19]]),
            link_speed: u32::from_le_bytes([packet[20], packet[21], packet[22], packet[23]]),
            remainder: Bytes::copy_from_slice(&packet[HEADER_LEN..]),
        };

        if !header.firmware_supported() {
            warn!(
                "device {} reports firmware {:.2}, this library requires {:.2} or newer",
                header.mac_string(),
                header.software_revision as f64 / 100.0,
                MIN_SOFTWARE_REVISION as f64 / 100.0,
            );
        }

        Ok(header)
    }

    /// Colon-separated hex MAC, e.g. `AA:BB:CC:DD:EE:FF`
    pub fn mac_string(&self) -> String {
        let m = &self.mac_address;
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }

    /// Dotted-decimal IPv4, e.g. `192.168.1.20`
    pub fn ip_string(&self) -> String {
        self.ipv4().to_string()
    }

    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_address)
    }

    /// True when the announced address is in the IPv4 multicast range
    pub fn is_multicast(&self) -> bool {
        (224..=239).contains(&self.ip_address[0])
    }

    /// False when the device firmware predates what this library supports
    pub fn firmware_supported(&self) -> bool {
        self.software_revision >= MIN_SOFTWARE_REVISION
    }
}
