//! Capability block decoding
//!
//! A PixelPusher's discovery remainder describes what the device can do and
//! how it is keeping up:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Byte  0:     Strips attached                               │
//! │ Byte  1:     Max strips per packet                         │
//! │ Bytes 2-3:   Pixels per strip (uint16 little-endian)       │
//! │ Bytes 4-7:   Update period µs (uint32 little-endian)       │
//! │ Bytes 8-11:  Power total (uint32 little-endian)            │
//! │ Bytes 12-15: Delta sequence (uint32 little-endian)         │
//! │ Bytes 16-19: Controller ID (uint32 little-endian)          │
//! │ Bytes 20-23: Group ID (uint32 little-endian)               │
//! │ Bytes 24-25: Art-Net universe (uint16 little-endian)       │
//! │ Bytes 26-27: Art-Net channel (uint16 little-endian)        │
//! ├────────────────────────────────────────────────────────────┤
//! │ Firmware > 1.00:  Bytes 28-29 data port                    │
//! │ Firmware > 1.08:  max(strips, 8) strip-flag bytes,         │
//! │                   2 reserved bytes, then pusher flags,     │
//! │                   segments, power domain (uint32 each)     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Older firmware simply stops sending at whatever field it predates, so
//! each optional read is gated on both the announced revision and the bytes
//! actually remaining.

use bytes::Buf;

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::header::DeviceHeader;
use crate::DEFAULT_PUSHER_PORT;

/// Remainder bytes every firmware revision sends
pub const CAPABILITIES_MIN_LEN: usize = 28;

/// Firmware revisions newer than this announce their data port
pub const PORT_FIELD_REVISION: u16 = 100;

/// Firmware revisions newer than this announce strip flags, pusher flags,
/// segments, and power domain
pub const FLAGS_FIELD_REVISION: u16 = 108;

/// Decoded capability state of one PixelPusher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherCapabilities {
    pub strips_attached: u8,
    pub max_strips_per_packet: u8,
    pub pixels_per_strip: u16,
    /// Microseconds the device reports needing between updates
    pub update_period: u32,
    pub power_total: u32,
    /// Packets the device failed to process in time; congestion signal
    pub delta_sequence: u32,
    pub controller_id: u32,
    pub group_id: u32,
    pub artnet_universe: u16,
    pub artnet_channel: u16,
    /// UDP port pixel data is sent to
    pub port: u16,
    /// One flag byte per strip, at least 8 entries
    pub strip_flags: Vec<u8>,
    pub pusher_flags: u32,
    pub segments: u32,
    pub power_domain: u32,
}

impl PusherCapabilities {
    /// Decode the capability block from a device header's remainder.
    pub fn decode(header: &DeviceHeader) -> Result<Self> {
        Self::decode_remainder(&header.remainder, header.software_revision)
    }

    /// Decode a raw remainder given the announcing firmware revision.
    pub fn decode_remainder(remainder: &[u8], software_revision: u16) -> Result<Self> {
        if remainder.len() < CAPABILITIES_MIN_LEN {
            return Err(Error::MalformedHeader {
                needed: CAPABILITIES_MIN_LEN,
                have: remainder.len(),
            });
        }

        let mut buf = remainder;
        let strips_attached = buf.get_u8();
        let max_strips_per_packet = buf.get_u8();
        let pixels_per_strip = buf.get_u16_le();
        let update_period = buf.get_u32_le();
        let power_total = buf.get_u32_le();
        let delta_sequence = buf.get_u32_le();
        let controller_id = buf.get_u32_le();
        let group_id = buf.get_u32_le();
        let artnet_universe = buf.get_u16_le();
        let artnet_channel = buf.get_u16_le();

        // everything past here is optional and gated on firmware revision
        let mut cur = Cursor::new(buf);

        let port = if software_revision > PORT_FIELD_REVISION {
            cur.read_u16_le().unwrap_or(DEFAULT_PUSHER_PORT)
        } else {
            DEFAULT_PUSHER_PORT
        };

        let strip_flag_len = (strips_attached as usize).max(8);
        let mut strip_flags = vec![0u8; strip_flag_len];
        let mut pusher_flags = 0;
        let mut segments = 0;
        let mut power_domain = 0;

        if software_revision > FLAGS_FIELD_REVISION {
            if let Some(flags) = cur.take(strip_flag_len) {
                strip_flags.copy_from_slice(flags);
            }
            // two reserved bytes between the strip flags and the pusher flags
            cur.skip(2);
            if let Some(flags) = cur.read_u32_le() {
                pusher_flags = flags;
            }
            if let Some(segs) = cur.read_u32_le() {
                segments = segs;
            }
            if let Some(domain) = cur.read_u32_le() {
                power_domain = domain;
            }
        }

        Ok(Self {
            strips_attached,
            max_strips_per_packet,
            pixels_per_strip,
            update_period,
            power_total,
            delta_sequence,
            controller_id,
            group_id,
            artnet_universe,
            artnet_channel,
            port,
            strip_flags,
            pusher_flags,
            segments,
            power_domain,
        })
    }

    /// Whether two announcements describe the same logical configuration.
    ///
    /// Update period and power total jitter between heartbeats, so those
    /// compare within a tolerance; everything else must match exactly.
    /// A mismatch means the caller must [`replace_from`](Self::replace_from)
    /// rather than [`refresh_from`](Self::refresh_from).
    pub fn matches(&self, other: &Self) -> bool {
        if self.update_period.abs_diff(other.update_period) > 500 {
            return false;
        }
        if self.strips_attached != other.strips_attached {
            return false;
        }
        if self.artnet_channel != other.artnet_channel
            || self.artnet_universe != other.artnet_universe
        {
            return false;
        }
        if self.port != other.port {
            return false;
        }
        if self.group_id != other.group_id {
            return false;
        }
        if self.power_total.abs_diff(other.power_total) > 10_000 {
            return false;
        }
        if self.power_domain != other.power_domain {
            return false;
        }
        if self.segments != other.segments {
            return false;
        }
        if self.pusher_flags != other.pusher_flags {
            return false;
        }
        true
    }

    /// Overwrite routing and capability fields from a newer announcement.
    pub fn replace_from(&mut self, other: &Self) {
        self.controller_id = other.controller_id;
        self.delta_sequence = other.delta_sequence;
        self.group_id = other.group_id;
        self.max_strips_per_packet = other.max_strips_per_packet;
        self.power_total = other.power_total;
        self.update_period = other.update_period;
        self.artnet_channel = other.artnet_channel;
        self.artnet_universe = other.artnet_universe;
        self.port = other.port;
        self.pusher_flags = other.pusher_flags;
        self.power_domain = other.power_domain;
    }

    /// Overwrite only the per-heartbeat counters from a matching announcement.
    pub fn refresh_from(&mut self, other: &Self) {
        self.delta_sequence = other.delta_sequence;
        self.max_strips_per_packet = other.max_strips_per_packet;
        self.power_total = other.power_total;
        self.update_period = other.update_period;
    }
}
