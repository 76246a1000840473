//! Outbound pixel-data packet encoding
//!
//! Pixel data packet format (sent to the device's data port):
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Bytes 0-3: Packet sequence number (uint32 big-endian)  │
//! ├────────────────────────────────────────────────────────┤
//! │ Repeated, up to max-strips-per-packet times:           │
//! │   2 bytes:  Strip index (uint16 big-endian)            │
//! │   3×pixels: Serialized RGB strip data                  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Note the asymmetry with discovery: devices announce themselves in
//! little-endian, but consume pixel packets in network byte order.

use bytes::{BufMut, Bytes, BytesMut};

/// Assembles pixel-data packets for one device's send loop.
///
/// The sequence number is owned here and advances once per
/// [`finish`](PacketBuilder::finish), never on an empty packet.
#[derive(Debug)]
pub struct PacketBuilder {
    sequence: u32,
    buf: BytesMut,
    strips: usize,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self {
            sequence: 0,
            buf: BytesMut::new(),
            strips: 0,
        }
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Number of strips queued in the packet under construction.
    pub fn pending_strips(&self) -> usize {
        self.strips
    }

    /// Append one strip's serialized pixel data to the current packet.
    pub fn push_strip(&mut self, strip_index: u16, data: &[u8]) {
        if self.strips == 0 {
            self.buf.put_u32(self.sequence);
        }
        self.buf.put_u16(strip_index);
        self.buf.extend_from_slice(data);
        self.strips += 1;
    }

    /// Take the assembled packet and advance the sequence number.
    ///
    /// Returns `None` when no strip was pushed since the last finish; a
    /// sequence number is never spent on an empty packet.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.strips == 0 {
            return None;
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.strips = 0;
        Some(self.buf.split().freeze())
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}
