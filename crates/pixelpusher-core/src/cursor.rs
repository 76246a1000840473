//! Length-checked reader for the capability remainder
//!
//! Devices running old firmware truncate the remainder after the Art-Net
//! fields, so every optional read has to be guarded by both the announced
//! software revision and the bytes actually left in the datagram. The cursor
//! keeps those guards in one place instead of scattering offset arithmetic.

/// Cursor over a byte slice with remaining-length tracking.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub(crate) fn read_u16_le(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume `len` bytes, or `None` without advancing if fewer remain.
    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    /// Skip up to `len` bytes; used for reserved gaps in newer announcements.
    pub(crate) fn skip(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.buf.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut cur = Cursor::new(&data);

        assert_eq!(cur.read_u8(), Some(0x01));
        assert_eq!(cur.read_u16_le(), Some(0x0302));
        assert_eq!(cur.read_u32_le(), Some(0x07060504));
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_short_read_does_not_advance() {
        let data = [0x01, 0x02];
        let mut cur = Cursor::new(&data);

        assert_eq!(cur.read_u32_le(), None);
        assert_eq!(cur.remaining(), 2);
        assert_eq!(cur.read_u16_le(), Some(0x0201));
    }

    #[test]
    fn test_skip_clamps_to_end() {
        let data = [0u8; 4];
        let mut cur = Cursor::new(&data);

        cur.skip(100);
        assert_eq!(cur.remaining(), 0);
        assert_eq!(cur.read_u8(), None);
    }
}
