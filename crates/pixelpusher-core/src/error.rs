//! Error types for the wire-format layer

use thiserror::Error;

/// Result type alias for wire-format operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-format error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Datagram shorter than the structure being decoded
    #[error("malformed header: need {needed} bytes, have {have}")]
    MalformedHeader { needed: usize, have: usize },

    /// Device type byte this library does not stream to
    #[error("unsupported device type: 0x{0:02x}")]
    UnsupportedDeviceType(u8),
}
