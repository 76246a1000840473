//! Discovery error types

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] pixelpusher_core::Error),

    /// Pixel write past the end of a strip
    #[error("pixel index {index} out of range for strip of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Bulk pixel assignment whose length does not match the strip
    #[error("pixel buffer length mismatch: strip holds {expected}, got {actual}")]
    BufferLengthMismatch { expected: usize, actual: usize },
}
