//! PixelPusher Core
//!
//! Wire-format layer for the PixelPusher LED-controller protocol.
//!
//! This crate provides:
//! - Discovery header decoding ([`DeviceHeader`], [`DeviceType`])
//! - Capability remainder decoding ([`PusherCapabilities`])
//! - Outbound strip-packet encoding ([`packet`])
//! - The elementary pixel color record ([`Pixel`])
//!
//! No I/O happens here; the runtime side lives in `pixelpusher-discovery`.

pub mod capabilities;
mod cursor;
pub mod error;
pub mod header;
pub mod packet;
pub mod pixel;

pub use capabilities::PusherCapabilities;
pub use error::{Error, Result};
pub use header::{DeviceHeader, DeviceType};
pub use pixel::Pixel;

/// Length of the fixed discovery header preceding the device-specific remainder
pub const HEADER_LEN: usize = 24;

/// UDP port devices broadcast their discovery datagrams on
pub const DISCOVERY_PORT: u16 = 7331;

/// Data port used when a device's announcement predates the port field
pub const DEFAULT_PUSHER_PORT: u16 = 9897;

/// Oldest firmware revision this library is known to work with
pub const MIN_SOFTWARE_REVISION: u16 = 100;
