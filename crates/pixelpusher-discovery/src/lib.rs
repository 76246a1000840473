//! PixelPusher Discovery
//!
//! Runtime side of the PixelPusher protocol client:
//! - Live device registry fed by UDP broadcast discovery ([`PusherRegistry`])
//! - One paced streaming task per discovered device ([`PixelPusher`])
//! - Per-output pixel buffers the rendering side writes into ([`Strip`])
//!
//! ```no_run
//! use pixelpusher_discovery::{PusherRegistry, RegistryConfig};
//!
//! # async fn demo() -> pixelpusher_discovery::Result<()> {
//! let registry = PusherRegistry::bind(RegistryConfig::default()).await?;
//! for pusher in registry.pushers() {
//!     pusher.set_strip(0, 255, 0, 0)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Wire-format types are re-exported from `pixelpusher-core`.

pub mod error;
pub mod pusher;
pub mod registry;
pub mod strip;

pub use error::{DiscoveryError, Result};
pub use pusher::{PixelPusher, Reconcile};
pub use registry::{PusherRegistry, RegistryConfig};
pub use strip::Strip;

pub use pixelpusher_core::{DeviceHeader, DeviceType, Pixel, PusherCapabilities};
