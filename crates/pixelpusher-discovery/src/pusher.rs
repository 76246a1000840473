//! One discovered PixelPusher and its send loop
//!
//! A [`PixelPusher`] is created the first time a device's discovery
//! datagram is decoded and lives until the registry evicts it. It owns one
//! [`Strip`] per announced output plus the mutable capability state that
//! later heartbeats refresh or replace. While the session is registered, a
//! dedicated card task drains touched strips into pixel packets at a pace
//! derived from the device's announced update period.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pixelpusher_core::packet::PacketBuilder;
use pixelpusher_core::{DeviceHeader, Pixel, PusherCapabilities};

use crate::error::{DiscoveryError, Result};
use crate::strip::Strip;

/// How a heartbeat was applied to an existing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Same logical configuration; only counters were refreshed
    Refreshed,
    /// Materially different announcement; routing fields were replaced
    Replaced,
}

/// A live PixelPusher device session.
///
/// Identity is the colon-hex MAC string. Capability state sits behind a
/// lock so heartbeat updates are atomic with respect to the card task's
/// per-cycle snapshot.
pub struct PixelPusher {
    mac: String,
    ip: Ipv4Addr,
    header: DeviceHeader,
    caps: RwLock<PusherCapabilities>,
    strips: Vec<Arc<Strip>>,
    /// Congestion backoff, milliseconds
    extra_delay_ms: AtomicU64,
}

impl PixelPusher {
    /// Build a session from a decoded header and its capability block.
    ///
    /// Strips are sized here, once; later announcements never resize them.
    pub fn new(header: DeviceHeader, caps: PusherCapabilities) -> Self {
        let strips = (0..caps.strips_attached as u16)
            .map(|i| Arc::new(Strip::new(i, caps.pixels_per_strip as usize)))
            .collect();

        Self {
            mac: header.mac_string(),
            ip: header.ipv4(),
            header,
            caps: RwLock::new(caps),
            strips,
            extra_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Identity block from the discovery datagram that created the session.
    pub fn header(&self) -> &DeviceHeader {
        &self.header
    }

    /// Snapshot of the current capability state.
    pub fn capabilities(&self) -> PusherCapabilities {
        self.caps.read().clone()
    }

    pub fn group_id(&self) -> u32 {
        self.caps.read().group_id
    }

    pub fn controller_id(&self) -> u32 {
        self.caps.read().controller_id
    }

    /// Destination for pixel packets, from the announced IP and data port.
    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.caps.read().port))
    }

    pub fn strips(&self) -> &[Arc<Strip>] {
        &self.strips
    }

    pub fn strip(&self, number: usize) -> Option<&Arc<Strip>> {
        self.strips.get(number)
    }

    pub fn num_strips(&self) -> usize {
        self.strips.len()
    }

    /// Strips with writes pending since their last transmission.
    pub fn touched_strips(&self) -> Vec<Arc<Strip>> {
        self.strips
            .iter()
            .filter(|s| s.is_touched())
            .cloned()
            .collect()
    }

    /// Paint one strip a solid color.
    pub fn set_strip(&self, number: usize, red: u8, green: u8, blue: u8) -> Result<()> {
        let strip = self
            .strips
            .get(number)
            .ok_or(DiscoveryError::IndexOutOfRange {
                index: number,
                len: self.strips.len(),
            })?;
        strip.set_all(red, green, blue);
        Ok(())
    }

    /// Replace one strip's pixel buffer.
    pub fn set_strip_pixels(&self, number: usize, pixels: &[Pixel]) -> Result<()> {
        let strip = self
            .strips
            .get(number)
            .ok_or(DiscoveryError::IndexOutOfRange {
                index: number,
                len: self.strips.len(),
            })?;
        strip.set_pixels(pixels)
    }

    /// Accumulated congestion backoff in milliseconds.
    pub fn extra_delay_ms(&self) -> u64 {
        self.extra_delay_ms.load(Ordering::Relaxed)
    }

    pub fn increase_extra_delay(&self, ms: u64) {
        self.extra_delay_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Decrease the backoff, clamped at zero.
    pub fn decrease_extra_delay(&self, ms: u64) {
        let _ = self
            .extra_delay_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(ms))
            });
    }

    /// Apply a fresh announcement from this device.
    ///
    /// A matching announcement is the steady-state heartbeat: counters are
    /// refreshed and the delta-sequence congestion signal adjusts the extra
    /// delay (device falling behind: slow down by 5 ms; keeping up: speed
    /// up by 1 ms). A mismatch means the device was reconfigured and the
    /// routing fields are replaced wholesale.
    pub fn reconcile(&self, incoming: &PusherCapabilities) -> Reconcile {
        let mut caps = self.caps.write();
        if caps.matches(incoming) {
            caps.refresh_from(incoming);
            drop(caps);
            if incoming.delta_sequence > 3 {
                self.increase_extra_delay(5);
            }
            if incoming.delta_sequence < 1 {
                self.decrease_extra_delay(1);
            }
            Reconcile::Refreshed
        } else {
            caps.replace_from(incoming);
            Reconcile::Replaced
        }
    }
}

impl std::fmt::Debug for PixelPusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelPusher")
            .field("mac", &self.mac)
            .field("ip", &self.ip)
            .field("strips", &self.strips.len())
            .finish()
    }
}

/// Pacing inputs the card loop snapshots once per cycle
#[derive(Debug, Clone, Copy)]
pub(crate) struct CardConfig {
    pub frame_limit: u32,
    /// Registry-level delay added on top of the session's congestion backoff
    pub extra_delay_ms: u64,
}

/// Milliseconds to wait between packets for the given capability snapshot.
///
/// Three regimes: devices asking for a very long update period are paced at
/// a fixed 16 ms frame spread across their packets; devices with a concrete
/// period get that period plus one; everything else is driven by the frame
/// limit. The strips/max ratio spreads a frame's budget over the packets
/// needed to cover all strips, clamped so a device announcing fewer strips
/// than fit in one packet never slows below the base rate.
pub(crate) fn pacing_delay_ms(caps: &PusherCapabilities, frame_limit: u32) -> u64 {
    let ratio = (caps.strips_attached as f64 / caps.max_strips_per_packet.max(1) as f64).max(1.0);
    let ms = if caps.update_period > 100_000 {
        16.0 / ratio
    } else if caps.update_period > 1_000 {
        caps.update_period as f64 / 1000.0 + 1.0
    } else {
        (1000.0 / frame_limit.max(1) as f64) / ratio
    };
    ms as u64
}

/// Handle to one session's card task.
///
/// Spawned when the registry inserts the session, stopped and joined when
/// it is evicted. The task is cooperative: the stop flag is checked once
/// per outer iteration and every pacing sleep aborts early on stop.
pub(crate) struct CardWorker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CardWorker {
    pub(crate) fn spawn(pusher: Arc<PixelPusher>, config: CardConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(card_loop(pusher, config, stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the task and block until it has actually exited.
    ///
    /// After this returns, no further packet can be sent for the device.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("card task panicked: {}", e);
        }
    }
}

/// Sleep for the pacing delay unless stopped first. Returns true on stop.
async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *stop.borrow(),
        _ = stop.changed() => true,
    }
}

/// The per-device send loop.
///
/// Failures here are isolated to this device: a send error is logged and
/// the loop keeps going; a bind failure ends the task without touching any
/// other session.
async fn card_loop(pusher: Arc<PixelPusher>, config: CardConfig, mut stop: watch::Receiver<bool>) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            error!("failed to bind card socket for {}: {}", pusher.mac(), e);
            return;
        }
    };
    info!(
        "streaming to PixelPusher {} at {}",
        pusher.mac(),
        pusher.data_addr()
    );

    let mut builder = PacketBuilder::new();

    loop {
        if *stop.borrow() {
            break;
        }

        let caps = pusher.capabilities();
        let delay = pacing_delay_ms(&caps, config.frame_limit)
            + pusher.extra_delay_ms()
            + config.extra_delay_ms;
        let delay = Duration::from_millis(delay);

        let touched = pusher.touched_strips();
        if touched.is_empty() {
            if sleep_or_stop(delay, &mut stop).await {
                break;
            }
            continue;
        }

        let dest = SocketAddr::from((pusher.ip(), caps.port));
        let max_strips = caps.max_strips_per_packet.max(1) as usize;
        let mut stopped = false;

        for chunk in touched.chunks(max_strips) {
            for strip in chunk {
                let data = strip.serialize();
                builder.push_strip(strip.number(), &data);
            }
            if let Some(packet) = builder.finish() {
                debug!(
                    "sending {} bytes to PixelPusher {} at {}",
                    packet.len(),
                    pusher.mac(),
                    dest
                );
                if let Err(e) = socket.send_to(&packet, dest).await {
                    warn!("send to {} failed: {}", dest, e);
                }
            }
            if sleep_or_stop(delay, &mut stop).await {
                stopped = true;
                break;
            }
        }

        if stopped {
            break;
        }
    }

    debug!("card task for PixelPusher {} closed", pusher.mac());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelpusher_core::{DeviceType, HEADER_LEN};

    fn test_header() -> DeviceHeader {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0..6].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        buf[6..10].copy_from_slice(&[127, 0, 0, 1]);
        buf[10] = 2;
        buf[18..20].copy_from_slice(&121u16.to_le_bytes());
        DeviceHeader::decode(&buf).unwrap()
    }

    fn test_caps(update_period: u32) -> PusherCapabilities {
        let mut buf = Vec::new();
        buf.push(2u8);
        buf.push(4u8);
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&update_period.to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]);
        PusherCapabilities::decode_remainder(&buf, 121).unwrap()
    }

    #[test]
    fn test_strips_sized_from_announcement() {
        let pusher = PixelPusher::new(test_header(), test_caps(2000));

        assert_eq!(pusher.mac(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(pusher.num_strips(), 2);
        assert_eq!(pusher.strip(0).unwrap().len(), 3);
        assert!(pusher.strip(2).is_none());
    }

    #[test]
    fn test_device_type_decoded() {
        assert_eq!(test_header().device_type, DeviceType::PixelPusher);
    }

    #[test]
    fn test_congestion_backoff_adjustments() {
        let pusher = PixelPusher::new(test_header(), test_caps(2000));

        // device falling behind: +5 ms per heartbeat
        let mut behind = test_caps(2000);
        behind.delta_sequence = 5;
        assert_eq!(pusher.reconcile(&behind), Reconcile::Refreshed);
        assert_eq!(pusher.extra_delay_ms(), 5);
        pusher.reconcile(&behind);
        assert_eq!(pusher.extra_delay_ms(), 10);

        // device keeping up: -1 ms, clamped at zero
        let mut keeping_up = test_caps(2000);
        keeping_up.delta_sequence = 0;
        pusher.reconcile(&keeping_up);
        assert_eq!(pusher.extra_delay_ms(), 9);
        for _ in 0..20 {
            pusher.reconcile(&keeping_up);
        }
        assert_eq!(pusher.extra_delay_ms(), 0);
    }

    #[test]
    fn test_reconcile_replaces_on_mismatch() {
        let pusher = PixelPusher::new(test_header(), test_caps(2000));

        let mut reconfigured = test_caps(2000);
        reconfigured.group_id = 9;
        reconfigured.controller_id = 3;
        assert_eq!(pusher.reconcile(&reconfigured), Reconcile::Replaced);
        assert_eq!(pusher.group_id(), 9);
        assert_eq!(pusher.controller_id(), 3);
    }

    #[test]
    fn test_pacing_regimes() {
        // long update period: 16 ms spread over strips/max packets
        let mut caps = test_caps(200_000);
        assert_eq!(pacing_delay_ms(&caps, 60), 16);
        caps.strips_attached = 8;
        caps.max_strips_per_packet = 2;
        assert_eq!(pacing_delay_ms(&caps, 60), 4);

        // concrete period: period/1000 + 1
        let caps = test_caps(2000);
        assert_eq!(pacing_delay_ms(&caps, 60), 3);

        // fast devices: frame-limit driven
        let mut caps = test_caps(500);
        assert_eq!(pacing_delay_ms(&caps, 60), 16);
        caps.strips_attached = 8;
        caps.max_strips_per_packet = 2;
        assert_eq!(pacing_delay_ms(&caps, 60), 4);
    }

    #[test]
    fn test_pacing_never_divides_by_zero() {
        let mut caps = test_caps(500);
        caps.strips_attached = 0;
        caps.max_strips_per_packet = 0;
        assert_eq!(pacing_delay_ms(&caps, 60), 16);
    }
}
