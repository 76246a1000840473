//! Registry tests (pixelpusher-discovery)
//!
//! End-to-end tests over loopback UDP:
//! - discovery datagram injection and session registration
//! - heartbeat dedupe (same MAC never creates a second session)
//! - group/controller queries
//! - liveness eviction
//! - pixel packets reaching the device's data port

use std::net::SocketAddr;
use std::time::Duration;

use pixelpusher_discovery::{PusherRegistry, RegistryConfig};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

const MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

/// Build a discovery datagram: 24-byte header plus a 28-byte capability
/// block (2 strips, 3 pixels per strip), optionally extended with the
/// data-port field newer firmware sends.
fn discovery_datagram(device_type: u8, group_id: u32, controller_id: u32, port: Option<u16>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAC);
    buf.extend_from_slice(&[127, 0, 0, 1]);
    buf.push(device_type);
    buf.push(1); // protocol version
    buf.extend_from_slice(&2u16.to_le_bytes()); // vendor id
    buf.extend_from_slice(&1u16.to_le_bytes()); // product id
    buf.extend_from_slice(&1u16.to_le_bytes()); // hardware revision
    buf.extend_from_slice(&121u16.to_le_bytes()); // software revision
    buf.extend_from_slice(&100_000_000u32.to_le_bytes()); // link speed

    buf.push(2); // strips attached
    buf.push(4); // max strips per packet
    buf.extend_from_slice(&3u16.to_le_bytes()); // pixels per strip
    buf.extend_from_slice(&2000u32.to_le_bytes()); // update period µs
    buf.extend_from_slice(&40_000u32.to_le_bytes()); // power total
    buf.extend_from_slice(&1u32.to_le_bytes()); // delta sequence
    buf.extend_from_slice(&controller_id.to_le_bytes());
    buf.extend_from_slice(&group_id.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // artnet universe
    buf.extend_from_slice(&2u16.to_le_bytes()); // artnet channel
    if let Some(port) = port {
        buf.extend_from_slice(&port.to_le_bytes());
    }
    buf
}

async fn bind_registry(liveness_timeout: Duration) -> PusherRegistry {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    PusherRegistry::bind(RegistryConfig {
        port: 0,
        liveness_timeout,
        ..RegistryConfig::default()
    })
    .await
    .expect("registry should bind an ephemeral port")
}

fn discovery_addr(registry: &PusherRegistry) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], registry.local_addr().port()))
}

#[tokio::test]
async fn test_discovery_registers_one_session() {
    let registry = bind_registry(Duration::from_secs(5)).await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let datagram = discovery_datagram(2, 7, 5, None);
    sender.send_to(&datagram, discovery_addr(&registry)).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let pushers = registry.pushers();
    assert_eq!(pushers.len(), 1);

    let pusher = &pushers[0];
    assert_eq!(pusher.mac(), "AA:BB:CC:DD:EE:FF");
    assert_eq!(pusher.num_strips(), 2);
    assert_eq!(pusher.strip(0).unwrap().len(), 3);
    assert_eq!(pusher.strip(1).unwrap().len(), 3);
    assert_eq!(pusher.capabilities().port, 9897);

    // the identical heartbeat must refresh, never duplicate
    sender.send_to(&datagram, discovery_addr(&registry)).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.pushers().len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_group_and_controller_queries() {
    let registry = bind_registry(Duration::from_secs(5)).await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    sender
        .send_to(&discovery_datagram(2, 7, 5, None), discovery_addr(&registry))
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(registry.group(7).len(), 1);
    assert!(registry.group(8).is_empty());

    assert!(registry.controller(7, 5).is_some());
    assert!(registry.controller(7, 99).is_none());
    assert!(registry.controller(8, 5).is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_non_pusher_devices_ignored() {
    let registry = bind_registry(Duration::from_secs(5)).await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // EtherDream announcement, then a malformed 10-byte datagram
    sender
        .send_to(&discovery_datagram(0, 7, 5, None), discovery_addr(&registry))
        .await
        .unwrap();
    sender
        .send_to(&[0u8; 10], discovery_addr(&registry))
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    assert!(registry.pushers().is_empty());

    // the loop must still be alive for a valid announcement
    sender
        .send_to(&discovery_datagram(2, 7, 5, None), discovery_addr(&registry))
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.pushers().len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_silent_device_evicted() {
    let registry = bind_registry(Duration::from_millis(300)).await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    sender
        .send_to(&discovery_datagram(2, 7, 5, None), discovery_addr(&registry))
        .await
        .unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(registry.pushers().len(), 1);

    // no further datagrams; the next eviction cycle past the timeout
    // must drop the session from every query surface
    sleep(Duration::from_millis(1500)).await;
    assert!(registry.pushers().is_empty());
    assert!(registry.group(7).is_empty());
    assert!(registry.controller(7, 5).is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_pixel_packets_reach_data_port() {
    let registry = bind_registry(Duration::from_secs(5)).await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // stand in for the device's data port
    let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let data_port = device.local_addr().unwrap().port();

    sender
        .send_to(
            &discovery_datagram(2, 7, 5, Some(data_port)),
            discovery_addr(&registry),
        )
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    let pusher = registry.pushers().into_iter().next().expect("registered");
    assert_eq!(pusher.capabilities().port, data_port);
    pusher.set_strip(0, 10, 20, 30).unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = timeout(Duration::from_secs(2), device.recv_from(&mut buf))
        .await
        .expect("card task should send within the pacing window")
        .unwrap();

    // 4-byte sequence, 2-byte strip index, 3 pixels of RGB
    assert_eq!(len, 4 + 2 + 9);
    assert_eq!(&buf[0..4], &[0, 0, 0, 0]);
    assert_eq!(&buf[4..6], &[0, 0]);
    assert_eq!(&buf[6..15], &[10, 20, 30, 10, 20, 30, 10, 20, 30]);

    // nothing retransmits an untouched strip; the next packet only goes
    // out after another write, with the sequence advanced
    pusher.set_strip(1, 1, 2, 3).unwrap();
    let (len, _) = timeout(Duration::from_secs(2), device.recv_from(&mut buf))
        .await
        .expect("second write should trigger another packet")
        .unwrap();
    assert_eq!(len, 4 + 2 + 9);
    assert_eq!(&buf[0..4], &[0, 0, 0, 1]);
    assert_eq!(&buf[4..6], &[0, 1]);

    registry.shutdown().await;

    // after shutdown the card task is joined; further writes go nowhere
    pusher.set_strip(0, 9, 9, 9).unwrap();
    let silent = timeout(Duration::from_millis(300), device.recv_from(&mut buf)).await;
    assert!(silent.is_err(), "no sends may happen after shutdown");
}
