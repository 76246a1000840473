//! Device registry and discovery loops
//!
//! The registry owns the discovery socket and two long-lived tasks: a
//! receive loop that decodes broadcast datagrams into sessions, and an
//! eviction loop that removes devices that have gone silent. One mutex
//! guards the MAC-keyed session map together with the group index and
//! last-seen table, so the two loops and external queries always observe a
//! consistent registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pixelpusher_core::{DeviceHeader, DeviceType, PusherCapabilities, DISCOVERY_PORT};

use crate::error::Result;
use crate::pusher::{CardConfig, CardWorker, PixelPusher, Reconcile};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// UDP port to listen on for discovery broadcasts
    pub port: u16,
    /// Upper bound on frames per second for fast devices
    pub frame_limit: u32,
    /// Silence interval after which a device is evicted
    pub liveness_timeout: Duration,
    /// Fixed delay added to every device's pacing, milliseconds
    pub extra_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            frame_limit: 60,
            liveness_timeout: Duration::from_secs(5),
            extra_delay_ms: 0,
        }
    }
}

/// Everything the two loops share, behind one lock
#[derive(Default)]
struct RegistryState {
    /// Authoritative session store, keyed by MAC string
    pushers: HashMap<String, Arc<PixelPusher>>,
    /// Group id -> member MACs; keys only, never a second owner
    groups: HashMap<u32, Vec<String>>,
    last_seen: HashMap<String, Instant>,
    workers: HashMap<String, CardWorker>,
}

struct RegistryInner {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

/// Live registry of discovered PixelPushers.
///
/// Explicitly constructed and owned; dropping it without
/// [`shutdown`](PusherRegistry::shutdown) aborts the loops but leaves card
/// tasks to notice their stop channels closing.
pub struct PusherRegistry {
    inner: Arc<RegistryInner>,
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    receive_task: JoinHandle<()>,
    eviction_task: JoinHandle<()>,
}

impl PusherRegistry {
    /// Bind the discovery port and start the receive and eviction loops.
    pub async fn bind(config: RegistryConfig) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        let local_addr = socket.local_addr()?;
        info!("listening for discovery datagrams on {}", local_addr);

        let inner = Arc::new(RegistryInner {
            config,
            state: Mutex::new(RegistryState::default()),
        });
        let (stop_tx, stop_rx) = watch::channel(false);

        let receive_task = tokio::spawn(receive_loop(inner.clone(), socket, stop_rx.clone()));
        let eviction_task = tokio::spawn(eviction_loop(inner.clone(), stop_rx));

        Ok(Self {
            inner,
            local_addr,
            stop_tx,
            receive_task,
            eviction_task,
        })
    }

    /// Address the discovery socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn frame_limit(&self) -> u32 {
        self.inner.config.frame_limit
    }

    /// Snapshot of all live sessions.
    pub fn pushers(&self) -> Vec<Arc<PixelPusher>> {
        self.inner.state.lock().pushers.values().cloned().collect()
    }

    /// Snapshot of the sessions in one group.
    pub fn group(&self, group_id: u32) -> Vec<Arc<PixelPusher>> {
        let state = self.inner.state.lock();
        state
            .groups
            .get(&group_id)
            .map(|macs| {
                macs.iter()
                    .filter_map(|mac| state.pushers.get(mac).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find one session by group and controller id.
    pub fn controller(&self, group_id: u32, controller_id: u32) -> Option<Arc<PixelPusher>> {
        let state = self.inner.state.lock();
        state.groups.get(&group_id).and_then(|macs| {
            macs.iter()
                .filter_map(|mac| state.pushers.get(mac))
                .find(|p| p.controller_id() == controller_id)
                .cloned()
        })
    }

    /// Stop both loops and every card task, joining all of them.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.receive_task.await {
            error!("receive loop panicked: {}", e);
        }
        if let Err(e) = self.eviction_task.await {
            error!("eviction loop panicked: {}", e);
        }

        let workers: Vec<(String, CardWorker)> =
            self.inner.state.lock().workers.drain().collect();
        for (mac, worker) in workers {
            worker.stop().await;
            debug!("card task for {} joined at shutdown", mac);
        }
    }
}

async fn receive_loop(
    inner: Arc<RegistryInner>,
    socket: UdpSocket,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 65536];
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => handle_datagram(&inner, &buf[..len], from),
                Err(e) => {
                    // one failed receive never ends discovery
                    error!("discovery receive error: {}", e);
                }
            }
        }
    }
    debug!("discovery receive loop closed");
}

/// Decode one discovery datagram and reconcile it against the registry.
fn handle_datagram(inner: &Arc<RegistryInner>, datagram: &[u8], from: SocketAddr) {
    let header = match DeviceHeader::decode(datagram) {
        Ok(header) => header,
        Err(e) => {
            warn!("dropping datagram from {}: {}", from, e);
            return;
        }
    };

    if header.device_type != DeviceType::PixelPusher {
        debug!(
            "ignoring {:?} announcement from {}",
            header.device_type, from
        );
        return;
    }

    let caps = match PusherCapabilities::decode(&header) {
        Ok(caps) => caps,
        Err(e) => {
            warn!(
                "cannot build PixelPusher {} from {}: {}",
                header.mac_string(),
                from,
                e
            );
            return;
        }
    };

    let mac = header.mac_string();
    let mut state = inner.state.lock();
    state.last_seen.insert(mac.clone(), Instant::now());

    if let Some(pusher) = state.pushers.get(&mac).cloned() {
        let old_group = pusher.group_id();
        match pusher.reconcile(&caps) {
            Reconcile::Refreshed => {
                debug!("refreshed PixelPusher {} at {}", mac, pusher.ip());
            }
            Reconcile::Replaced => {
                info!("updating PixelPusher {} at {}", mac, pusher.ip());
                let new_group = pusher.group_id();
                if new_group != old_group {
                    if let Some(members) = state.groups.get_mut(&old_group) {
                        members.retain(|m| m != &mac);
                        if members.is_empty() {
                            state.groups.remove(&old_group);
                        }
                    }
                    state.groups.entry(new_group).or_default().push(mac);
                }
            }
        }
    } else {
        let pusher = Arc::new(PixelPusher::new(header, caps));
        info!(
            "adding new PixelPusher {} at {} with {} strips",
            mac,
            pusher.ip(),
            pusher.num_strips()
        );
        // map insert and worker spawn happen under the same lock hold, so a
        // session is never registered without its card task or vice versa
        let worker = CardWorker::spawn(
            pusher.clone(),
            CardConfig {
                frame_limit: inner.config.frame_limit,
                extra_delay_ms: inner.config.extra_delay_ms,
            },
        );
        state.groups.entry(pusher.group_id()).or_default().push(mac.clone());
        state.workers.insert(mac.clone(), worker);
        state.pushers.insert(mac, pusher);
    }
}

async fn eviction_loop(inner: Arc<RegistryInner>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                let expired = remove_expired(&inner);
                // join outside the lock; eviction must not return a device
                // to callers while its card task can still send
                for (mac, worker) in expired {
                    worker.stop().await;
                    info!("removed PixelPusher {} from all maps", mac);
                }
            }
        }
    }
    debug!("eviction loop closed");
}

/// Drop every session silent past the liveness timeout from all maps,
/// returning the card workers so the caller can join them.
fn remove_expired(inner: &Arc<RegistryInner>) -> Vec<(String, CardWorker)> {
    let timeout = inner.config.liveness_timeout;
    let now = Instant::now();
    let mut state = inner.state.lock();

    let dead: Vec<String> = state
        .last_seen
        .iter()
        .filter(|(_, seen)| now.duration_since(**seen) >= timeout)
        .map(|(mac, _)| mac.clone())
        .collect();

    dead.into_iter()
        .filter_map(|mac| {
            state.last_seen.remove(&mac);
            if let Some(pusher) = state.pushers.remove(&mac) {
                let group = pusher.group_id();
                if let Some(members) = state.groups.get_mut(&group) {
                    members.retain(|m| m != &mac);
                    if members.is_empty() {
                        state.groups.remove(&group);
                    }
                }
            }
            state.workers.remove(&mac).map(|worker| (mac, worker))
        })
        .collect()
}
