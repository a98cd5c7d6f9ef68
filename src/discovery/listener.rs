//! Beacon listener run alongside a sender

use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::{DISCOVERY_PORT, PEER_RETENTION, STOP_TIMEOUT};
use crate::discovery::peers::{ActiveHost, PeerTable};
use crate::error::{Result, SessionError};
use crate::network::udp::{self, is_timeout, SocketOptions};
use crate::protocol::Beacon;
use crate::worker::{CancelToken, Worker};

const LISTEN_READ_TIMEOUT: Duration = Duration::from_millis(500);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub bind_ip: IpAddr,
    pub port: u16,
    /// Peers silent for this long are dropped from the table
    pub retention: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DISCOVERY_PORT,
            retention: PEER_RETENTION,
        }
    }
}

/// Record the sender of a valid beacon; anything else is ignored
pub(crate) fn handle_datagram(
    peers: &PeerTable,
    datagram: &[u8],
    from: IpAddr,
    now: Instant,
) -> bool {
    match Beacon::parse(datagram) {
        Some(beacon) => {
            if peers.get(&from).is_none() {
                tracing::info!("Discovered {} at {}", beacon.hostname, from);
            }
            peers.record_at(from, beacon.hostname, now);
            true
        }
        None => {
            tracing::trace!("Ignoring non-beacon datagram from {}", from);
            false
        }
    }
}

fn run_listen_loop(
    socket: &UdpSocket,
    peers: &PeerTable,
    retention: Duration,
    cancel: &CancelToken,
) {
    let mut buf = [0u8; 1024];
    let mut last_prune = Instant::now();

    while !cancel.is_cancelled() {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                handle_datagram(peers, &buf[..len], from.ip(), Instant::now());
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::warn!("Discovery socket error, listener stopped: {}", e);
                }
                break;
            }
        }

        if last_prune.elapsed() >= PRUNE_INTERVAL {
            last_prune = Instant::now();
            let removed = peers.prune(retention);
            if removed > 0 {
                tracing::debug!("Pruned {} silent peers", removed);
            }
        }
    }
    tracing::debug!("Discovery listener stopped");
}

struct ListenSession {
    cancel: CancelToken,
    socket: Arc<UdpSocket>,
    worker: Worker,
}

/// Collects beacons into a [`PeerTable`]
pub struct DiscoveryListener {
    peers: Arc<PeerTable>,
    session: Mutex<Option<ListenSession>>,
}

impl DiscoveryListener {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(PeerTable::new()),
            session: Mutex::new(None),
        }
    }

    pub fn start(&self, options: ListenerOptions) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(SessionError::AlreadyActive.into());
        }

        let socket = Arc::new(udp::create_socket(
            SocketAddr::new(options.bind_ip, options.port),
            &SocketOptions {
                broadcast: true,
                reuse_address: true,
                read_timeout: Some(LISTEN_READ_TIMEOUT),
            },
        )?);

        let cancel = CancelToken::new();
        let worker = {
            let socket = socket.clone();
            let cancel = cancel.clone();
            let peers = self.peers.clone();
            let retention = options.retention;
            Worker::spawn("discovery-listen", move || {
                run_listen_loop(&socket, &peers, retention, &cancel)
            })?
        };

        tracing::info!("Listening for receivers on port {}", options.port);
        *session = Some(ListenSession {
            cancel,
            socket,
            worker,
        });
        Ok(())
    }

    /// Stop listening; a no-op when not running. The peer table is kept.
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.cancel.cancel();
        udp::shutdown(&session.socket);
        if !session.worker.join_timeout(STOP_TIMEOUT) {
            tracing::warn!("Discovery listener thread did not exit in time");
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Receivers heard from within `window`
    pub fn active_hosts(&self, window: Duration) -> Vec<ActiveHost> {
        self.peers.active_hosts(window)
    }

    pub fn peers(&self) -> Arc<PeerTable> {
        self.peers.clone()
    }
}

impl Default for DiscoveryListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        self.stop();
    }
}
