//! Beacon broadcaster run alongside a receiver

use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{ANNOUNCE_INTERVAL, DISCOVERY_PORT, STOP_TIMEOUT};
use crate::error::{Error, Result, SessionError};
use crate::network::udp::{self, SocketOptions};
use crate::protocol::Beacon;
use crate::worker::{CancelToken, Worker};

#[derive(Debug, Clone)]
pub struct AnnouncerOptions {
    /// Where beacons go, the limited broadcast address by default
    pub target: SocketAddr,
    pub interval: Duration,
    pub hostname: String,
}

impl Default for AnnouncerOptions {
    fn default() -> Self {
        Self {
            target: SocketAddr::new(Ipv4Addr::BROADCAST.into(), DISCOVERY_PORT),
            interval: ANNOUNCE_INTERVAL,
            hostname: super::local_hostname(),
        }
    }
}

struct AnnounceSession {
    cancel: CancelToken,
    socket: Arc<UdpSocket>,
    worker: Worker,
}

/// Broadcasts a beacon once per interval until stopped
pub struct DiscoveryAnnouncer {
    session: Mutex<Option<AnnounceSession>>,
    beacons_sent: Arc<AtomicU64>,
}

impl DiscoveryAnnouncer {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            beacons_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self, options: AnnouncerOptions) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(SessionError::AlreadyActive.into());
        }

        let beacon = Beacon::new(options.hostname.clone())
            .to_bytes()
            .map_err(|e| Error::Config(format!("cannot encode beacon: {}", e)))?;
        let socket = Arc::new(udp::bind_any(
            0,
            &SocketOptions {
                broadcast: true,
                ..Default::default()
            },
        )?);

        let cancel = CancelToken::new();
        let worker = {
            let socket = socket.clone();
            let cancel = cancel.clone();
            let sent = self.beacons_sent.clone();
            let target = options.target;
            let interval = options.interval;

            Worker::spawn("discovery-announce", move || {
                loop {
                    match socket.send_to(&beacon, target) {
                        Ok(_) => {
                            sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => tracing::warn!("Beacon to {} failed: {}", target, e),
                    }
                    if cancel.sleep(interval) {
                        break;
                    }
                }
                tracing::debug!("Announcer stopped");
            })?
        };

        tracing::info!(
            "Announcing '{}' to {} every {:?}",
            options.hostname,
            options.target,
            options.interval
        );
        *session = Some(AnnounceSession {
            cancel,
            socket,
            worker,
        });
        Ok(())
    }

    /// Stop broadcasting; a no-op when not running
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.cancel.cancel();
        udp::shutdown(&session.socket);
        if !session.worker.join_timeout(STOP_TIMEOUT) {
            tracing::warn!("Announcer thread did not exit in time");
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn beacons_sent(&self) -> u64 {
        self.beacons_sent.load(Ordering::Relaxed)
    }
}

impl Default for DiscoveryAnnouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiscoveryAnnouncer {
    fn drop(&mut self) {
        self.stop();
    }
}
