//! Table of receivers seen on the LAN

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Last beacon seen from one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub hostname: String,
    pub last_seen: Instant,
}

/// Snapshot entry returned to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveHost {
    pub address: IpAddr,
    pub hostname: String,
}

impl std::fmt::Display for ActiveHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.hostname, self.address)
    }
}

/// Concurrent peer table: written by the listener thread, read by anyone
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: DashMap<IpAddr, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer as seen at `seen`
    pub fn record_at(&self, address: IpAddr, hostname: impl Into<String>, seen: Instant) {
        self.peers.insert(
            address,
            PeerRecord {
                hostname: hostname.into(),
                last_seen: seen,
            },
        );
    }

    /// Peers seen less than `window` ago, ordered by address
    pub fn active_hosts(&self, window: Duration) -> Vec<ActiveHost> {
        self.active_hosts_at(window, Instant::now())
    }

    pub fn active_hosts_at(&self, window: Duration, now: Instant) -> Vec<ActiveHost> {
        let mut hosts: Vec<ActiveHost> = self
            .peers
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) < window)
            .map(|entry| ActiveHost {
                address: *entry.key(),
                hostname: entry.hostname.clone(),
            })
            .collect();
        hosts.sort_by_key(|h| h.address);
        hosts
    }

    pub fn get(&self, address: &IpAddr) -> Option<PeerRecord> {
        self.peers.get(address).map(|entry| entry.value().clone())
    }

    /// Drop peers not seen for `max_age`, returning how many were removed
    pub fn prune(&self, max_age: Duration) -> usize {
        self.prune_at(max_age, Instant::now())
    }

    pub fn prune_at(&self, max_age: Duration, now: Instant) -> usize {
        let before = self.peers.len();
        self.peers
            .retain(|_, record| now.saturating_duration_since(record.last_seen) < max_age);
        before - self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 30));
    const WINDOW: Duration = Duration::from_secs(15);

    #[test]
    fn test_recency_window() {
        let table = PeerTable::new();
        let t0 = Instant::now();
        table.record_at(A, "alpha", t0);

        let at_10 = table.active_hosts_at(WINDOW, t0 + Duration::from_secs(10));
        assert_eq!(
            at_10,
            vec![ActiveHost {
                address: A,
                hostname: "alpha".to_string()
            }]
        );

        assert!(table
            .active_hosts_at(WINDOW, t0 + Duration::from_secs(16))
            .is_empty());
        // Filtering never deletes.
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_upsert_refreshes_entry() {
        let table = PeerTable::new();
        let t0 = Instant::now();
        table.record_at(A, "alpha", t0);
        table.record_at(A, "alpha-renamed", t0 + Duration::from_secs(10));

        let hosts = table.active_hosts_at(WINDOW, t0 + Duration::from_secs(20));
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "alpha-renamed");
        assert_eq!(hosts[0].to_string(), "alpha-renamed (192.168.1.20)");
    }

    #[test]
    fn test_prune_removes_only_stale() {
        let table = PeerTable::new();
        let t0 = Instant::now();
        table.record_at(A, "alpha", t0);
        table.record_at(B, "beta", t0 + Duration::from_secs(200));

        let removed = table.prune_at(Duration::from_secs(300), t0 + Duration::from_secs(301));
        assert_eq!(removed, 1);
        assert!(table.get(&A).is_none());
        assert_eq!(table.get(&B).unwrap().hostname, "beta");
    }
}
