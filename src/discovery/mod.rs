//! LAN discovery
//!
//! Receivers broadcast a JSON beacon every few seconds; senders listen on
//! the discovery port and keep a table of who was heard from recently.

pub mod announcer;
pub mod listener;
pub mod peers;

pub use announcer::{AnnouncerOptions, DiscoveryAnnouncer};
pub use listener::{DiscoveryListener, ListenerOptions};
pub use peers::{ActiveHost, PeerRecord, PeerTable};

/// Host name advertised in beacons
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        if let Some(name) = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
        {
            return name;
        }
    }

    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_hostname_is_not_empty() {
        assert!(!local_hostname().is_empty());
    }
}
