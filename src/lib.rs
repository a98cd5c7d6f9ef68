//! # LAN Audio Link
//!
//! Streams the audio playing on one machine to the speakers of another
//! machine on the same LAN, using raw PCM over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────┐          ┌──────────────────────────────────┐
//! │            SENDER PC             │          │           RECEIVER PC            │
//! │                                  │          │                                  │
//! │  ┌────────────┐                  │  data    │                  ┌────────────┐  │
//! │  │ Loopback   │  capture thread  │  :5555   │  receive thread  │  Default   │  │
//! │  │ capture    ├──► encode ──► UDP├─────────►│UDP ─► decode ─►  │  output    │  │
//! │  └────────────┘  [seq|i16 PCM]   │          │  jitter buffer ─►│  device    │  │
//! │                                  │          │  (hot-swap 500ms)└────────────┘  │
//! │  ┌────────────┐                  │ control  │                  ┌────────────┐  │
//! │  │ Ping loop  │ PING ts ────────►│  :5556   │◄──────── PONG ts │ Echo loop  │  │
//! │  │ (1/s, RTT) │◄─────────────────┤          ├─────────────────►│            │  │
//! │  └────────────┘                  │          │                  └────────────┘  │
//! │                                  │ discovery│                  ┌────────────┐  │
//! │  ┌────────────┐   peer table     │  :5556   │   JSON beacon    │ Announcer  │  │
//! │  │ Listener   │◄─────────────────┼──────────┼──────────────────┤ (every 5s) │  │
//! │  └────────────┘                  │ broadcast│                  └────────────┘  │
//! └──────────────────────────────────┘          └──────────────────────────────────┘
//! ```
//!
//! Every loop runs on its own named thread and observes a per-session
//! [`worker::CancelToken`]. Devices are reached through the
//! [`audio::AudioBackend`] trait; [`audio::CpalBackend`] is the real one.

pub mod audio;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod network;
pub mod protocol;
pub mod settings;
pub mod worker;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Channel count on the wire (always stereo)
    pub const CHANNELS: u16 = 2;

    /// Default UDP port for audio data; control uses the next port up
    pub const DEFAULT_DATA_PORT: u16 = 5555;

    /// Fixed UDP port for discovery beacons
    pub const DISCOVERY_PORT: u16 = 5556;

    /// Signature every discovery beacon must carry
    pub const APP_SIGNATURE: &str = "AUDIO_STREAM_APP";

    /// Default jitter buffer prebuffer depth in frames
    pub const DEFAULT_PREBUFFER: usize = 2;

    /// Extra jitter buffer slots above the prebuffer depth
    pub const JITTER_HEADROOM: usize = 50;

    /// Size of the sequence header in front of the PCM payload
    pub const SEQUENCE_HEADER_LEN: usize = 2;

    /// Largest datagram we ever read
    pub const MAX_PACKET_SIZE: usize = 4096;

    /// Receive wait when no datagram is pending
    pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// How often the receiver checks for a new default output device
    pub const DEVICE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

    /// Interval between control pings
    pub const PING_INTERVAL: Duration = Duration::from_secs(1);

    /// How long a ping waits for its pong
    pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

    /// Interval between discovery beacons
    pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

    /// Default recency window for active hosts
    pub const ACTIVE_HOST_WINDOW: Duration = Duration::from_secs(15);

    /// How long a silent peer stays in the table before it is pruned
    pub const PEER_RETENTION: Duration = Duration::from_secs(300);

    /// Upper bound on waiting for a worker thread during stop
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);
}
