//! Audio Receiver Application
//!
//! Plays the incoming stream on the default output device and announces
//! this machine on the LAN so senders can find it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_link::{
    config::AppConfig,
    discovery::DiscoveryAnnouncer,
    network::AudioReceiver,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "receiver", about = "Play audio streamed from another PC on the LAN")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data port; the control channel uses the next port up
    #[arg(short, long)]
    port: Option<u16>,

    /// Sample rate, 48000 or 44100
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Frames buffered before playback starts
    #[arg(long)]
    prebuffer: Option<usize>,

    /// Name advertised to senders
    #[arg(long)]
    hostname: Option<String>,

    /// Do not broadcast discovery beacons
    #[arg(long)]
    no_announce: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting LAN Audio Receiver");

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(port) = args.port {
        config.network.data_port = port;
    }
    if let Some(rate) = args.sample_rate {
        config.audio.sample_rate = rate;
    }
    if let Some(prebuffer) = args.prebuffer {
        config.audio.prebuffer = prebuffer;
    }
    if let Some(hostname) = args.hostname {
        config.discovery.hostname = Some(hostname);
    }

    let receiver = AudioReceiver::default();
    receiver
        .start(config.receiver_options())
        .context("failed to start receiver")?;
    if let Some(device) = receiver.current_device() {
        tracing::info!("Playing on {}", device);
    }

    let announcer = DiscoveryAnnouncer::new();
    if !args.no_announce {
        if let Err(e) = announcer.start(config.announcer_options()) {
            tracing::warn!("Discovery announcer unavailable: {}", e);
        }
    }

    tracing::info!("Waiting for audio, press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break Ok(());
            }
            _ = ticker.tick() => {
                if !receiver.is_active() {
                    let reason = receiver
                        .last_error()
                        .unwrap_or_else(|| "session ended".to_string());
                    break Err(anyhow::anyhow!("receiver stopped: {}", reason));
                }

                let stats = receiver.stats();
                tracing::info!(
                    "Receiver stats: {} packets, {} bytes, {} invalid, {} played, {} evicted, \
                     jitter {}, device {}",
                    stats.packets_received,
                    stats.bytes_received,
                    stats.invalid_packets,
                    stats.frames_played,
                    stats.frames_evicted,
                    stats.jitter_level,
                    receiver.current_device().unwrap_or_else(|| "none".to_string())
                );
            }
        }
    };

    announcer.stop();
    receiver.stop();
    outcome
}
