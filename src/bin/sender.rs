//! Audio Sender Application
//!
//! Captures what this PC plays through a loopback device and streams it
//! to a receiver on the LAN.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_link::{
    audio::{list_devices, AudioBackend, CpalBackend},
    config::AppConfig,
    discovery::DiscoveryListener,
    network::{AudioSender, RTT_UNAVAILABLE},
    settings::{SettingsStore, LAST_DESTINATION, LAST_DEVICE},
};

const RTT_LOG_INTERVAL: Duration = Duration::from_secs(1);
const DISCOVERY_POLL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "sender", about = "Stream this PC's audio to a receiver on the LAN")]
struct Args {
    /// Receiver address, `IP` or `IP:PORT`; discovered on the LAN if omitted
    destination: Option<String>,

    /// Capture device name (see --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sample rate, 48000 or 44100
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Seconds to wait for a receiver to announce itself
    #[arg(long, default_value_t = 30)]
    discovery_timeout: u64,

    /// Print capture-capable devices and exit
    #[arg(long)]
    list_devices: bool,
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

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    tracing::info!("Starting LAN Audio Sender");

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(rate) = args.sample_rate {
        config.audio.sample_rate = rate;
    }
    let settings = SettingsStore::default_location();

    let destination = match resolve_destination(&args, &config, &settings).await? {
        Some(destination) => destination,
        None => return Ok(()),
    };

    let backend = CpalBackend;
    let device = pick_device(&args, &config, &settings, &backend)?;

    let mut options = config.sender_options(destination.ip(), device.clone());
    options.destination = destination;

    let sender = AudioSender::default();
    sender
        .start(options)
        .with_context(|| format!("failed to stream to {}", destination))?;
    tracing::info!("Streaming '{}' to {}, press Ctrl-C to stop", device, destination);

    if let Err(e) = settings.set(LAST_DESTINATION, destination.to_string()) {
        tracing::warn!("Could not save destination: {}", e);
    }
    if let Err(e) = settings.set(LAST_DEVICE, device) {
        tracing::warn!("Could not save device: {}", e);
    }

    let mut ticker = tokio::time::interval(RTT_LOG_INTERVAL);
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break Ok(());
            }
            _ = ticker.tick() => {
                if !sender.is_active() {
                    let reason = sender
                        .last_error()
                        .unwrap_or_else(|| "session ended".to_string());
                    break Err(anyhow::anyhow!("sender stopped: {}", reason));
                }

                let rtt = sender.rtt_ms();
                let stats = sender.stats();
                if stats.capture_overflows > 0 {
                    tracing::debug!("Capture overflows so far: {}", stats.capture_overflows);
                }
                if rtt == RTT_UNAVAILABLE {
                    tracing::info!("RTT: unavailable, {} packets sent", stats.packets_sent);
                } else {
                    tracing::info!("RTT: {:.1} ms, {} packets sent", rtt, stats.packets_sent);
                }
            }
        }
    };

    sender.stop();
    outcome
}

fn print_devices() {
    println!("\n=== Capture Devices ===");
    for device in list_devices().into_iter().filter(|d| d.can_capture()) {
        let role = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output (loopback)",
            _ => "Unknown",
        };
        let default_marker = if device.is_default_output { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, role, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
    }
    println!();
}

fn parse_destination(text: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = text
        .parse()
        .with_context(|| format!("invalid receiver address '{}'", text))?;
    Ok(SocketAddr::new(ip, default_port))
}

/// Command line, then the last saved destination, then LAN discovery.
///
/// `None` means the user interrupted the discovery wait.
async fn resolve_destination(
    args: &Args,
    config: &AppConfig,
    settings: &SettingsStore,
) -> Result<Option<SocketAddr>> {
    let port = config.network.data_port;
    if let Some(text) = &args.destination {
        return parse_destination(text, port).map(Some);
    }
    if let Some(saved) = settings.get(LAST_DESTINATION) {
        match parse_destination(&saved, port) {
            Ok(addr) => {
                tracing::info!("Using last destination {}", addr);
                return Ok(Some(addr));
            }
            Err(e) => tracing::warn!("Ignoring saved destination: {}", e),
        }
    }

    let listener = DiscoveryListener::new();
    listener
        .start(config.listener_options())
        .context("cannot listen for receivers")?;
    tracing::info!("Searching for receivers on the LAN...");

    let deadline = Instant::now() + Duration::from_secs(args.discovery_timeout);
    let window = config.discovery.active_window();
    let found = loop {
        if let Some(host) = listener.active_hosts(window).into_iter().next() {
            tracing::info!("Found receiver {}", host);
            break Some(SocketAddr::new(host.address, port));
        }
        if Instant::now() >= deadline {
            listener.stop();
            bail!("no receiver found within {} s", args.discovery_timeout);
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break None,
            _ = tokio::time::sleep(DISCOVERY_POLL) => {}
        }
    };
    listener.stop();
    Ok(found)
}

/// Command line, then config, then the last used device, then the first one found
fn pick_device(
    args: &Args,
    config: &AppConfig,
    settings: &SettingsStore,
    backend: &dyn AudioBackend,
) -> Result<String> {
    if let Some(device) = args.device.clone().or_else(|| config.audio.device.clone()) {
        return Ok(device);
    }
    if let Some(saved) = settings.get(LAST_DEVICE) {
        if backend.has_capture_device(&saved) {
            return Ok(saved);
        }
    }
    match backend.capture_devices().into_iter().next() {
        Some(device) => Ok(device),
        None => bail!("no capture device available"),
    }
}
