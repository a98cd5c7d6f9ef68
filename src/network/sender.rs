//! Transport sender: loopback capture to UDP
//!
//! One session owns two threads. The send thread blocks on the capture
//! stream for one frame at a time, which paces the whole pipeline; the
//! ping thread measures RTT against the receiver's control port.

use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioBackend, CaptureStream, CpalBackend};
use crate::codec::{frame_length, samples_per_frame, PacketEncoder};
use crate::constants::{DEFAULT_DATA_PORT, DEFAULT_SAMPLE_RATE, STOP_TIMEOUT};
use crate::error::{AudioError, Error, NetworkError, Result, SessionError};
use crate::network::control::{run_ping_loop, PingSchedule, RttGauge};
use crate::network::udp::{self, SocketOptions};
use crate::worker::{CancelToken, Worker};

/// Parameters of one send session
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Receiver data address; control goes to the next port up
    pub destination: SocketAddr,
    pub sample_rate: u32,
    /// Exact name of the capture device
    pub device: String,
    pub ping: PingSchedule,
}

impl SenderOptions {
    pub fn new(destination: SocketAddr, device: impl Into<String>) -> Self {
        Self {
            destination,
            sample_rate: DEFAULT_SAMPLE_RATE,
            device: device.into(),
            ping: PingSchedule::default(),
        }
    }

    /// Address of the receiver's control socket
    pub fn control_address(&self) -> Result<SocketAddr> {
        control_address(self.destination)
    }
}

pub(crate) fn control_address(data: SocketAddr) -> Result<SocketAddr> {
    let port = data
        .port()
        .checked_add(1)
        .ok_or_else(|| Error::Config(format!("no control port above {}", data.port())))?;
    Ok(SocketAddr::new(data.ip(), port))
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self::new(
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_DATA_PORT)),
            String::new(),
        )
    }
}

/// Sender statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Capture buffers lost because the send loop fell behind
    pub capture_overflows: u64,
}

#[derive(Default)]
struct SenderCounters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    capture_overflows: AtomicU64,
}

/// Minimum spacing between capture overflow warnings
const OVERFLOW_WARN_INTERVAL: Duration = Duration::from_secs(5);

struct SendSession {
    destination: SocketAddr,
    cancel: CancelToken,
    sockets: Vec<Arc<UdpSocket>>,
    workers: Vec<Worker>,
}

impl SendSession {
    fn teardown(self) {
        self.cancel.cancel();
        for socket in &self.sockets {
            udp::shutdown(socket);
        }
        for worker in self.workers {
            worker.join_timeout(STOP_TIMEOUT);
        }
    }
}

/// Streams one capture device to one receiver
pub struct AudioSender {
    backend: Arc<dyn AudioBackend>,
    session: Mutex<Option<SendSession>>,
    rtt: Arc<RttGauge>,
    counters: Arc<SenderCounters>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl AudioSender {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            session: Mutex::new(None),
            rtt: Arc::new(RttGauge::new()),
            counters: Arc::new(SenderCounters::default()),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Start streaming. Fails without leaving anything running if the
    /// device is unknown or cannot be opened, or a session is active.
    pub fn start(&self, options: SenderOptions) -> Result<()> {
        let mut session = self.session.lock();
        if let Some(existing) = session.take() {
            if !existing.cancel.is_cancelled() {
                *session = Some(existing);
                return Err(SessionError::AlreadyActive.into());
            }
            existing.teardown();
        }

        let frame_len = frame_length(options.sample_rate)?;
        let frame_samples = samples_per_frame(options.sample_rate)?;
        if !self.backend.has_capture_device(&options.device) {
            return Err(AudioError::DeviceNotFound(options.device.clone()).into());
        }
        let control_target = options.control_address()?;

        let data_socket = Arc::new(udp::bind_any(0, &SocketOptions::default())?);
        let control_socket = Arc::new(udp::bind_any(0, &SocketOptions::default())?);

        let cancel = CancelToken::new();
        self.counters.packets_sent.store(0, Ordering::Relaxed);
        self.counters.bytes_sent.store(0, Ordering::Relaxed);
        self.counters.capture_overflows.store(0, Ordering::Relaxed);
        *self.last_error.lock() = None;
        self.rtt.set(None);

        let (ready_tx, ready_rx) =
            crossbeam_channel::bounded::<std::result::Result<(), AudioError>>(1);
        let send_worker = {
            let backend = self.backend.clone();
            let socket = data_socket.clone();
            let cancel = cancel.clone();
            let counters = self.counters.clone();
            let last_error = self.last_error.clone();
            let options = options.clone();

            Worker::spawn("audio-send", move || {
                let mut capture =
                    match backend.open_capture(&options.device, options.sample_rate, frame_len) {
                        Ok(capture) => {
                            let _ = ready_tx.send(Ok(()));
                            capture
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                let mut encoder = PacketEncoder::new(frame_samples);
                let result = run_send_loop(
                    capture.as_mut(),
                    &socket,
                    options.destination,
                    &mut encoder,
                    &counters,
                    &cancel,
                );

                if let Err(e) = result {
                    if !cancel.is_cancelled() {
                        tracing::error!("Streaming to {} stopped: {}", options.destination, e);
                        *last_error.lock() = Some(e.to_string());
                    }
                }
                cancel.cancel();
                tracing::info!(
                    "Stream to {} ended after {} frames ({} bytes)",
                    options.destination,
                    encoder.frames_encoded(),
                    encoder.bytes_produced()
                );
            })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                send_worker.join_timeout(STOP_TIMEOUT);
                return Err(e.into());
            }
            Err(_) => {
                send_worker.join_timeout(STOP_TIMEOUT);
                return Err(SessionError::WorkerExited.into());
            }
        }

        let ping_worker = {
            let socket = control_socket.clone();
            let rtt = self.rtt.clone();
            let cancel_for_ping = cancel.clone();
            let schedule = options.ping;
            Worker::spawn("control-ping", move || {
                run_ping_loop(&socket, control_target, &rtt, schedule, &cancel_for_ping)
            })
        };
        let ping_worker = match ping_worker {
            Ok(worker) => worker,
            Err(e) => {
                SendSession {
                    destination: options.destination,
                    cancel,
                    sockets: vec![data_socket, control_socket],
                    workers: vec![send_worker],
                }
                .teardown();
                return Err(e.into());
            }
        };

        tracing::info!(
            "Streaming '{}' @ {} Hz to {}",
            options.device,
            options.sample_rate,
            options.destination
        );

        *session = Some(SendSession {
            destination: options.destination,
            cancel,
            sockets: vec![data_socket, control_socket],
            workers: vec![send_worker, ping_worker],
        });
        Ok(())
    }

    /// Stop streaming; a no-op when idle
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        tracing::info!("Stopping stream to {}", session.destination);
        session.teardown();
        self.rtt.set(None);
    }

    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map_or(false, |s| !s.cancel.is_cancelled())
    }

    /// Destination of the active session
    pub fn destination(&self) -> Option<SocketAddr> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| !s.cancel.is_cancelled())
            .map(|s| s.destination)
    }

    /// Latest RTT in milliseconds, or -1 when unavailable
    pub fn rtt_ms(&self) -> f64 {
        self.rtt.millis()
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt.get()
    }

    /// Why the last session ended on its own, if it did
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            capture_overflows: self.counters.capture_overflows.load(Ordering::Relaxed),
        }
    }
}

impl Default for AudioSender {
    fn default() -> Self {
        Self::new(Arc::new(CpalBackend))
    }
}

impl Drop for AudioSender {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_send_loop(
    capture: &mut dyn CaptureStream,
    socket: &UdpSocket,
    destination: SocketAddr,
    encoder: &mut PacketEncoder,
    counters: &SenderCounters,
    cancel: &CancelToken,
) -> Result<()> {
    let mut frame = vec![0.0f32; encoder.samples_per_frame()];
    let mut overflows_reported = 0u64;
    let mut last_overflow_warning: Option<Instant> = None;

    while !cancel.is_cancelled() {
        capture.read_frame(&mut frame)?;

        let overflows = capture.overflow_count();
        counters.capture_overflows.store(overflows, Ordering::Relaxed);
        if overflows > overflows_reported
            && last_overflow_warning.map_or(true, |at| at.elapsed() >= OVERFLOW_WARN_INTERVAL)
        {
            tracing::warn!(
                "Capture on '{}' dropped {} buffers, sender is falling behind",
                capture.device_name(),
                overflows - overflows_reported
            );
            overflows_reported = overflows;
            last_overflow_warning = Some(Instant::now());
        }

        let packet = encoder.encode(&frame)?;
        let sent = socket
            .send_to(&packet, destination)
            .map_err(NetworkError::SendFailed)?;

        counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        counters.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
    }
    Ok(())
}
