//! Transport receiver: UDP to jitter buffer to the default output device
//!
//! The receive thread owns the playback stream and the jitter buffer. Each
//! iteration waits briefly for one datagram, releases at most one frame to
//! the device once the prebuffer is exceeded, and every 500 ms checks
//! whether the system default output device changed.

use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioBackend, AudioFrame, CpalBackend, JitterBuffer, PlaybackStream};
use crate::codec::{decode_packet, frame_length};
use crate::constants::{
    DEFAULT_DATA_PORT, DEFAULT_PREBUFFER, DEFAULT_SAMPLE_RATE, DEVICE_CHECK_INTERVAL,
    MAX_PACKET_SIZE, RECEIVE_POLL_INTERVAL, STOP_TIMEOUT,
};
use crate::error::{AudioError, Error, NetworkError, Result, SessionError};
use crate::network::control::run_echo_loop;
use crate::network::udp::{self, is_timeout, SocketOptions};
use crate::worker::{CancelToken, Worker};

/// Read timeout on the control socket, bounding how long a stop can wait
const CONTROL_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Parameters of one receive session
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub bind_ip: IpAddr,
    /// Data port; the control socket binds the next port up
    pub port: u16,
    pub sample_rate: u32,
    /// Frames held back before playback starts
    pub prebuffer: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_DATA_PORT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            prebuffer: DEFAULT_PREBUFFER,
        }
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    pub frames_played: u64,
    pub frames_evicted: u64,
    pub playback_errors: u64,
    pub device_switches: u64,
    /// Frames waiting in the jitter buffer
    pub jitter_level: u64,
    /// Sequence number of the last valid datagram, for diagnostics
    pub last_sequence: Option<u16>,
}

#[derive(Default)]
struct ReceiverCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    frames_played: AtomicU64,
    frames_evicted: AtomicU64,
    playback_errors: AtomicU64,
    device_switches: AtomicU64,
    jitter_level: AtomicU64,
    /// u16 sequence, or u64::MAX before the first packet
    last_sequence: AtomicU64,
}

impl ReceiverCounters {
    fn reset(&self) {
        for counter in [
            &self.packets_received,
            &self.bytes_received,
            &self.invalid_packets,
            &self.frames_played,
            &self.frames_evicted,
            &self.playback_errors,
            &self.device_switches,
            &self.jitter_level,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_sequence.store(u64::MAX, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReceiverStats {
        let last_sequence = self.last_sequence.load(Ordering::Relaxed);
        ReceiverStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            playback_errors: self.playback_errors.load(Ordering::Relaxed),
            device_switches: self.device_switches.load(Ordering::Relaxed),
            jitter_level: self.jitter_level.load(Ordering::Relaxed),
            last_sequence: u16::try_from(last_sequence).ok(),
        }
    }
}

/// State shared between the receiver handle and its receive thread
struct Shared {
    counters: ReceiverCounters,
    current_device: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        let counters = ReceiverCounters::default();
        counters.reset();
        Self {
            counters,
            current_device: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }
}

/// Everything the receive thread owns
struct PlaybackLoop {
    backend: Arc<dyn AudioBackend>,
    playback: Option<Box<dyn PlaybackStream>>,
    jitter: JitterBuffer,
    sample_rate: u32,
    frame_length: usize,
    last_device_check: Instant,
    shared: Arc<Shared>,
}

impl PlaybackLoop {
    fn new(
        backend: Arc<dyn AudioBackend>,
        playback: Box<dyn PlaybackStream>,
        options: &ReceiverOptions,
        frame_length: usize,
        shared: Arc<Shared>,
    ) -> Self {
        *shared.current_device.lock() = Some(playback.device_name().to_string());
        Self {
            backend,
            playback: Some(playback),
            jitter: JitterBuffer::new(options.prebuffer),
            sample_rate: options.sample_rate,
            frame_length,
            last_device_check: Instant::now(),
            shared,
        }
    }

    fn run(&mut self, socket: &UdpSocket, cancel: &CancelToken) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        while !cancel.is_cancelled() {
            match socket.recv_from(&mut buf) {
                Ok((len, _)) => self.accept_datagram(&buf[..len]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(NetworkError::ReceiveFailed(e).into()),
            }

            self.play_ready();
            self.check_default_device(Instant::now())?;
        }
        Ok(())
    }

    fn log_summary(&self) {
        let stats = self.jitter.stats();
        tracing::debug!(
            "Jitter buffer: {} received, {} released, {} evicted ({:.1}%), {} left",
            stats.received,
            stats.released,
            stats.evicted,
            stats.eviction_rate() * 100.0,
            stats.level
        );
    }

    /// Decode a datagram into the jitter buffer; malformed ones are dropped
    fn accept_datagram(&mut self, datagram: &[u8]) {
        let counters = &self.shared.counters;
        counters.packets_received.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_received
            .fetch_add(datagram.len() as u64, Ordering::Relaxed);

        match decode_packet(datagram) {
            Ok(packet) => {
                counters
                    .last_sequence
                    .store(u64::from(packet.sequence), Ordering::Relaxed);
                if self.jitter.push(AudioFrame::new(packet.samples)).is_some() {
                    counters.frames_evicted.fetch_add(1, Ordering::Relaxed);
                }
                counters
                    .jitter_level
                    .store(self.jitter.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                counters.invalid_packets.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropping malformed datagram: {}", e);
            }
        }
    }

    /// Submit one frame once occupancy exceeds the prebuffer depth
    fn play_ready(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        let Some(frame) = self.jitter.pop_ready() else {
            return;
        };
        self.shared
            .counters
            .jitter_level
            .store(self.jitter.len() as u64, Ordering::Relaxed);

        match playback.play(&frame.samples) {
            Ok(()) => {
                self.shared
                    .counters
                    .frames_played
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.shared
                    .counters
                    .playback_errors
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Playback error: {}", e);
            }
        }
    }

    /// Reopen playback on the new default device if it changed.
    ///
    /// Runs at most once per check interval. A failed reopen is fatal.
    fn check_default_device(&mut self, now: Instant) -> std::result::Result<(), AudioError> {
        if now.duration_since(self.last_device_check) < DEVICE_CHECK_INTERVAL {
            return Ok(());
        }
        self.last_device_check = now;

        let Some(default_name) = self.backend.default_output_name() else {
            tracing::warn!("No default output device reported, keeping current stream");
            return Ok(());
        };
        let current = self.playback.as_ref().map(|p| p.device_name());
        if current == Some(default_name.as_str()) {
            return Ok(());
        }

        tracing::info!(
            "Default output device changed: {} -> {}",
            current.unwrap_or("none"),
            default_name
        );

        // The old stream must be closed before the new one is opened.
        self.playback = None;
        let playback = self
            .backend
            .open_playback(self.sample_rate, self.frame_length)?;

        *self.shared.current_device.lock() = Some(playback.device_name().to_string());
        self.playback = Some(playback);
        self.shared
            .counters
            .device_switches
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Session sockets, emptied by whichever side ends the session first
type SocketSlot = Arc<Mutex<Vec<Arc<UdpSocket>>>>;

/// Shut down and drop the slot's sockets so their ports are freed once
/// the workers let go of their clones
fn release_sockets(sockets: &Mutex<Vec<Arc<UdpSocket>>>) {
    for socket in sockets.lock().drain(..) {
        udp::shutdown(&socket);
    }
}

struct ReceiveSession {
    port: u16,
    cancel: CancelToken,
    sockets: SocketSlot,
    workers: Vec<Worker>,
}

impl ReceiveSession {
    fn teardown(self) {
        self.cancel.cancel();
        release_sockets(&self.sockets);
        for worker in self.workers {
            worker.join_timeout(STOP_TIMEOUT);
        }
    }
}

/// Plays one incoming stream on the default output device
pub struct AudioReceiver {
    backend: Arc<dyn AudioBackend>,
    session: Mutex<Option<ReceiveSession>>,
    shared: Arc<Shared>,
}

impl AudioReceiver {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            session: Mutex::new(None),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Bind the data and control ports and open the default output.
    ///
    /// A port conflict surfaces as [`NetworkError::BindFailed`], a device
    /// problem as an [`AudioError`]; neither leaves anything running.
    pub fn start(&self, options: ReceiverOptions) -> Result<()> {
        let mut session = self.session.lock();
        if let Some(existing) = session.take() {
            if !existing.cancel.is_cancelled() {
                *session = Some(existing);
                return Err(SessionError::AlreadyActive.into());
            }
            existing.teardown();
        }

        let frame_len = frame_length(options.sample_rate)?;
        let control_port = options.port.checked_add(1).ok_or_else(|| {
            Error::Config(format!("no control port above {}", options.port))
        })?;

        let data_socket = Arc::new(udp::create_socket(
            SocketAddr::new(options.bind_ip, options.port),
            &SocketOptions {
                read_timeout: Some(RECEIVE_POLL_INTERVAL),
                ..Default::default()
            },
        )?);
        let control_socket = Arc::new(udp::create_socket(
            SocketAddr::new(options.bind_ip, control_port),
            &SocketOptions {
                read_timeout: Some(CONTROL_READ_TIMEOUT),
                ..Default::default()
            },
        )?);

        let cancel = CancelToken::new();
        self.shared.counters.reset();
        *self.shared.last_error.lock() = None;
        *self.shared.current_device.lock() = None;

        let sockets: SocketSlot = Arc::new(Mutex::new(vec![
            data_socket.clone(),
            control_socket.clone(),
        ]));

        let (ready_tx, ready_rx) =
            crossbeam_channel::bounded::<std::result::Result<(), AudioError>>(1);
        let receive_worker = {
            let backend = self.backend.clone();
            let socket = data_socket;
            let cancel = cancel.clone();
            let shared = self.shared.clone();
            let options = options.clone();
            let session_sockets = sockets.clone();

            Worker::spawn("audio-receive", move || {
                let playback = match backend.open_playback(options.sample_rate, frame_len) {
                    Ok(playback) => {
                        let _ = ready_tx.send(Ok(()));
                        playback
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut playback_loop =
                    PlaybackLoop::new(backend, playback, &options, frame_len, shared.clone());
                if let Err(e) = playback_loop.run(&socket, &cancel) {
                    if !cancel.is_cancelled() {
                        tracing::error!("Receiving on port {} stopped: {}", options.port, e);
                        *shared.last_error.lock() = Some(e.to_string());
                    }
                }
                playback_loop.log_summary();
                drop(playback_loop);
                *shared.current_device.lock() = None;
                cancel.cancel();
                drop(socket);
                release_sockets(&session_sockets);
                tracing::info!("Listening on port {} stopped", options.port);
            })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                receive_worker.join_timeout(STOP_TIMEOUT);
                return Err(e.into());
            }
            Err(_) => {
                receive_worker.join_timeout(STOP_TIMEOUT);
                return Err(SessionError::WorkerExited.into());
            }
        }

        let echo_worker = {
            let socket = control_socket;
            let cancel = cancel.clone();
            Worker::spawn("control-echo", move || run_echo_loop(&socket, &cancel))
        };
        let echo_worker = match echo_worker {
            Ok(worker) => worker,
            Err(e) => {
                ReceiveSession {
                    port: options.port,
                    cancel,
                    sockets,
                    workers: vec![receive_worker],
                }
                .teardown();
                return Err(e.into());
            }
        };

        tracing::info!(
            "Listening on port {} (control {}), {} Hz, prebuffer {}",
            options.port,
            control_port,
            options.sample_rate,
            options.prebuffer
        );

        *session = Some(ReceiveSession {
            port: options.port,
            cancel,
            sockets,
            workers: vec![receive_worker, echo_worker],
        });
        Ok(())
    }

    /// Stop listening; a no-op when idle
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        tracing::info!("Stopping receiver on port {}", session.port);
        session.teardown();
    }

    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map_or(false, |s| !s.cancel.is_cancelled())
    }

    /// Output device currently playing the stream
    pub fn current_device(&self) -> Option<String> {
        self.shared.current_device.lock().clone()
    }

    /// Why the last session ended on its own, if it did
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.shared.counters.snapshot()
    }
}

impl Default for AudioReceiver {
    fn default() -> Self {
        Self::new(Arc::new(CpalBackend))
    }
}

impl Drop for AudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::testing::FakeBackend;
    use crate::codec::encode_packet;
    use crate::protocol::ControlMessage;
    use std::thread;

    /// Find `p` such that both `p` and `p + 1` are free on loopback
    fn free_port_pair() -> u16 {
        loop {
            let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
            let port = probe.local_addr().unwrap().port();
            if port == u16::MAX {
                continue;
            }
            if UdpSocket::bind(("127.0.0.1", port + 1)).is_ok() {
                return port;
            }
        }
    }

    fn options(port: u16) -> ReceiverOptions {
        ReceiverOptions {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            sample_rate: 48_000,
            prebuffer: 2,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn playback_loop(backend: &FakeBackend, prebuffer: usize) -> PlaybackLoop {
        let backend: Arc<dyn AudioBackend> = Arc::new(backend.clone());
        let playback = backend.open_playback(48_000, 480).unwrap();
        let mut opts = options(0);
        opts.prebuffer = prebuffer;
        PlaybackLoop::new(backend, playback, &opts, 480, Arc::new(Shared::new()))
    }

    #[test]
    fn test_playback_waits_for_prebuffer() {
        let backend = FakeBackend::new();
        let mut looper = playback_loop(&backend, 2);

        for (i, value) in [0.1f32, 0.2, 0.3].into_iter().enumerate() {
            looper.accept_datagram(&encode_packet(i as u16, &[value; 4]));
            looper.play_ready();
            if i < 2 {
                assert!(backend.played().is_empty());
            }
        }

        let played = backend.played();
        assert_eq!(played.len(), 1);
        assert!((played[0].1[0] - 0.1).abs() < 1e-3);
        assert_eq!(looper.jitter.len(), 2);
        assert_eq!(looper.shared.counters.snapshot().jitter_level, 2);
    }

    #[test]
    fn test_failed_submission_is_skipped() {
        let backend = FakeBackend::new();
        backend.state.lock().failing_plays = 1;
        let mut looper = playback_loop(&backend, 2);

        for (i, value) in [0.1f32, 0.2, 0.3, 0.4].into_iter().enumerate() {
            looper.accept_datagram(&encode_packet(i as u16, &[value; 4]));
            looper.play_ready();
        }

        let stats = looper.shared.counters.snapshot();
        assert_eq!(stats.playback_errors, 1);
        assert_eq!(stats.frames_played, 1);
        // The first released frame was lost, the next one still plays.
        let played = backend.played();
        assert_eq!(played.len(), 1);
        assert!((played[0].1[0] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_malformed_datagrams_are_counted() {
        let backend = FakeBackend::new();
        let mut looper = playback_loop(&backend, 2);

        looper.accept_datagram(&[0x01]);
        looper.accept_datagram(&[0, 1, 0, 0, 0]);
        looper.accept_datagram(&encode_packet(9, &[0.0; 4]));

        let stats = looper.shared.counters.snapshot();
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.invalid_packets, 2);
        assert_eq!(stats.last_sequence, Some(9));
        assert_eq!(looper.jitter.len(), 1);
    }

    #[test]
    fn test_device_check_is_rate_limited() {
        let backend = FakeBackend::new();
        let mut looper = playback_loop(&backend, 2);
        let start = looper.last_device_check;

        backend.set_default_output(Some("Speakers B"));
        looper
            .check_default_device(start + Duration::from_millis(100))
            .unwrap();
        assert_eq!(looper.playback.as_ref().unwrap().device_name(), "Speakers A");

        looper
            .check_default_device(start + DEVICE_CHECK_INTERVAL)
            .unwrap();
        assert_eq!(looper.playback.as_ref().unwrap().device_name(), "Speakers B");

        let state = backend.state.lock();
        assert_eq!(state.closed_outputs, vec!["Speakers A".to_string()]);
        assert_eq!(
            state.opened_outputs,
            vec!["Speakers A".to_string(), "Speakers B".to_string()]
        );
    }

    #[test]
    fn test_missing_default_keeps_stream() {
        let backend = FakeBackend::new();
        let mut looper = playback_loop(&backend, 2);
        let start = looper.last_device_check;

        backend.set_default_output(None);
        looper
            .check_default_device(start + DEVICE_CHECK_INTERVAL)
            .unwrap();
        assert_eq!(looper.playback.as_ref().unwrap().device_name(), "Speakers A");
    }

    #[test]
    fn test_receives_and_plays_in_order() {
        let port = free_port_pair();
        let backend = FakeBackend::new();
        let receiver = AudioReceiver::new(Arc::new(backend.clone()));
        receiver.start(options(port)).unwrap();
        assert!(receiver.is_active());
        assert_eq!(receiver.current_device().as_deref(), Some("Speakers A"));

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        for (seq, value) in [0.1f32, 0.2, 0.3, 0.4].into_iter().enumerate() {
            socket
                .send_to(&encode_packet(seq as u16, &[value; 960]), ("127.0.0.1", port))
                .unwrap();
        }

        assert!(wait_for(|| backend.played().len() >= 2));
        let played = backend.played();
        assert!((played[0].1[0] - 0.1).abs() < 1e-3);
        assert!((played[1].1[0] - 0.2).abs() < 1e-3);
        assert_eq!(receiver.stats().last_sequence, Some(3));

        receiver.stop();
        assert!(!receiver.is_active());
    }

    #[test]
    fn test_playback_error_keeps_session() {
        let port = free_port_pair();
        let backend = FakeBackend::new();
        backend.state.lock().failing_plays = 1;
        let receiver = AudioReceiver::new(Arc::new(backend.clone()));
        receiver.start(options(port)).unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        for (seq, value) in [0.1f32, 0.2, 0.3, 0.4, 0.5].into_iter().enumerate() {
            socket
                .send_to(&encode_packet(seq as u16, &[value; 960]), ("127.0.0.1", port))
                .unwrap();
        }

        assert!(wait_for(|| backend.played().len() >= 2));
        assert!(receiver.is_active());
        assert_eq!(receiver.stats().playback_errors, 1);
        assert!(receiver.last_error().is_none());

        receiver.stop();
    }

    #[test]
    fn test_echoes_pings_on_control_port() {
        let port = free_port_pair();
        let receiver = AudioReceiver::new(Arc::new(FakeBackend::new()));
        receiver.start(options(port)).unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let ping = ControlMessage::Ping { timestamp: 123.5 }.encode();
        socket.send_to(&ping, ("127.0.0.1", port + 1)).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"PONG");
        assert_eq!(&buf[4..len], &ping[4..]);

        receiver.stop();
    }

    #[test]
    fn test_hot_swap_keeps_session() {
        let port = free_port_pair();
        let backend = FakeBackend::new();
        let receiver = AudioReceiver::new(Arc::new(backend.clone()));
        receiver.start(options(port)).unwrap();

        backend.set_default_output(Some("Speakers B"));
        let swapped_at = Instant::now();
        assert!(wait_for(|| receiver.current_device().as_deref() == Some("Speakers B")));
        assert!(swapped_at.elapsed() <= Duration::from_millis(600));

        assert!(receiver.is_active());
        assert_eq!(receiver.stats().device_switches, 1);
        assert!(backend
            .state
            .lock()
            .closed_outputs
            .contains(&"Speakers A".to_string()));

        receiver.stop();
    }

    #[test]
    fn test_failed_reopen_ends_session() {
        let port = free_port_pair();
        let backend = FakeBackend::new();
        let receiver = AudioReceiver::new(Arc::new(backend.clone()));
        receiver.start(options(port)).unwrap();

        {
            let mut state = backend.state.lock();
            state.fail_playback_open = true;
            state.default_output = Some("Speakers B".to_string());
        }

        assert!(wait_for(|| !receiver.is_active()));
        assert!(receiver.last_error().unwrap().contains("output busy"));
        assert_eq!(receiver.current_device(), None);

        // Both ports are released without waiting for stop.
        assert!(wait_for(|| {
            UdpSocket::bind(("127.0.0.1", port)).is_ok()
                && UdpSocket::bind(("127.0.0.1", port + 1)).is_ok()
        }));
        receiver.stop();
    }

    #[test]
    fn test_port_conflict_is_a_bind_failure() {
        let port = free_port_pair();
        let _squatter = UdpSocket::bind(("127.0.0.1", port)).unwrap();
        let receiver = AudioReceiver::new(Arc::new(FakeBackend::new()));

        match receiver.start(options(port)) {
            Err(Error::Network(NetworkError::BindFailed { port: p, .. })) => assert_eq!(p, port),
            other => panic!("expected bind failure, got {:?}", other),
        }
        assert!(!receiver.is_active());
    }

    #[test]
    fn test_device_open_failure_releases_ports() {
        let port = free_port_pair();
        let backend = FakeBackend::new();
        backend.state.lock().fail_playback_open = true;
        let receiver = AudioReceiver::new(Arc::new(backend.clone()));

        assert!(matches!(
            receiver.start(options(port)),
            Err(Error::Audio(AudioError::StreamError(_)))
        ));
        assert!(!receiver.is_active());

        // Both ports are free again.
        UdpSocket::bind(("127.0.0.1", port)).unwrap();
        UdpSocket::bind(("127.0.0.1", port + 1)).unwrap();
    }

    #[test]
    fn test_start_twice_and_stop_twice() {
        let port = free_port_pair();
        let receiver = AudioReceiver::new(Arc::new(FakeBackend::new()));
        receiver.start(options(port)).unwrap();

        assert!(matches!(
            receiver.start(options(port)),
            Err(Error::Session(SessionError::AlreadyActive))
        ));

        receiver.stop();
        receiver.stop();
        assert!(!receiver.is_active());

        receiver.start(options(port)).unwrap();
        receiver.stop();
    }
}
