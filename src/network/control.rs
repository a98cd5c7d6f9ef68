//! Control channel: RTT probing (sender side) and echo (receiver side)

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::network::udp::is_timeout;
use crate::protocol::{unix_timestamp, ControlMessage};
use crate::worker::CancelToken;

/// Value reported while no RTT measurement is available
pub const RTT_UNAVAILABLE: f64 = -1.0;

/// Latest round-trip time in milliseconds, shared with callers
#[derive(Debug)]
pub struct RttGauge {
    bits: AtomicU64,
}

impl RttGauge {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(RTT_UNAVAILABLE.to_bits()),
        }
    }

    pub fn set(&self, rtt: Option<Duration>) {
        let ms = rtt.map_or(RTT_UNAVAILABLE, |d| d.as_secs_f64() * 1000.0);
        self.bits.store(ms.to_bits(), Ordering::Relaxed);
    }

    /// Milliseconds, or [`RTT_UNAVAILABLE`]
    pub fn millis(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn get(&self) -> Option<Duration> {
        let ms = self.millis();
        (ms >= 0.0).then(|| Duration::from_secs_f64(ms / 1000.0))
    }
}

impl Default for RttGauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing of the ping loop
#[derive(Debug, Clone, Copy)]
pub struct PingSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PingSchedule {
    fn default() -> Self {
        Self {
            interval: crate::constants::PING_INTERVAL,
            timeout: crate::constants::PING_TIMEOUT,
        }
    }
}

/// Send one PING to `target` and wait up to `timeout` for its PONG.
///
/// PONGs echoing an older timestamp are skipped. Returns `Ok(None)` on
/// timeout.
pub fn ping_once(
    socket: &UdpSocket,
    target: SocketAddr,
    timeout: Duration,
) -> std::io::Result<Option<Duration>> {
    let timestamp = unix_timestamp();
    socket.send_to(&ControlMessage::Ping { timestamp }.encode(), target)?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 64];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket.set_read_timeout(Some(remaining))?;

        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        if from.ip() != target.ip() {
            continue;
        }

        let echoed = ControlMessage::decode(&buf[..len])
            .ok()
            .and_then(|msg| msg.echoed_timestamp());
        if echoed == Some(timestamp) {
            let rtt = (unix_timestamp() - timestamp).max(0.0);
            return Ok(Some(Duration::from_secs_f64(rtt)));
        }
        tracing::trace!("Ignoring stale or foreign control datagram from {}", from);
    }
}

/// Probe `target` once per interval until cancelled, publishing into `rtt`
pub fn run_ping_loop(
    socket: &UdpSocket,
    target: SocketAddr,
    rtt: &RttGauge,
    schedule: PingSchedule,
    cancel: &CancelToken,
) {
    tracing::debug!("Ping loop started towards {}", target);

    while !cancel.is_cancelled() {
        match ping_once(socket, target, schedule.timeout) {
            Ok(Some(measured)) => {
                tracing::trace!("RTT to {}: {:.2} ms", target, measured.as_secs_f64() * 1000.0);
                rtt.set(Some(measured));
            }
            Ok(None) => rtt.set(None),
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                tracing::debug!("Control ping to {} failed: {}", target, e);
                rtt.set(None);
            }
        }

        if cancel.sleep(schedule.interval) {
            break;
        }
    }

    rtt.set(None);
    tracing::debug!("Ping loop stopped");
}

/// Answer every PING on `socket` with a PONG until cancelled
pub fn run_echo_loop(socket: &UdpSocket, cancel: &CancelToken) {
    tracing::debug!("Control echo loop started");
    let mut buf = [0u8; 1024];

    while !cancel.is_cancelled() {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                if let Some(pong) = ControlMessage::echo(&buf[..len]) {
                    if let Err(e) = socket.send_to(&pong, from) {
                        tracing::debug!("Failed to answer ping from {}: {}", from, e);
                    }
                }
            }
            Err(e) if is_timeout(&e) => {}
            // Windows reports ICMP port-unreachable from a vanished peer here.
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::warn!("Control socket error, echo stopped: {}", e);
                }
                break;
            }
        }
    }

    tracing::debug!("Control echo loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::udp::{bind_any, SocketOptions};
    use crate::worker::Worker;
    use std::sync::Arc;
    use std::thread;

    fn local_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    #[test]
    fn test_gauge_sentinel() {
        let gauge = RttGauge::new();
        assert_eq!(gauge.millis(), RTT_UNAVAILABLE);
        assert_eq!(gauge.get(), None);

        gauge.set(Some(Duration::from_millis(12)));
        assert!((gauge.millis() - 12.0).abs() < 1e-9);
        let measured = gauge.get().unwrap();
        assert!(measured > Duration::from_micros(11_999));
        assert!(measured < Duration::from_micros(12_001));

        gauge.set(None);
        assert_eq!(gauge.millis(), -1.0);
    }

    #[test]
    fn test_ping_measures_delayed_echo() {
        let echo = local_socket();
        let target = echo.local_addr().unwrap();
        let delay = Duration::from_millis(60);

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (len, from) = echo.recv_from(&mut buf).unwrap();
            thread::sleep(delay);
            let pong = ControlMessage::echo(&buf[..len]).unwrap();
            echo.send_to(&pong, from).unwrap();
        });

        let socket = local_socket();
        let rtt = ping_once(&socket, target, Duration::from_secs(1))
            .unwrap()
            .expect("pong should arrive");
        responder.join().unwrap();

        assert!(rtt >= delay);
        assert!(rtt < delay + Duration::from_millis(300));
    }

    #[test]
    fn test_ping_times_out() {
        let silent = local_socket();
        let target = silent.local_addr().unwrap();

        let socket = local_socket();
        let started = Instant::now();
        let rtt = ping_once(&socket, target, Duration::from_millis(150)).unwrap();

        assert_eq!(rtt, None);
        assert!(started.elapsed() >= Duration::from_millis(140));
    }

    #[test]
    fn test_stale_pong_is_ignored() {
        let echo = local_socket();
        let target = echo.local_addr().unwrap();

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (len, from) = echo.recv_from(&mut buf).unwrap();
            let stale = ControlMessage::Pong {
                payload: bytes::Bytes::copy_from_slice(&1.0f64.to_be_bytes()),
            };
            echo.send_to(&stale.encode(), from).unwrap();
            echo.send_to(&ControlMessage::echo(&buf[..len]).unwrap(), from)
                .unwrap();
        });

        let socket = local_socket();
        let rtt = ping_once(&socket, target, Duration::from_secs(1)).unwrap();
        responder.join().unwrap();

        // A stale timestamp of 1.0 would have produced an RTT of decades.
        assert!(rtt.unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn test_echo_loop_with_ping_loop() {
        let options = SocketOptions {
            read_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let echo_socket = bind_any(0, &options).unwrap();
        let port = echo_socket.local_addr().unwrap().port();
        let target: SocketAddr = ([127, 0, 0, 1], port).into();

        let cancel = CancelToken::new();
        let echo_cancel = cancel.clone();
        let echo = Worker::spawn("test-echo", move || run_echo_loop(&echo_socket, &echo_cancel))
            .unwrap();

        let gauge = Arc::new(RttGauge::new());
        let ping_gauge = gauge.clone();
        let ping_cancel = cancel.clone();
        let schedule = PingSchedule {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(500),
        };
        let ping = Worker::spawn("test-ping", move || {
            let socket = local_socket();
            run_ping_loop(&socket, target, &ping_gauge, schedule, &ping_cancel)
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while gauge.get().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(gauge.millis() >= 0.0);

        cancel.cancel();
        assert!(ping.join_timeout(Duration::from_secs(1)));
        assert!(echo.join_timeout(Duration::from_secs(1)));
        assert_eq!(gauge.millis(), RTT_UNAVAILABLE);
    }
}
