//! UDP socket construction

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Options applied before a socket is bound
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub broadcast: bool,
    pub reuse_address: bool,
    pub read_timeout: Option<Duration>,
}

/// Create and bind an IPv4 UDP socket
pub fn create_socket(addr: SocketAddr, options: &SocketOptions) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(NetworkError::SocketSetup)?;

    if options.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(NetworkError::SocketSetup)?;
    }
    if options.broadcast {
        socket.set_broadcast(true).map_err(NetworkError::SocketSetup)?;
    }

    socket
        .bind(&addr.into())
        .map_err(|source| NetworkError::BindFailed {
            port: addr.port(),
            source,
        })?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(options.read_timeout)
        .map_err(NetworkError::SocketSetup)?;
    Ok(socket)
}

/// Bind `0.0.0.0:port`
pub fn bind_any(port: u16, options: &SocketOptions) -> Result<UdpSocket, NetworkError> {
    create_socket(
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
        options,
    )
}

/// Shut a socket down so a thread blocked in `recv_from` on it wakes up
pub fn shutdown(socket: &UdpSocket) {
    // UDP sockets report ENOTCONN on some platforms; the wake-up still happens.
    if let Err(e) = SockRef::from(socket).shutdown(Shutdown::Both) {
        tracing::trace!("Socket shutdown: {}", e);
    }
}

/// Whether a receive error just means "nothing arrived in time"
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
