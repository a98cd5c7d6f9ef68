//! Network subsystem: UDP audio transport and the control channel

pub mod control;
pub mod receiver;
pub mod sender;
pub mod udp;

pub use control::{PingSchedule, RttGauge, RTT_UNAVAILABLE};
pub use receiver::{AudioReceiver, ReceiverOptions, ReceiverStats};
pub use sender::{AudioSender, SenderOptions, SenderStats};
pub use udp::{create_socket, SocketOptions};
