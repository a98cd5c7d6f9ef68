//! Control and discovery wire messages

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::APP_SIGNATURE;
use crate::error::CodecError;

pub const PING_TAG: &[u8; 4] = b"PING";
pub const PONG_TAG: &[u8; 4] = b"PONG";

/// Message on the control socket
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Probe carrying the sender's wall-clock time in seconds
    Ping { timestamp: f64 },
    /// Reply echoing whatever followed the PING tag
    Pong { payload: Bytes },
}

impl ControlMessage {
    pub fn encode(&self) -> Bytes {
        match self {
            ControlMessage::Ping { timestamp } => {
                let mut buf = BytesMut::with_capacity(12);
                buf.put_slice(PING_TAG);
                buf.put_f64(*timestamp);
                buf.freeze()
            }
            ControlMessage::Pong { payload } => {
                let mut buf = BytesMut::with_capacity(4 + payload.len());
                buf.put_slice(PONG_TAG);
                buf.put_slice(payload);
                buf.freeze()
            }
        }
    }

    /// Parse a control datagram.
    ///
    /// A PING only needs its tag; a short or oversized trailer is still
    /// echoed verbatim, so `timestamp` is NaN when it cannot be read.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if let Some(rest) = data.strip_prefix(PING_TAG) {
            let timestamp = read_f64(rest).unwrap_or(f64::NAN);
            Ok(ControlMessage::Ping { timestamp })
        } else if let Some(rest) = data.strip_prefix(PONG_TAG) {
            Ok(ControlMessage::Pong {
                payload: Bytes::copy_from_slice(rest),
            })
        } else {
            Err(CodecError::UnknownControlMessage)
        }
    }

    /// Build the PONG for a raw PING datagram, or `None` if it is not one
    pub fn echo(data: &[u8]) -> Option<Bytes> {
        let rest = data.strip_prefix(PING_TAG)?;
        Some(
            ControlMessage::Pong {
                payload: Bytes::copy_from_slice(rest),
            }
            .encode(),
        )
    }

    /// Timestamp echoed inside a PONG
    pub fn echoed_timestamp(&self) -> Option<f64> {
        match self {
            ControlMessage::Pong { payload } => read_f64(payload),
            ControlMessage::Ping { .. } => None,
        }
    }
}

fn read_f64(bytes: &[u8]) -> Option<f64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(f64::from_be_bytes(raw))
}

/// Seconds since the UNIX epoch as f64
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Discovery beacon broadcast by receivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub signature: String,
    #[serde(default = "unknown_hostname")]
    pub hostname: String,
}

fn unknown_hostname() -> String {
    "Unknown".to_string()
}

impl Beacon {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            signature: APP_SIGNATURE.to_string(),
            hostname: hostname.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a datagram, returning `None` for anything that is not one of ours
    pub fn parse(data: &[u8]) -> Option<Self> {
        let beacon: Beacon = serde_json::from_slice(data).ok()?;
        (beacon.signature == APP_SIGNATURE).then_some(beacon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_layout() {
        let ping = ControlMessage::Ping { timestamp: 1.5 }.encode();
        assert_eq!(&ping[..4], b"PING");
        assert_eq!(&ping[4..], &1.5f64.to_be_bytes());
        assert_eq!(
            ControlMessage::decode(&ping).unwrap(),
            ControlMessage::Ping { timestamp: 1.5 }
        );
    }

    #[test]
    fn test_echo_is_verbatim() {
        let ping = ControlMessage::Ping { timestamp: 42.25 }.encode();
        let pong = ControlMessage::echo(&ping).unwrap();

        assert_eq!(&pong[..4], b"PONG");
        assert_eq!(&pong[4..], &ping[4..]);

        let parsed = ControlMessage::decode(&pong).unwrap();
        assert_eq!(parsed.echoed_timestamp(), Some(42.25));

        // Odd trailers are echoed untouched but carry no timestamp.
        let pong = ControlMessage::echo(b"PINGxyz").unwrap();
        assert_eq!(&pong[..], b"PONGxyz");
        assert_eq!(ControlMessage::decode(&pong).unwrap().echoed_timestamp(), None);

        assert!(ControlMessage::echo(b"HELLO").is_none());
        assert_eq!(
            ControlMessage::decode(b"NOPE"),
            Err(CodecError::UnknownControlMessage)
        );
    }

    #[test]
    fn test_beacon_json() {
        let bytes = Beacon::new("alpha").to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["signature"], "AUDIO_STREAM_APP");
        assert_eq!(value["hostname"], "alpha");

        assert_eq!(Beacon::parse(&bytes), Some(Beacon::new("alpha")));
    }

    #[test]
    fn test_beacon_rejects_foreign_datagrams() {
        assert!(Beacon::parse(b"not json").is_none());
        assert!(Beacon::parse(br#"{"signature":"OTHER_APP","hostname":"x"}"#).is_none());
        assert!(Beacon::parse(br#"{"hostname":"x"}"#).is_none());

        let nameless = Beacon::parse(br#"{"signature":"AUDIO_STREAM_APP"}"#).unwrap();
        assert_eq!(nameless.hostname, "Unknown");
    }
}
