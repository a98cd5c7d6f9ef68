//! Datagram to frame decoding

use bytes::Buf;

use super::PCM_SCALE;
use crate::constants::{CHANNELS, SEQUENCE_HEADER_LEN};
use crate::error::CodecError;

/// A decoded audio datagram
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Sender's sequence number, kept for diagnostics only
    pub sequence: u16,
    /// Interleaved stereo samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

/// Decode one audio datagram.
///
/// The payload may hold any whole number of stereo frames; the receiver
/// does not insist on the session's frame length.
pub fn decode_packet(mut data: &[u8]) -> Result<AudioPacket, CodecError> {
    if data.len() < SEQUENCE_HEADER_LEN {
        return Err(CodecError::PacketTooShort(data.len()));
    }

    let sequence = data.get_u16();
    let payload_len = data.len();
    if payload_len == 0 {
        return Err(CodecError::EmptyPayload);
    }
    if payload_len % (2 * CHANNELS as usize) != 0 {
        return Err(CodecError::MisalignedPayload(payload_len));
    }

    let mut samples = Vec::with_capacity(payload_len / 2);
    while data.has_remaining() {
        samples.push((data.get_i16_le() as f32 / PCM_SCALE).max(-1.0));
    }

    Ok(AudioPacket { sequence, samples })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_packet;
    use proptest::prelude::*;

    #[test]
    fn test_decode_known_bytes() {
        let mut data = vec![0x00, 0x07];
        for value in [32767i16, -32768, 0, 16384] {
            data.extend_from_slice(&value.to_le_bytes());
        }

        let packet = decode_packet(&data).unwrap();
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.samples[0], 1.0);
        assert_eq!(packet.samples[1], -1.0);
        assert_eq!(packet.samples[2], 0.0);
        assert!((packet.samples[3] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decodes_little_endian_payload() {
        // seq 0, left 16383, right 0
        let packet = decode_packet(&[0x00, 0x00, 0xFF, 0x3F, 0x00, 0x00]).unwrap();
        assert_eq!(packet.sequence, 0);
        assert!((packet.samples[0] - 0.5).abs() < 1e-4);
        assert_eq!(packet.samples[1], 0.0);
    }

    #[test]
    fn test_malformed_packets() {
        assert_eq!(decode_packet(&[0x01]), Err(CodecError::PacketTooShort(1)));
        assert_eq!(decode_packet(&[0, 1]), Err(CodecError::EmptyPayload));
        // One i16 is half a stereo pair.
        assert_eq!(
            decode_packet(&[0, 1, 0, 0]),
            Err(CodecError::MisalignedPayload(2))
        );
        assert_eq!(
            decode_packet(&[0, 1, 0, 0, 0]),
            Err(CodecError::MisalignedPayload(3))
        );
    }

    proptest! {
        #[test]
        fn prop_decoded_samples_stay_close(
            sequence in any::<u16>(),
            pairs in prop::collection::vec((-1.5f32..1.5, -1.5f32..1.5), 1..64),
        ) {
            let samples: Vec<f32> = pairs.iter().flat_map(|&(l, r)| [l, r]).collect();
            let packet = decode_packet(&encode_packet(sequence, &samples)).unwrap();

            prop_assert_eq!(packet.sequence, sequence);
            prop_assert_eq!(packet.samples.len(), samples.len());
            for (decoded, original) in packet.samples.iter().zip(&samples) {
                prop_assert!((-1.0..=1.0).contains(decoded));
                prop_assert!((decoded - original.clamp(-1.0, 1.0)).abs() <= 1.0 / PCM_SCALE + 1e-6);
            }
        }
    }
}
