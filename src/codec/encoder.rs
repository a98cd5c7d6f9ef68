//! Frame to datagram encoding

use bytes::{BufMut, Bytes, BytesMut};

use super::PCM_SCALE;
use crate::constants::SEQUENCE_HEADER_LEN;
use crate::error::CodecError;

/// Encode one frame of interleaved samples behind `sequence`
pub fn encode_packet(sequence: u16, samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQUENCE_HEADER_LEN + samples.len() * 2);
    buf.put_u16(sequence);
    for &sample in samples {
        buf.put_i16_le(to_pcm(sample));
    }
    buf.freeze()
}

/// Convert a normalized sample to i16, truncating toward zero
#[inline]
fn to_pcm(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0.
    (sample.clamp(-1.0, 1.0) * PCM_SCALE) as i16
}

/// Stateful encoder owning the sequence counter of one send session
pub struct PacketEncoder {
    sequence: u16,
    samples_per_frame: usize,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl PacketEncoder {
    pub fn new(samples_per_frame: usize) -> Self {
        Self {
            sequence: 0,
            samples_per_frame,
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode a frame with the current sequence number, then advance it
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let packet = encode_packet(self.sequence, samples);
        self.sequence = self.sequence.wrapping_add(1);
        self.frames_encoded += 1;
        self.bytes_produced += packet.len() as u64;
        Ok(packet)
    }

    /// Sequence number the next frame will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}
