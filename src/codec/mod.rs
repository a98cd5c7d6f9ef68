//! Raw PCM frame codec
//!
//! Converts between normalized f32 stereo frames and the audio datagram:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────────┐
//! │ seq (u16, BE)    │ N × i16 interleaved stereo PCM (LE)      │
//! └──────────────────┴──────────────────────────────────────────┘
//! ```

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_packet, AudioPacket};
pub use encoder::{encode_packet, PacketEncoder};

use crate::constants::CHANNELS;
use crate::error::AudioError;

/// Scale between normalized samples and i16 PCM
pub const PCM_SCALE: f32 = 32767.0;

/// Samples per channel in one frame for the given sample rate
pub fn frame_length(sample_rate: u32) -> Result<usize, AudioError> {
    match sample_rate {
        48_000 => Ok(480),
        44_100 => Ok(882),
        other => Err(AudioError::UnsupportedSampleRate(other)),
    }
}

/// Interleaved sample count in one frame for the given sample rate
pub fn samples_per_frame(sample_rate: u32) -> Result<usize, AudioError> {
    Ok(frame_length(sample_rate)? * CHANNELS as usize)
}
