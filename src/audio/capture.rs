//! Audio capture from input and loopback devices
//!
//! The cpal callback hands whole callback buffers to the send thread over
//! a bounded channel; [`CpalCapture::read_frame`] reassembles them into
//! fixed-size frames and blocks until one is complete.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::backend::CaptureStream;
use crate::constants::CHANNELS;
use crate::error::AudioError;

/// Callback buffers queued between the device and the send thread
const CAPTURE_QUEUE_DEPTH: usize = 64;

/// Frames' worth of waiting before a gap is filled with silence
const SILENCE_GAP_FRAMES: u32 = 4;

/// Capture stream on a cpal device
pub struct CpalCapture {
    name: String,
    _stream: cpal::Stream,
    data_rx: Receiver<Vec<f32>>,
    error_rx: Receiver<AudioError>,
    pending: VecDeque<f32>,
    gap_timeout: Duration,
    overflow_count: Arc<AtomicU64>,
}

impl CpalCapture {
    /// Build and start a stereo f32 input stream on `device`
    pub fn open(
        device: cpal::Device,
        sample_rate: u32,
        frame_length: usize,
    ) -> Result<Self, AudioError> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (data_tx, data_rx) = bounded::<Vec<f32>>(CAPTURE_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let overflow_count = Arc::new(AtomicU64::new(0));
        let overflow = overflow_count.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if data_tx.try_send(data.to_vec()).is_err() {
                        overflow.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    let _ = error_tx.try_send(AudioError::CaptureFailed(err.to_string()));
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!(
            "Capture stream open on '{}' at {} Hz, {} samples/frame",
            name,
            sample_rate,
            frame_length
        );

        let frame_duration = Duration::from_secs_f64(frame_length as f64 / sample_rate as f64);

        Ok(Self {
            name,
            _stream: stream,
            data_rx,
            error_rx,
            pending: VecDeque::with_capacity(frame_length * CHANNELS as usize * 4),
            gap_timeout: frame_duration * SILENCE_GAP_FRAMES,
            overflow_count,
        })
    }
}

impl CaptureStream for CpalCapture {
    fn read_frame(&mut self, out: &mut [f32]) -> Result<(), AudioError> {
        while self.pending.len() < out.len() {
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }

            match self.data_rx.recv_timeout(self.gap_timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                // Loopback devices deliver nothing while the output is idle.
                Err(RecvTimeoutError::Timeout) => {
                    let missing = out.len() - self.pending.len();
                    self.pending.extend(std::iter::repeat(0.0).take(missing));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::CaptureFailed(format!(
                        "stream on '{}' closed",
                        self.name
                    )));
                }
            }
        }

        let len = out.len();
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..len)) {
            *slot = sample;
        }
        Ok(())
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }
}
