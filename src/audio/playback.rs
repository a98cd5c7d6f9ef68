//! Audio playback to the default output device

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::backend::PlaybackStream;
use crate::constants::CHANNELS;
use crate::error::AudioError;

/// Frames allowed to sit in the device queue before `play` blocks
const MAX_QUEUED_FRAMES: usize = 3;

/// Longest `play` waits for the device to drain before giving up
const PLAY_STALL_TIMEOUT: Duration = Duration::from_millis(200);

struct SampleQueue {
    samples: Mutex<VecDeque<f32>>,
    drained: Condvar,
}

/// Playback stream on a cpal output device.
///
/// `play` blocks while the device queue is full, so the caller is paced
/// by the device clock the way a blocking write would pace it.
pub struct CpalPlayback {
    name: String,
    _stream: cpal::Stream,
    queue: Arc<SampleQueue>,
    error_rx: Receiver<AudioError>,
    max_queued: usize,
}

impl CpalPlayback {
    pub fn open(
        device: cpal::Device,
        sample_rate: u32,
        frame_length: usize,
    ) -> Result<Self, AudioError> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let frame_samples = frame_length * CHANNELS as usize;
        let config = StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::new(SampleQueue {
            samples: Mutex::new(VecDeque::with_capacity(frame_samples * (MAX_QUEUED_FRAMES + 1))),
            drained: Condvar::new(),
        });
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let callback_queue = queue.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut samples = callback_queue.samples.lock();
                    for slot in data.iter_mut() {
                        // Underruns play silence.
                        *slot = samples.pop_front().unwrap_or(0.0);
                    }
                    callback_queue.drained.notify_all();
                },
                move |err| {
                    tracing::error!("Audio output error: {}", err);
                    let _ = error_tx.try_send(AudioError::PlaybackFailed(err.to_string()));
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!("Playback stream open on '{}' at {} Hz", name, sample_rate);

        Ok(Self {
            name,
            _stream: stream,
            queue,
            error_rx,
            max_queued: frame_samples * MAX_QUEUED_FRAMES,
        })
    }
}

impl PlaybackStream for CpalPlayback {
    fn play(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        let deadline = Instant::now() + PLAY_STALL_TIMEOUT;
        let mut queued = self.queue.samples.lock();
        while queued.len() + samples.len() > self.max_queued && !queued.is_empty() {
            if self.queue.drained.wait_until(&mut queued, deadline).timed_out() {
                return Err(AudioError::PlaybackFailed(format!(
                    "'{}' stopped consuming audio",
                    self.name
                )));
            }
        }
        queued.extend(samples.iter().copied());
        Ok(())
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}
