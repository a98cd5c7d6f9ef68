//! Device capability interface
//!
//! The transport never talks to an audio API directly. It asks an
//! [`AudioBackend`] for streams, which keeps the pipelines testable and
//! lets a host application plug in its own device layer.

use crate::audio::capture::CpalCapture;
use crate::audio::device;
use crate::audio::playback::CpalPlayback;
use crate::error::AudioError;

/// Blocking source of fixed-size capture frames
pub trait CaptureStream {
    /// Block until `out` is completely filled with interleaved stereo samples
    fn read_frame(&mut self, out: &mut [f32]) -> Result<(), AudioError>;

    fn device_name(&self) -> &str;

    /// Device buffers lost because the reader fell behind
    fn overflow_count(&self) -> u64 {
        0
    }
}

/// Sink for decoded frames
pub trait PlaybackStream {
    /// Submit one frame of interleaved stereo samples
    fn play(&mut self, samples: &[f32]) -> Result<(), AudioError>;

    fn device_name(&self) -> &str;
}

/// Audio devices as seen by the transport.
///
/// Streams are opened on the thread that will use them, so the stream
/// objects themselves need not be `Send`.
pub trait AudioBackend: Send + Sync {
    /// Names of devices usable for capture, including loopback devices
    fn capture_devices(&self) -> Vec<String>;

    /// Name of the current default playback device
    fn default_output_name(&self) -> Option<String>;

    /// Open the capture device called exactly `name`
    fn open_capture(
        &self,
        name: &str,
        sample_rate: u32,
        frame_length: usize,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;

    /// Open the current default playback device
    fn open_playback(
        &self,
        sample_rate: u32,
        frame_length: usize,
    ) -> Result<Box<dyn PlaybackStream>, AudioError>;

    fn has_capture_device(&self, name: &str) -> bool {
        self.capture_devices().iter().any(|d| d == name)
    }
}

/// Backend over the platform's default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn capture_devices(&self) -> Vec<String> {
        device::loopback_device_names()
    }

    fn default_output_name(&self) -> Option<String> {
        device::default_output_name()
    }

    fn open_capture(
        &self,
        name: &str,
        sample_rate: u32,
        frame_length: usize,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let device = device::find_capture_device(name)?;
        Ok(Box::new(CpalCapture::open(device, sample_rate, frame_length)?))
    }

    fn open_playback(
        &self,
        sample_rate: u32,
        frame_length: usize,
    ) -> Result<Box<dyn PlaybackStream>, AudioError> {
        let device = device::get_default_output_device()?;
        Ok(Box::new(CpalPlayback::open(device, sample_rate, frame_length)?))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend for pipeline tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    pub struct FakeState {
        pub capture_devices: Vec<String>,
        pub default_output: Option<String>,
        pub fail_capture_open: bool,
        pub fail_playback_open: bool,
        /// Capture reads fail once this many frames were produced
        pub capture_fail_after: Option<u64>,
        /// Reported by every fake capture stream as its overflow count
        pub capture_overflows: u64,
        /// The next this-many `play` calls fail
        pub failing_plays: u32,
        pub frames_captured: u64,
        pub opened_outputs: Vec<String>,
        pub closed_outputs: Vec<String>,
        pub played: Vec<(String, Vec<f32>)>,
    }

    #[derive(Clone, Default)]
    pub struct FakeBackend {
        pub state: Arc<Mutex<FakeState>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            let backend = Self::default();
            {
                let mut state = backend.state.lock();
                state.capture_devices = vec!["Speakers (Loopback)".to_string()];
                state.default_output = Some("Speakers A".to_string());
            }
            backend
        }

        pub fn set_default_output(&self, name: Option<&str>) {
            self.state.lock().default_output = name.map(str::to_string);
        }

        pub fn played(&self) -> Vec<(String, Vec<f32>)> {
            self.state.lock().played.clone()
        }
    }

    pub struct FakeCapture {
        name: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl CaptureStream for FakeCapture {
        fn read_frame(&mut self, out: &mut [f32]) -> Result<(), AudioError> {
            std::thread::sleep(Duration::from_millis(2));
            let mut state = self.state.lock();
            if let Some(limit) = state.capture_fail_after {
                if state.frames_captured >= limit {
                    return Err(AudioError::CaptureFailed("device unplugged".into()));
                }
            }
            let value = (state.frames_captured % 10) as f32 / 10.0;
            out.fill(value);
            state.frames_captured += 1;
            Ok(())
        }

        fn device_name(&self) -> &str {
            &self.name
        }

        fn overflow_count(&self) -> u64 {
            self.state.lock().capture_overflows
        }
    }

    pub struct FakePlayback {
        name: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl PlaybackStream for FakePlayback {
        fn play(&mut self, samples: &[f32]) -> Result<(), AudioError> {
            let mut state = self.state.lock();
            if state.failing_plays > 0 {
                state.failing_plays -= 1;
                return Err(AudioError::PlaybackFailed("device rejected frame".into()));
            }
            state.played.push((self.name.clone(), samples.to_vec()));
            Ok(())
        }

        fn device_name(&self) -> &str {
            &self.name
        }
    }

    impl Drop for FakePlayback {
        fn drop(&mut self) {
            self.state.lock().closed_outputs.push(self.name.clone());
        }
    }

    impl AudioBackend for FakeBackend {
        fn capture_devices(&self) -> Vec<String> {
            self.state.lock().capture_devices.clone()
        }

        fn default_output_name(&self) -> Option<String> {
            self.state.lock().default_output.clone()
        }

        fn open_capture(
            &self,
            name: &str,
            _sample_rate: u32,
            _frame_length: usize,
        ) -> Result<Box<dyn CaptureStream>, AudioError> {
            let state = self.state.lock();
            if state.fail_capture_open {
                return Err(AudioError::StreamError("capture busy".into()));
            }
            if !state.capture_devices.iter().any(|d| d == name) {
                return Err(AudioError::DeviceNotFound(name.to_string()));
            }
            Ok(Box::new(FakeCapture {
                name: name.to_string(),
                state: self.state.clone(),
            }))
        }

        fn open_playback(
            &self,
            _sample_rate: u32,
            _frame_length: usize,
        ) -> Result<Box<dyn PlaybackStream>, AudioError> {
            let mut state = self.state.lock();
            if state.fail_playback_open {
                return Err(AudioError::StreamError("output busy".into()));
            }
            let name = state
                .default_output
                .clone()
                .ok_or_else(|| AudioError::DeviceNotFound("default output".into()))?;
            state.opened_outputs.push(name.clone());
            Ok(Box::new(FakePlayback {
                name,
                state: self.state.clone(),
            }))
        }
    }
}
