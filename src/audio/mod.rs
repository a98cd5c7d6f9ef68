//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use backend::{AudioBackend, CaptureStream, CpalBackend, PlaybackStream};
pub use buffer::{AudioFrame, JitterBuffer, JitterBufferStats};
pub use capture::CpalCapture;
pub use device::{list_devices, DeviceInfo};
pub use playback::CpalPlayback;
