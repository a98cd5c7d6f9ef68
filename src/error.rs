//! Error types for the audio link

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Playback error: {0}")]
    PlaybackFailed(String),

    #[error("Capture error: {0}")]
    CaptureFailed(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Wire format errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("PCM payload of {0} bytes is not whole stereo frames")]
    MisalignedPayload(usize),

    #[error("Empty PCM payload")]
    EmptyPayload,

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Unknown control message")]
    UnknownControlMessage,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Port {port} is already in use or cannot be bound: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket setup failed: {0}")]
    SocketSetup(std::io::Error),

    #[error("Send failed: {0}")]
    SendFailed(std::io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(std::io::Error),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is already active")]
    AlreadyActive,

    #[error("Worker thread failed to start: {0}")]
    SpawnFailed(std::io::Error),

    #[error("Worker thread exited before reporting readiness")]
    WorkerExited,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
