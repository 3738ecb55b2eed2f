pub mod backend;
pub mod file;
pub mod frame;
pub mod framer;
pub mod pcm;

pub use backend::{
    CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureEvent, CaptureSource,
    ChannelCapture, FileCapture,
};
pub use file::{AudioFile, WavRecorder};
pub use frame::{AudioEncoding, AudioFrame, WIRE_SAMPLE_RATE};
pub use framer::{AudioFramer, FramerConfig};
