pub mod mic;
pub mod source;

pub use mic::MicSource;
pub use source::{AudioChunk, AudioSource, CaptureConfig, CaptureError};
