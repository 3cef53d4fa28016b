use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single captured audio buffer.
///
/// Chunks are produced by an [`AudioSource`] at a fixed cadence and consumed
/// exactly once by the recognition channel; ownership transfers on send.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw little-endian i16 PCM bytes.
    pub pcm: Vec<u8>,
    /// Milliseconds since capture started.
    pub timestamp_ms: u64,
    /// Sample rate of the PCM data in Hz.
    pub sample_rate: u32,
    /// Number of channels (1 = mono).
    pub channels: u16,
}

/// Fixed capture parameters.
///
/// These match what the recognition side expects and are not user-tunable.
/// `chunk_ms` is a latency knob, not a correctness requirement.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u64,
    /// Requested from the platform where the backend honors it.
    pub echo_cancellation: bool,
    /// Requested from the platform where the backend honors it.
    pub noise_suppression: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // recognition engines expect 16kHz
            channels: 1,        // Mono
            chunk_ms: 100,      // 100ms chunks for low-latency streaming
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Capture failures, mapped from the platform's permission/device taxonomy.
///
/// These are distinct user-facing cases and are never collapsed into one
/// generic message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone access was denied; grant microphone permission and try again")]
    PermissionDenied,
    #[error("no microphone device is available")]
    NoDevice,
    #[error("audio capture failed: {0}")]
    Other(String),
}

/// Microphone capture source.
///
/// `start` returns a channel receiver that delivers chunks in capture order.
/// `stop` is idempotent, releases the device, and is safe to call even if
/// `start` never succeeded; no chunk is delivered after `stop` returns.
#[async_trait]
pub trait AudioSource: Send {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError>;

    async fn stop(&mut self);

    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}
