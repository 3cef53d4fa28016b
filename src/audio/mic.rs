use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::source::{AudioChunk, AudioSource, CaptureConfig, CaptureError};

/// Microphone capture via cpal.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that parks until told to stop. Captured audio is mixed to mono, decimated
/// to the target sample rate, and delivered as fixed-duration chunks over a
/// tokio channel.
pub struct MicSource {
    config: CaptureConfig,
    worker: Option<Worker>,
}

struct Worker {
    stop_tx: std::sync::mpsc::Sender<()>,
    join: std::thread::JoinHandle<()>,
}

impl MicSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }

    /// List all available input audio devices.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .input_devices()
            .map_err(|e| CaptureError::Other(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .collect();
        Ok(devices)
    }
}

#[async_trait]
impl AudioSource for MicSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::Other("capture already running".to_string()));
        }

        info!(
            sample_rate = self.config.sample_rate,
            channels = self.config.channels,
            chunk_ms = self.config.chunk_ms,
            echo_cancellation = self.config.echo_cancellation,
            noise_suppression = self.config.noise_suppression,
            "Starting microphone capture"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let config = self.config.clone();
        let join = std::thread::Builder::new()
            .name("pushtalk-capture".to_string())
            .spawn(move || run_capture(config, ready_tx, chunk_tx, stop_rx))
            .map_err(|e| CaptureError::Other(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.worker = Some(Worker { stop_tx, join });
                info!("Microphone capture started");
                Ok(chunk_rx)
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            // Capture thread died before reporting readiness
            Err(_) => {
                let _ = join.join();
                Err(CaptureError::Other("capture thread exited".to_string()))
            }
        }
    }

    async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        info!("Stopping microphone capture");

        // Wake the capture thread; it drops the stream (releasing the device
        // and silencing the callback) before exiting.
        let _ = worker.stop_tx.send(());
        let _ = tokio::task::spawn_blocking(move || worker.join.join()).await;

        info!("Microphone capture stopped");
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// Accumulates mono target-rate samples and emits fixed-duration chunks.
struct ChunkAssembler {
    buf: Vec<i16>,
    chunk_samples: usize,
    chunks_sent: u64,
    config: CaptureConfig,
    tx: mpsc::Sender<AudioChunk>,
}

impl ChunkAssembler {
    fn new(config: CaptureConfig, tx: mpsc::Sender<AudioChunk>) -> Self {
        let chunk_samples =
            (config.sample_rate as u64 * config.chunk_ms / 1000).max(1) as usize;
        Self {
            buf: Vec::with_capacity(chunk_samples * 2),
            chunk_samples,
            chunks_sent: 0,
            config,
            tx,
        }
    }

    fn push(&mut self, sample: i16) {
        self.buf.push(sample);
        while self.buf.len() >= self.chunk_samples {
            let rest = self.buf.split_off(self.chunk_samples);
            let samples = std::mem::replace(&mut self.buf, rest);
            let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

            let chunk = AudioChunk {
                pcm,
                timestamp_ms: self.chunks_sent * self.config.chunk_ms,
                sample_rate: self.config.sample_rate,
                channels: self.config.channels,
            };
            self.chunks_sent += 1;

            // The callback runs on the audio thread and must not block.
            if self.tx.try_send(chunk).is_err() {
                warn!("Audio chunk dropped: consumer is behind or gone");
            }
        }
    }
}

fn run_capture(
    config: CaptureConfig,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_stream(&config, chunk_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(map_play_error(e)));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Park until stop() signals (or the source is dropped).
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream(
    config: &CaptureConfig,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    // Echo cancellation / noise suppression are requested as part of the
    // capture policy; cpal exposes no knob for them, so the OS input path
    // applies them where supported.
    let supported = device
        .default_input_config()
        .map_err(map_config_error)?;

    let device_rate = supported.sample_rate().0;
    let device_channels = supported.channels() as usize;
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    info!(
        device = device.name().unwrap_or_else(|_| "unknown".to_string()),
        device_rate,
        device_channels,
        format = ?sample_format,
        "Microphone device configured"
    );

    if device_rate < config.sample_rate {
        warn!(
            device_rate,
            target_rate = config.sample_rate,
            "Input device is slower than the target rate; audio is forwarded as-is"
        );
    }

    let mut assembler = ChunkAssembler::new(config.clone(), chunk_tx);
    let mut downsampler = Downsampler::new(device_rate, config.sample_rate);

    let err_fn = |err: cpal::StreamError| {
        warn!("Audio stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(device_channels) {
                        if downsampler.keep() {
                            assembler.push(mix_to_mono_f32(frame));
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(map_build_error)?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(device_channels) {
                        if downsampler.keep() {
                            assembler.push(mix_to_mono_i16(frame));
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(map_build_error)?,
        other => {
            return Err(CaptureError::Other(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    Ok(stream)
}

/// Picks which device frames to keep so the output lands on the target
/// rate.
///
/// A rate accumulator rather than an integer divisor: a 44.1 kHz device
/// still yields 16 kHz output, where a truncated ratio would produce
/// 22.05 kHz mislabeled as the target rate. Devices slower than the target
/// pass every frame through; there is no upsampling.
struct Downsampler {
    device_rate: u32,
    target_rate: u32,
    acc: u32,
}

impl Downsampler {
    fn new(device_rate: u32, target_rate: u32) -> Self {
        Self {
            device_rate,
            target_rate: target_rate.min(device_rate),
            acc: 0,
        }
    }

    fn keep(&mut self) -> bool {
        self.acc += self.target_rate;
        if self.acc >= self.device_rate {
            self.acc -= self.device_rate;
            true
        } else {
            false
        }
    }
}

/// Average all channels of one frame into a single i16 sample.
fn mix_to_mono_f32(frame: &[f32]) -> i16 {
    if frame.is_empty() {
        return 0;
    }
    let sum: f32 = frame.iter().sum();
    let avg = sum / frame.len() as f32;
    (avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn mix_to_mono_i16(frame: &[i16]) -> i16 {
    if frame.is_empty() {
        return 0;
    }
    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
    (sum / frame.len() as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn looks_like_permission(description: &str) -> bool {
    let text = description.to_lowercase();
    text.contains("permission") || text.contains("denied") || text.contains("not permitted")
}

fn map_config_error(e: cpal::DefaultStreamConfigError) -> CaptureError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::NoDevice,
        cpal::DefaultStreamConfigError::BackendSpecific { err }
            if looks_like_permission(&err.description) =>
        {
            CaptureError::PermissionDenied
        }
        other => CaptureError::Other(other.to_string()),
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> CaptureError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NoDevice,
        cpal::BuildStreamError::BackendSpecific { err }
            if looks_like_permission(&err.description) =>
        {
            CaptureError::PermissionDenied
        }
        other => CaptureError::Other(other.to_string()),
    }
}

fn map_play_error(e: cpal::PlayStreamError) -> CaptureError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => CaptureError::NoDevice,
        cpal::PlayStreamError::BackendSpecific { err }
            if looks_like_permission(&err.description) =>
        {
            CaptureError::PermissionDenied
        }
        other => CaptureError::Other(other.to_string()),
    }
}
