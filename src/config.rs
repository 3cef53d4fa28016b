use anyhow::Result;
use serde::Deserialize;

use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct RecognitionConfig {
    pub streaming_endpoint: String,
    pub http_endpoint: String,
    pub api_key: Option<String>,
    pub interim_results: bool,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Build a session configuration from the loaded file, generating a
    /// fresh session id.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            chunk_ms: self.audio.chunk_ms,
            streaming_endpoint: self.recognition.streaming_endpoint.clone(),
            http_endpoint: self.recognition.http_endpoint.clone(),
            api_key: self.recognition.api_key.clone(),
            interim_results: self.recognition.interim_results,
            ..SessionConfig::default()
        }
    }
}
