use serde::{Deserialize, Serialize};

/// Configuration for one capture-and-transcribe session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: String,

    /// Sample rate for capture and recognition (engines expect 16kHz)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono)
    pub channels: u16,

    /// Capture chunk cadence in milliseconds
    pub chunk_ms: u64,

    /// Streaming recognition endpoint (wss://)
    pub streaming_endpoint: String,

    /// Non-streaming endpoint used for the best-effort finalize pass
    pub http_endpoint: String,

    /// Bearer-style credential for the remote endpoint. Absent means the
    /// streaming transport is unavailable.
    pub api_key: Option<String>,

    /// Ask the remote engine for interim results
    pub interim_results: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            sample_rate: 16000,
            channels: 1,
            chunk_ms: 100,
            streaming_endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            http_endpoint: "https://api.deepgram.com/v1/listen".to_string(),
            api_key: None,
            interim_results: true,
        }
    }
}
