use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a transcription session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether a session is currently active
    pub is_active: bool,

    /// When the current (or last) session started
    pub started_at: Option<DateTime<Utc>>,

    /// Session duration in seconds
    pub duration_secs: f64,

    /// Number of audio chunks forwarded to the recognition channel
    pub chunks_forwarded: usize,

    /// Number of transcript events reconciled
    pub events_reconciled: usize,
}
