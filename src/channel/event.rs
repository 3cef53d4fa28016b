use serde::{Deserialize, Serialize};

/// A unit of recognition output.
///
/// Multiple events may describe overlapping spans of speech; a final event
/// supersedes all prior events of the same or earlier span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Event numbering from the remote engine, when present. Used to drop
    /// stale events delivered out of order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            sequence: None,
        }
    }

    pub fn final_result(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            sequence: None,
        }
    }
}

/// Inbound frame from the streaming recognition endpoint.
///
/// The wire format nests the transcript in the first alternative of a
/// per-channel result, alongside a final-result flag:
/// `{"channel":{"alternatives":[{"transcript":"..."}]},"is_final":true}`.
#[derive(Debug, Deserialize)]
struct ListenFrame {
    channel: ListenChannel,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
}

/// Decode one inbound text frame. Returns `None` for malformed frames and
/// for control frames that carry no transcript (metadata, keepalives).
pub fn decode_listen_frame(payload: &str) -> Option<TranscriptEvent> {
    let frame: ListenFrame = serde_json::from_str(payload).ok()?;
    let alternative = frame.channel.alternatives.into_iter().next()?;

    Some(TranscriptEvent {
        text: alternative.transcript,
        is_final: frame.is_final,
        sequence: None,
    })
}
