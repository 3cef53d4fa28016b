use serde::{Deserialize, Serialize};

use crate::channel::TranscriptEvent;

/// The reconciled, UI-visible output.
///
/// Within one session `final_text` never shrinks or loses committed content;
/// `interim_text` is replaced wholesale by the latest non-final event and
/// cleared whenever a final event commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub final_text: String,
    pub interim_text: String,
}

/// Reconciles raw transcript events into a monotonically improving
/// transcript.
///
/// Committed text is re-derived from the cumulative set of final spans
/// rather than blindly concatenated, so a span reported more than once is
/// never duplicated. An engine that re-reports a growing final ("hello",
/// then "hello world") supersedes the earlier span instead of repeating it.
#[derive(Debug, Default)]
pub struct TranscriptReconciler {
    final_spans: Vec<String>,
    committed: String,
    interim: String,
    last_final_sequence: Option<u64>,
}

impl TranscriptReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns true when the visible transcript changed.
    pub fn apply(&mut self, event: &TranscriptEvent) -> bool {
        let text = event.text.trim();

        // Transient empty frames must not clear displayed text.
        if text.is_empty() {
            return false;
        }

        // Events numbered before the newest committed final are stale.
        if let (Some(sequence), Some(last)) = (event.sequence, self.last_final_sequence) {
            if sequence < last {
                return false;
            }
        }

        if event.is_final {
            self.apply_final(text, event.sequence)
        } else {
            self.apply_interim(text)
        }
    }

    fn apply_interim(&mut self, text: &str) -> bool {
        if self.interim == text {
            return false;
        }
        self.interim = text.to_string();
        true
    }

    fn apply_final(&mut self, text: &str, sequence: Option<u64>) -> bool {
        if let Some(sequence) = sequence {
            self.last_final_sequence = Some(
                self.last_final_sequence
                    .map_or(sequence, |last| last.max(sequence)),
            );
        }

        enum SpanAction {
            ReplaceLast,
            Ignore,
            Push,
        }

        let action = match self.final_spans.last() {
            // Growing re-report of the latest span supersedes it.
            Some(last) if text.starts_with(last.as_str()) => {
                if text == last.as_str() {
                    SpanAction::Ignore
                } else {
                    SpanAction::ReplaceLast
                }
            }
            // The latest span already covers this event.
            Some(last) if last.as_str().starts_with(text) => SpanAction::Ignore,
            // An already-committed span re-delivered out of order.
            _ if self.final_spans.iter().any(|span| span == text) => SpanAction::Ignore,
            _ => SpanAction::Push,
        };

        match action {
            SpanAction::ReplaceLast => {
                if let Some(last) = self.final_spans.last_mut() {
                    *last = text.to_string();
                }
            }
            SpanAction::Push => self.final_spans.push(text.to_string()),
            SpanAction::Ignore => {}
        }

        let derived = self.final_spans.join(" ");
        let committed_changed = derived != self.committed;
        if committed_changed {
            self.committed = derived;
        }

        // A final result always retires the provisional text.
        let interim_cleared = !self.interim.is_empty();
        self.interim.clear();

        committed_changed || interim_cleared
    }

    pub fn current(&self) -> Transcript {
        Transcript {
            final_text: self.committed.clone(),
            interim_text: self.interim.clone(),
        }
    }

    /// Reset for a new session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
