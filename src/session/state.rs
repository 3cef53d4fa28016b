use thiserror::Error;

use crate::audio::CaptureError;
use crate::channel::ChannelError;
use crate::transcript::Transcript;

/// Session lifecycle states.
///
/// Exactly one session may be Active at a time per controller. Capture is
/// running iff the state is Starting/Active/Stopping, and a channel exists
/// under the same states.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Failed(SessionFailure),
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFailure {
    Capture(CaptureError),
    Channel(ChannelError),
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFailure::Capture(e) => write!(f, "{e}"),
            SessionFailure::Channel(e) => write!(f, "{e}"),
        }
    }
}

/// Precondition failures of `start()`. Runtime capture/connect failures are
/// surfaced through `SessionUpdate::Error` and the Failed state instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a session is already starting or active")]
    NotReady,
    #[error("no usable recognition transport: {0}")]
    Misconfigured(String),
}

/// Which collaborator an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Capture,
    Channel,
    Finalize,
}

/// Messages pushed to the UI collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged(SessionState),
    TranscriptUpdated(Transcript),
    Error { kind: ErrorKind, message: String },
}
