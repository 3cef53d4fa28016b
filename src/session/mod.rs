//! Transcription session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Microphone capture lifecycle
//! - Recognition channel selection and forwarding
//! - Transcript reconciliation and updates to the UI collaborator
//! - The best-effort finalize pass at stop
//! - Session state and statistics

mod config;
mod finalize;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use finalize::HttpTranscriber;
pub use session::{AudioSourceFactory, ChannelFactory, SessionController};
pub use state::{ErrorKind, SessionError, SessionFailure, SessionState, SessionUpdate};
pub use stats::SessionStats;
