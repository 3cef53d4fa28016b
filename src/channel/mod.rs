//! Recognition channel: push audio in, receive transcript events out.
//!
//! Two transports implement the same contract: a streaming websocket to a
//! remote recognition endpoint, and a wrapper over a local continuous
//! recognizer. The session controller picks one at open time and never
//! switches mid-session.

pub mod event;
pub mod local;
pub mod streaming;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::AudioChunk;
pub use event::TranscriptEvent;
pub use local::{LocalChannel, RecognizerError, RecognizerEvent, SpeechRecognizer};
pub use streaming::StreamingChannel;

/// Channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("could not connect to the recognition service: {0}")]
    ConnectFailed(String),
    #[error("recognition stopped and could not be restarted: {0}")]
    Unrecoverable(String),
    #[error("the recognition service closed the connection")]
    RemoteClosed,
    /// Malformed inbound frames are logged and dropped, never fatal.
    #[error("malformed recognition frame")]
    Malformed,
}

/// What a channel delivers to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Event(TranscriptEvent),
    /// The channel closed on its own, not via `close()`.
    Closed(ChannelError),
}

/// Capability contract shared by both transports.
///
/// `send` never fails: audio pushed into a channel that is not open is
/// silently dropped. `close` is idempotent and cancels any pending internal
/// restart timer.
#[async_trait]
pub trait RecognitionChannel: Send {
    /// Open the channel. Audio must not be forwarded until this completes.
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<ChannelSignal>, ChannelError>;

    async fn send(&mut self, chunk: AudioChunk);

    async fn close(&mut self);

    /// Channel name for logging
    fn name(&self) -> &str;
}
