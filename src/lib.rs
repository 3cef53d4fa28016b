pub mod audio;
pub mod channel;
pub mod config;
pub mod session;
pub mod transcript;

pub use audio::{AudioChunk, AudioSource, CaptureConfig, CaptureError, MicSource};
pub use channel::{
    ChannelError, ChannelSignal, LocalChannel, RecognitionChannel, RecognizerError,
    RecognizerEvent, SpeechRecognizer, StreamingChannel, TranscriptEvent,
};
pub use config::Config;
pub use session::{
    ErrorKind, SessionConfig, SessionController, SessionError, SessionFailure, SessionState,
    SessionStats, SessionUpdate,
};
pub use transcript::{Transcript, TranscriptReconciler};
