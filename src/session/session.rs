use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::SessionConfig;
use super::finalize::HttpTranscriber;
use super::state::{ErrorKind, SessionError, SessionFailure, SessionState, SessionUpdate};
use super::stats::SessionStats;
use crate::audio::{AudioChunk, AudioSource, CaptureConfig, MicSource};
use crate::channel::{ChannelSignal, RecognitionChannel, StreamingChannel, TranscriptEvent};
use crate::transcript::{Transcript, TranscriptReconciler};

/// Produces a fresh capture source for each session.
pub type AudioSourceFactory = Box<dyn Fn() -> Box<dyn AudioSource> + Send + Sync>;

/// Produces the recognition channel for a session, or `Misconfigured` when
/// no usable transport is available. Called once per `start()`; the variant
/// is never renegotiated mid-session.
pub type ChannelFactory =
    Box<dyn Fn() -> Result<Box<dyn RecognitionChannel>, SessionError> + Send + Sync>;

/// Cap on audio retained for the finalize pass (two minutes of 16kHz mono).
const MAX_FINALIZE_BYTES: usize = 16000 * 2 * 120;

/// The finalize pass is bounded: one attempt, then the stop proceeds.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `stop()` waits for the forwarding/event tasks before aborting
/// them, so a misbehaving transport cannot wedge teardown.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Orchestrates capture, recognition and reconciliation across one session
/// lifecycle. The only component the UI collaborator talks to.
///
/// Updates flow to the collaborator over the unbounded channel supplied at
/// construction: state changes, reconciled transcripts, errors.
pub struct SessionController {
    config: SessionConfig,

    /// Updates pushed to the UI collaborator
    updates: mpsc::UnboundedSender<SessionUpdate>,

    /// Session state; also the guard that rejects concurrent starts
    state: Arc<Mutex<SessionState>>,

    /// Capture source while the session holds the microphone
    audio: Arc<Mutex<Option<Box<dyn AudioSource>>>>,

    /// Recognition channel while one exists
    channel: Arc<Mutex<Option<Box<dyn RecognitionChannel>>>>,

    reconciler: Arc<Mutex<TranscriptReconciler>>,

    /// Handle for the audio forwarding task
    forward_task: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Handle for the transcript event task
    event_task: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Session audio retained for the finalize pass
    capture_buffer: Arc<Mutex<Vec<u8>>>,

    chunks_forwarded: Arc<AtomicUsize>,
    events_reconciled: Arc<AtomicUsize>,
    started_at: Arc<Mutex<Option<DateTime<Utc>>>>,

    audio_factory: AudioSourceFactory,
    channel_factory: ChannelFactory,

    /// Present iff the streaming transport is configured
    finalizer: Option<Arc<HttpTranscriber>>,
}

impl SessionController {
    /// Controller wired to the default transports: cpal microphone capture
    /// and, when a credential is configured, the streaming websocket.
    pub fn new(config: SessionConfig, updates: mpsc::UnboundedSender<SessionUpdate>) -> Self {
        let capture_config = CaptureConfig {
            sample_rate: config.sample_rate,
            channels: config.channels,
            chunk_ms: config.chunk_ms,
            ..CaptureConfig::default()
        };
        let audio_factory: AudioSourceFactory =
            Box::new(move || Box::new(MicSource::new(capture_config.clone())));

        let endpoint = config.streaming_endpoint.clone();
        let api_key = config.api_key.clone();
        let sample_rate = config.sample_rate;
        let channels = config.channels;
        let interim_results = config.interim_results;
        let channel_factory: ChannelFactory = Box::new(move || match &api_key {
            Some(key) => Ok(Box::new(StreamingChannel::new(
                endpoint.clone(),
                key.clone(),
                sample_rate,
                channels,
                interim_results,
            ))),
            None => Err(SessionError::Misconfigured(
                "no API key configured for the streaming transport".to_string(),
            )),
        });

        let finalizer = config
            .api_key
            .clone()
            .map(|key| Arc::new(HttpTranscriber::new(config.http_endpoint.clone(), key)));

        Self::with_parts(config, updates, audio_factory, channel_factory, finalizer)
    }

    /// Controller with caller-supplied transports. Hosts that embed a local
    /// recognizer pass a factory producing a `LocalChannel` here; tests pass
    /// fakes.
    pub fn with_parts(
        config: SessionConfig,
        updates: mpsc::UnboundedSender<SessionUpdate>,
        audio_factory: AudioSourceFactory,
        channel_factory: ChannelFactory,
        finalizer: Option<Arc<HttpTranscriber>>,
    ) -> Self {
        Self {
            config,
            updates,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            audio: Arc::new(Mutex::new(None)),
            channel: Arc::new(Mutex::new(None)),
            reconciler: Arc::new(Mutex::new(TranscriptReconciler::new())),
            forward_task: Arc::new(Mutex::new(None)),
            event_task: Arc::new(Mutex::new(None)),
            capture_buffer: Arc::new(Mutex::new(Vec::new())),
            chunks_forwarded: Arc::new(AtomicUsize::new(0)),
            events_reconciled: Arc::new(AtomicUsize::new(0)),
            started_at: Arc::new(Mutex::new(None)),
            audio_factory,
            channel_factory,
            finalizer,
        }
    }

    /// Start a session.
    ///
    /// Rejects with `NotReady` while a session is starting, active or
    /// stopping, and with `Misconfigured` when no transport is available.
    /// Capture and connect failures do not return an error here: they put
    /// the session in `Failed` and surface a specific error update.
    pub async fn start(&self) -> Result<(), SessionError> {
        // Resolve the transport before touching any resource so that a
        // misconfiguration leaves the previous state intact.
        let mut channel = {
            let mut state = self.state.lock().await;
            match *state {
                SessionState::Idle | SessionState::Failed(_) => {}
                _ => return Err(SessionError::NotReady),
            }
            let channel = (self.channel_factory)()?;
            *state = SessionState::Starting;
            channel
        };
        self.emit(SessionUpdate::StateChanged(SessionState::Starting));

        info!(
            session_id = %self.config.session_id,
            channel = channel.name(),
            "Starting transcription session"
        );

        self.reconciler.lock().await.reset();
        self.capture_buffer.lock().await.clear();
        self.chunks_forwarded.store(0, Ordering::SeqCst);
        self.events_reconciled.store(0, Ordering::SeqCst);
        *self.started_at.lock().await = Some(Utc::now());

        // Capture first: a permission or device failure must never open a
        // recognition socket.
        let mut source = (self.audio_factory)();
        let chunk_rx = match source.start().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Audio capture failed to start: {}", e);
                source.stop().await;
                self.fail(SessionFailure::Capture(e), ErrorKind::Capture).await;
                return Ok(());
            }
        };

        // A stop() issued mid-start wins: release what was just acquired
        // and leave the state wherever stop() put it.
        if !self.still_starting().await {
            info!("Session stopped during startup; releasing capture");
            source.stop().await;
            return Ok(());
        }

        // Connection open completes (or fails) before any audio is forwarded.
        let signal_rx = match channel.open().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Recognition channel failed to open: {}", e);
                source.stop().await;
                self.fail(SessionFailure::Channel(e), ErrorKind::Channel).await;
                return Ok(());
            }
        };

        // Store the resources and go Active under the state lock, so a
        // concurrent stop() either sees Starting with nothing stored yet or
        // Active with both slots populated.
        {
            let mut state = self.state.lock().await;
            if *state != SessionState::Starting {
                drop(state);
                info!("Session stopped during startup; releasing capture and channel");
                source.stop().await;
                channel.close().await;
                return Ok(());
            }
            *self.audio.lock().await = Some(source);
            *self.channel.lock().await = Some(channel);
            *state = SessionState::Active;
        }
        self.emit(SessionUpdate::StateChanged(SessionState::Active));
        info!("Transcription session active");

        self.spawn_forward_task(chunk_rx).await;
        self.spawn_event_task(signal_rx).await;

        Ok(())
    }

    /// Stop the session. Safe to call in any state, including mid-start;
    /// always ends with no microphone or channel held and state Idle.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            match *state {
                SessionState::Idle | SessionState::Stopping => return,
                _ => {}
            }
            std::mem::replace(&mut *state, SessionState::Stopping)
        };
        self.emit(SessionUpdate::StateChanged(SessionState::Stopping));

        info!(session_id = %self.config.session_id, "Stopping transcription session");

        // Audio first, so no further chunks are produced.
        if let Some(mut source) = self.audio.lock().await.take() {
            source.stop().await;
        }

        // The forwarding task drains and exits once capture closes.
        if let Some(task) = self.forward_task.lock().await.take() {
            await_or_abort(task).await;
        }

        // Best-effort finalize over buffered audio before the channel goes
        // away. One bounded attempt; failure is reported but never blocks
        // the transition to Idle.
        if matches!(previous, SessionState::Active) {
            self.run_finalize_pass().await;
        }

        if let Some(mut channel) = self.channel.lock().await.take() {
            channel.close().await;
        }

        // The event task ends once the channel's senders are gone.
        if let Some(task) = self.event_task.lock().await.take() {
            await_or_abort(task).await;
        }

        {
            let mut state = self.state.lock().await;
            *state = SessionState::Idle;
        }
        self.emit(SessionUpdate::StateChanged(SessionState::Idle));

        info!("Transcription session stopped");
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// The reconciled transcript as of now.
    pub async fn transcript(&self) -> Transcript {
        self.reconciler.lock().await.current()
    }

    pub async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await.clone();
        let started_at = *self.started_at.lock().await;
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            is_active: matches!(state, SessionState::Active),
            started_at,
            duration_secs,
            chunks_forwarded: self.chunks_forwarded.load(Ordering::SeqCst),
            events_reconciled: self.events_reconciled.load(Ordering::SeqCst),
        }
    }

    fn emit(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    async fn still_starting(&self) -> bool {
        *self.state.lock().await == SessionState::Starting
    }

    async fn fail(&self, failure: SessionFailure, kind: ErrorKind) {
        let message = failure.to_string();
        {
            let mut state = self.state.lock().await;
            // A stop() issued mid-start already resolved the session; keep
            // its outcome.
            if *state != SessionState::Starting {
                return;
            }
            *state = SessionState::Failed(failure.clone());
        }
        self.emit(SessionUpdate::Error { kind, message });
        self.emit(SessionUpdate::StateChanged(SessionState::Failed(failure)));
    }

    /// Forward captured chunks to the channel in capture order, retaining a
    /// bounded copy for the finalize pass.
    async fn spawn_forward_task(&self, mut chunk_rx: mpsc::Receiver<AudioChunk>) {
        let channel = Arc::clone(&self.channel);
        let buffer = Arc::clone(&self.capture_buffer);
        let chunks_forwarded = Arc::clone(&self.chunks_forwarded);

        let task = tokio::spawn(async move {
            info!("Audio forwarding task started");

            while let Some(chunk) = chunk_rx.recv().await {
                {
                    let mut buffer = buffer.lock().await;
                    if buffer.len() < MAX_FINALIZE_BYTES {
                        buffer.extend_from_slice(&chunk.pcm);
                    }
                }

                let mut channel = channel.lock().await;
                if let Some(channel) = channel.as_mut() {
                    channel.send(chunk).await;
                    chunks_forwarded.fetch_add(1, Ordering::SeqCst);
                }
            }

            info!("Audio forwarding task stopped");
        });

        *self.forward_task.lock().await = Some(task);
    }

    /// Reconcile inbound events and surface transcript updates; a
    /// spontaneous channel close fails the session.
    async fn spawn_event_task(&self, mut signal_rx: mpsc::UnboundedReceiver<ChannelSignal>) {
        let state = Arc::clone(&self.state);
        let audio = Arc::clone(&self.audio);
        let channel = Arc::clone(&self.channel);
        let reconciler = Arc::clone(&self.reconciler);
        let events_reconciled = Arc::clone(&self.events_reconciled);
        let updates = self.updates.clone();

        let task = tokio::spawn(async move {
            info!("Transcript event task started");

            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    ChannelSignal::Event(event) => {
                        let (changed, transcript) = {
                            let mut reconciler = reconciler.lock().await;
                            let changed = reconciler.apply(&event);
                            (changed, reconciler.current())
                        };
                        events_reconciled.fetch_add(1, Ordering::SeqCst);

                        if changed {
                            let _ = updates.send(SessionUpdate::TranscriptUpdated(transcript));
                        }
                    }
                    ChannelSignal::Closed(err) => {
                        let failed = {
                            let mut state = state.lock().await;
                            if *state == SessionState::Active {
                                *state =
                                    SessionState::Failed(SessionFailure::Channel(err.clone()));
                                true
                            } else {
                                false
                            }
                        };

                        if failed {
                            warn!("Recognition channel closed spontaneously: {}", err);

                            // No further capture once the channel is gone.
                            if let Some(mut source) = audio.lock().await.take() {
                                source.stop().await;
                            }

                            // Release our end of the channel too; nothing
                            // may linger through Failed.
                            if let Some(mut channel) = channel.lock().await.take() {
                                channel.close().await;
                            }

                            let _ = updates.send(SessionUpdate::Error {
                                kind: ErrorKind::Channel,
                                message: err.to_string(),
                            });
                            let _ = updates.send(SessionUpdate::StateChanged(
                                SessionState::Failed(SessionFailure::Channel(err)),
                            ));
                        }
                        break;
                    }
                }
            }

            info!("Transcript event task stopped");
        });

        *self.event_task.lock().await = Some(task);
    }

    async fn run_finalize_pass(&self) {
        let Some(finalizer) = &self.finalizer else {
            return;
        };

        let pcm = std::mem::take(&mut *self.capture_buffer.lock().await);
        if pcm.is_empty() {
            return;
        }

        let attempt = tokio::time::timeout(
            FINALIZE_TIMEOUT,
            finalizer.transcribe(&pcm, self.config.sample_rate, self.config.channels),
        )
        .await;

        match attempt {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                let event = TranscriptEvent::final_result(text);
                let (changed, transcript) = {
                    let mut reconciler = self.reconciler.lock().await;
                    let changed = reconciler.apply(&event);
                    (changed, reconciler.current())
                };
                if changed {
                    info!("Finalize pass committed additional transcript text");
                    self.emit(SessionUpdate::TranscriptUpdated(transcript));
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Finalize pass failed: {:#}", e);
                self.emit(SessionUpdate::Error {
                    kind: ErrorKind::Finalize,
                    message: format!("{e:#}"),
                });
            }
            Err(_) => {
                warn!("Finalize pass timed out");
                self.emit(SessionUpdate::Error {
                    kind: ErrorKind::Finalize,
                    message: "finalize transcription pass timed out".to_string(),
                });
            }
        }
    }
}

/// Wait briefly for a teardown task; abort it if it does not finish.
async fn await_or_abort(mut task: JoinHandle<()>) {
    if tokio::time::timeout(TEARDOWN_GRACE, &mut task).await.is_err() {
        warn!("Teardown task did not finish in time; aborting it");
        task.abort();
    }
}
