use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ChannelError, ChannelSignal, RecognitionChannel, TranscriptEvent};
use crate::audio::AudioChunk;

/// Delay before the single restart retry after a failed restart.
const RESTART_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How long `close()` waits for the supervisor task to wind down.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Events from the underlying continuous-recognition primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Result { text: String, is_final: bool },
    /// The primitive terminated its current run (silence, device hiccup).
    Ended,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognizerError {
    /// Start was called while a run is already pending or active.
    #[error("recognizer is already running")]
    AlreadyRunning,
    #[error("recognizer failed: {0}")]
    Failed(String),
}

/// The platform continuous-recognition primitive.
///
/// The primitive manages its own turn-taking and may end a run on its own
/// while the caller still wants capture to continue; [`LocalChannel`] owns
/// the restart policy around it.
#[async_trait]
pub trait SpeechRecognizer: Send {
    /// Begin a recognition run. Events for the run arrive on the returned
    /// receiver until the run ends.
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<RecognizerEvent>, RecognizerError>;

    /// Push captured audio into the current run.
    async fn feed(&mut self, chunk: AudioChunk);

    async fn stop(&mut self);
}

enum Restart {
    Started(mpsc::UnboundedReceiver<RecognizerEvent>),
    AlreadyRunning,
    Failed(String),
}

/// Local recognition transport.
///
/// Restarts the underlying recognizer whenever it ends while the channel is
/// still open, guarded so a start is never issued while one is pending or
/// active. A restart failure is retried once after a short delay; a second
/// failure surfaces `ChannelError::Unrecoverable`. The pending retry is
/// cancelled by `close()`.
pub struct LocalChannel {
    recognizer: Arc<Mutex<Box<dyn SpeechRecognizer>>>,
    running: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    supervisor: Option<JoinHandle<()>>,
}

impl LocalChannel {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer: Arc::new(Mutex::new(recognizer)),
            running: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            close_notify: Arc::new(Notify::new()),
            supervisor: None,
        }
    }
}

#[async_trait]
impl RecognitionChannel for LocalChannel {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<ChannelSignal>, ChannelError> {
        if self.supervisor.is_some() {
            return Err(ChannelError::ConnectFailed(
                "channel is already open".to_string(),
            ));
        }

        info!("Starting local recognizer");
        self.closing.store(false, Ordering::SeqCst);

        let rec_rx = {
            let mut recognizer = self.recognizer.lock().await;
            self.running.store(true, Ordering::SeqCst);
            match recognizer.start().await {
                Ok(rx) => rx,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(ChannelError::ConnectFailed(e.to_string()));
                }
            }
        };

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let recognizer = Arc::clone(&self.recognizer);
        let running = Arc::clone(&self.running);
        let closing = Arc::clone(&self.closing);
        let close_notify = Arc::clone(&self.close_notify);

        self.supervisor = Some(tokio::spawn(supervise(
            recognizer,
            running,
            closing,
            close_notify,
            signal_tx,
            rec_rx,
        )));

        Ok(signal_rx)
    }

    async fn send(&mut self, chunk: AudioChunk) {
        if self.supervisor.is_none() || !self.running.load(Ordering::SeqCst) {
            debug!("Dropping audio chunk: local recognizer not running");
            return;
        }
        self.recognizer.lock().await.feed(chunk).await;
    }

    async fn close(&mut self) {
        let Some(mut supervisor) = self.supervisor.take() else {
            return;
        };

        info!("Closing local recognition channel");

        self.closing.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();

        self.recognizer.lock().await.stop().await;
        self.running.store(false, Ordering::SeqCst);

        if tokio::time::timeout(CLOSE_GRACE, &mut supervisor)
            .await
            .is_err()
        {
            supervisor.abort();
        }

        info!("Local recognition channel closed");
    }

    fn name(&self) -> &str {
        "local recognizer"
    }
}

/// Consume recognizer events, forwarding results and restarting ended runs.
async fn supervise(
    recognizer: Arc<Mutex<Box<dyn SpeechRecognizer>>>,
    running: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    signal_tx: mpsc::UnboundedSender<ChannelSignal>,
    mut rec_rx: mpsc::UnboundedReceiver<RecognizerEvent>,
) {
    loop {
        let event = tokio::select! {
            event = rec_rx.recv() => event,
            _ = close_notify.notified() => return,
        };

        match event {
            Some(RecognizerEvent::Result { text, is_final }) => {
                let event = TranscriptEvent {
                    text,
                    is_final,
                    sequence: None,
                };
                if signal_tx.send(ChannelSignal::Event(event)).is_err() {
                    return;
                }
            }
            Some(RecognizerEvent::Error(message)) => {
                // A terminated run follows; the restart path handles it.
                warn!("Local recognizer error: {}", message);
            }
            Some(RecognizerEvent::Ended) | None => {
                running.store(false, Ordering::SeqCst);
                if closing.load(Ordering::SeqCst) {
                    return;
                }

                info!("Local recognizer ended while session active; restarting");
                match restart(&recognizer, &running).await {
                    Restart::Started(rx) => rec_rx = rx,
                    Restart::AlreadyRunning => {
                        debug!("Restart skipped: a start is already pending");
                        return;
                    }
                    Restart::Failed(first) => {
                        warn!("Local recognizer restart failed: {}; retrying once", first);

                        tokio::select! {
                            _ = tokio::time::sleep(RESTART_RETRY_DELAY) => {}
                            _ = close_notify.notified() => return,
                        }
                        if closing.load(Ordering::SeqCst) {
                            return;
                        }

                        match restart(&recognizer, &running).await {
                            Restart::Started(rx) => rec_rx = rx,
                            Restart::AlreadyRunning => {
                                debug!("Restart skipped: a start is already pending");
                                return;
                            }
                            Restart::Failed(second) => {
                                warn!("Local recognizer restart failed twice: {}", second);
                                let _ = signal_tx.send(ChannelSignal::Closed(
                                    ChannelError::Unrecoverable(second),
                                ));
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn restart(
    recognizer: &Arc<Mutex<Box<dyn SpeechRecognizer>>>,
    running: &Arc<AtomicBool>,
) -> Restart {
    // Never issue a start while one is pending or active.
    if running.swap(true, Ordering::SeqCst) {
        return Restart::AlreadyRunning;
    }

    let mut recognizer = recognizer.lock().await;
    match recognizer.start().await {
        Ok(rx) => Restart::Started(rx),
        Err(RecognizerError::AlreadyRunning) => Restart::AlreadyRunning,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            Restart::Failed(e.to_string())
        }
    }
}
