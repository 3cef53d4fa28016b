// Integration tests for the session controller state machine.
//
// Capture and recognition are replaced with scripted fakes so lifecycle,
// failure and teardown behavior can be driven deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use pushtalk::audio::{AudioChunk, AudioSource, CaptureError};
use pushtalk::channel::{ChannelError, ChannelSignal, RecognitionChannel, TranscriptEvent};
use pushtalk::session::{
    ErrorKind, SessionConfig, SessionController, SessionError, SessionFailure, SessionState,
    SessionUpdate,
};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct SourceHandles {
    starts: Arc<AtomicUsize>,
    capturing: Arc<AtomicBool>,
    chunk_tx: Arc<StdMutex<Option<mpsc::Sender<AudioChunk>>>>,
    fail_with: Arc<StdMutex<Option<CaptureError>>>,
    start_delay: Arc<StdMutex<Option<Duration>>>,
}

struct FakeSource {
    handles: SourceHandles,
}

#[async_trait]
impl AudioSource for FakeSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError> {
        let delay = *self.handles.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.handles.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        self.handles.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.handles.chunk_tx.lock().unwrap() = Some(tx);
        self.handles.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.handles.capturing.store(false, Ordering::SeqCst);
        self.handles.chunk_tx.lock().unwrap().take();
    }

    fn is_capturing(&self) -> bool {
        self.handles.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "fake source"
    }
}

#[derive(Clone, Default)]
struct ChannelHandles {
    opens: Arc<AtomicUsize>,
    sent: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    signal_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<ChannelSignal>>>>,
    fail_with: Arc<StdMutex<Option<ChannelError>>>,
}

struct FakeChannel {
    handles: ChannelHandles,
}

#[async_trait]
impl RecognitionChannel for FakeChannel {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<ChannelSignal>, ChannelError> {
        if let Some(err) = self.handles.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        self.handles.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.handles.signal_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send(&mut self, _chunk: AudioChunk) {
        self.handles.sent.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&mut self) {
        self.handles.closed.store(true, Ordering::SeqCst);
        self.handles.signal_tx.lock().unwrap().take();
    }

    fn name(&self) -> &str {
        "fake channel"
    }
}

fn build_controller(
    source: SourceHandles,
    channel: ChannelHandles,
) -> (
    SessionController,
    mpsc::UnboundedReceiver<SessionUpdate>,
) {
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let source_factory: pushtalk::session::AudioSourceFactory = {
        let handles = source.clone();
        Box::new(move || {
            Box::new(FakeSource {
                handles: handles.clone(),
            }) as Box<dyn AudioSource>
        })
    };
    let channel_factory: pushtalk::session::ChannelFactory = {
        let handles = channel.clone();
        Box::new(move || {
            Ok(Box::new(FakeChannel {
                handles: handles.clone(),
            }) as Box<dyn RecognitionChannel>)
        })
    };

    let controller = SessionController::with_parts(
        SessionConfig::default(),
        update_tx,
        source_factory,
        channel_factory,
        None,
    );
    (controller, update_rx)
}

async fn wait_for_state<F>(controller: &SessionController, predicate: F)
where
    F: Fn(&SessionState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let state = controller.state().await;
        if predicate(&state) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for state, last state: {state:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn next_transcript_update(
    rx: &mut mpsc::UnboundedReceiver<SessionUpdate>,
) -> pushtalk::Transcript {
    loop {
        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("update channel closed");
        if let SessionUpdate::TranscriptUpdated(transcript) = update {
            return transcript;
        }
    }
}

fn signal_sender(channel: &ChannelHandles) -> mpsc::UnboundedSender<ChannelSignal> {
    channel
        .signal_tx
        .lock()
        .unwrap()
        .clone()
        .expect("channel not open")
}

#[tokio::test]
async fn events_flow_to_transcript_updates() {
    let source = SourceHandles::default();
    let channel = ChannelHandles::default();
    let (controller, mut updates) = build_controller(source.clone(), channel.clone());

    controller.start().await.unwrap();
    assert_eq!(controller.state().await, SessionState::Active);

    let tx = signal_sender(&channel);
    tx.send(ChannelSignal::Event(TranscriptEvent::interim("hel")))
        .unwrap();
    let transcript = next_transcript_update(&mut updates).await;
    assert_eq!(transcript.interim_text, "hel");

    tx.send(ChannelSignal::Event(TranscriptEvent::final_result(
        "hello world",
    )))
    .unwrap();
    let transcript = next_transcript_update(&mut updates).await;
    assert_eq!(transcript.final_text, "hello world");
    assert_eq!(transcript.interim_text, "");

    // Our sender clone would otherwise keep the event task alive past the
    // channel close.
    drop(tx);
    controller.stop().await;
    assert_eq!(controller.state().await, SessionState::Idle);
    assert!(channel.closed.load(Ordering::SeqCst));
    assert!(!source.capturing.load(Ordering::SeqCst));
}

#[tokio::test]
async fn second_start_is_rejected_without_a_second_capture() {
    let source = SourceHandles::default();
    let channel = ChannelHandles::default();
    let (controller, _updates) = build_controller(source.clone(), channel.clone());

    controller.start().await.unwrap();
    let err = controller.start().await.unwrap_err();
    assert_eq!(err, SessionError::NotReady);
    assert_eq!(source.starts.load(Ordering::SeqCst), 1);
    assert_eq!(channel.opens.load(Ordering::SeqCst), 1);

    controller.stop().await;
}

#[tokio::test]
async fn permission_denied_never_opens_the_channel() {
    let source = SourceHandles::default();
    *source.fail_with.lock().unwrap() = Some(CaptureError::PermissionDenied);
    let channel = ChannelHandles::default();
    let (controller, mut updates) = build_controller(source.clone(), channel.clone());

    controller.start().await.unwrap();

    assert_eq!(
        controller.state().await,
        SessionState::Failed(SessionFailure::Capture(CaptureError::PermissionDenied))
    );
    assert_eq!(channel.opens.load(Ordering::SeqCst), 0);

    // The surfaced error names the capture problem specifically.
    let mut saw_capture_error = false;
    while let Ok(update) = updates.try_recv() {
        if let SessionUpdate::Error { kind, message } = update {
            assert_eq!(kind, ErrorKind::Capture);
            assert!(message.contains("denied"));
            saw_capture_error = true;
        }
    }
    assert!(saw_capture_error);
}

#[tokio::test]
async fn connect_failure_releases_the_microphone() {
    let source = SourceHandles::default();
    let channel = ChannelHandles::default();
    *channel.fail_with.lock().unwrap() =
        Some(ChannelError::ConnectFailed("refused".to_string()));
    let (controller, _updates) = build_controller(source.clone(), channel.clone());

    controller.start().await.unwrap();

    assert!(matches!(
        controller.state().await,
        SessionState::Failed(SessionFailure::Channel(ChannelError::ConnectFailed(_)))
    ));
    assert!(!source.capturing.load(Ordering::SeqCst));
}

#[tokio::test]
async fn misconfiguration_is_rejected_before_capture() {
    let source = SourceHandles::default();
    let (update_tx, _update_rx) = mpsc::unbounded_channel();

    let source_factory: pushtalk::session::AudioSourceFactory = {
        let handles = source.clone();
        Box::new(move || {
            Box::new(FakeSource {
                handles: handles.clone(),
            }) as Box<dyn AudioSource>
        })
    };
    let channel_factory: pushtalk::session::ChannelFactory = Box::new(|| {
        Err(SessionError::Misconfigured(
            "no credential".to_string(),
        ))
    });

    let controller = SessionController::with_parts(
        SessionConfig::default(),
        update_tx,
        source_factory,
        channel_factory,
        None,
    );

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, SessionError::Misconfigured(_)));
    assert_eq!(source.starts.load(Ordering::SeqCst), 0);
    assert_eq!(controller.state().await, SessionState::Idle);
}

#[tokio::test]
async fn stop_is_safe_in_every_state() {
    let source = SourceHandles::default();
    let channel = ChannelHandles::default();
    let (controller, _updates) = build_controller(source.clone(), channel.clone());

    // Idle: a no-op.
    controller.stop().await;
    assert_eq!(controller.state().await, SessionState::Idle);

    // Active: full teardown.
    controller.start().await.unwrap();
    controller.stop().await;
    assert_eq!(controller.state().await, SessionState::Idle);
    assert!(!source.capturing.load(Ordering::SeqCst));
    assert!(channel.closed.load(Ordering::SeqCst));

    // Failed: still ends Idle.
    *source.fail_with.lock().unwrap() = Some(CaptureError::NoDevice);
    controller.start().await.unwrap();
    assert!(matches!(controller.state().await, SessionState::Failed(_)));
    controller.stop().await;
    assert_eq!(controller.state().await, SessionState::Idle);
}

#[tokio::test]
async fn stop_during_startup_releases_everything() {
    let source = SourceHandles::default();
    *source.start_delay.lock().unwrap() = Some(Duration::from_millis(100));
    let channel = ChannelHandles::default();
    let (controller, _updates) = build_controller(source.clone(), channel.clone());
    let controller = Arc::new(controller);

    let starter = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start().await })
    };
    wait_for_state(&controller, |state| *state == SessionState::Starting).await;

    // Stop lands while start() is still waiting on capture.
    controller.stop().await;
    starter.await.unwrap().unwrap();

    assert_eq!(controller.state().await, SessionState::Idle);
    assert!(!source.capturing.load(Ordering::SeqCst));
    assert_eq!(channel.opens.load(Ordering::SeqCst), 0);

    // The interrupted start leaves nothing behind that blocks a fresh one.
    controller.start().await.unwrap();
    assert_eq!(controller.state().await, SessionState::Active);
    controller.stop().await;
    assert_eq!(controller.state().await, SessionState::Idle);
}

#[tokio::test]
async fn spontaneous_close_fails_the_session_and_allows_restart() {
    let source = SourceHandles::default();
    let channel = ChannelHandles::default();
    let (controller, mut updates) = build_controller(source.clone(), channel.clone());

    controller.start().await.unwrap();

    signal_sender(&channel)
        .send(ChannelSignal::Closed(ChannelError::RemoteClosed))
        .unwrap();

    wait_for_state(&controller, |state| {
        matches!(state, SessionState::Failed(SessionFailure::Channel(_)))
    })
    .await;
    assert!(!source.capturing.load(Ordering::SeqCst));

    // The dead channel is released as part of failing, not kept around
    // until the next stop().
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !channel.closed.load(Ordering::SeqCst) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "channel not released after failure"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut saw_channel_error = false;
    while let Ok(update) = updates.try_recv() {
        if let SessionUpdate::Error { kind, .. } = update {
            saw_channel_error = kind == ErrorKind::Channel;
        }
    }
    assert!(saw_channel_error);

    // A fresh start from Failed works.
    controller.start().await.unwrap();
    assert_eq!(controller.state().await, SessionState::Active);
    assert_eq!(channel.opens.load(Ordering::SeqCst), 2);

    controller.stop().await;
}

#[tokio::test]
async fn chunks_are_forwarded_while_active() {
    let source = SourceHandles::default();
    let channel = ChannelHandles::default();
    let (controller, _updates) = build_controller(source.clone(), channel.clone());

    controller.start().await.unwrap();

    let chunk_tx = source.chunk_tx.lock().unwrap().clone().unwrap();
    for i in 0..5u64 {
        chunk_tx
            .send(AudioChunk {
                pcm: vec![0u8; 3200],
                timestamp_ms: i * 100,
                sample_rate: 16000,
                channels: 1,
            })
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while channel.sent.load(Ordering::SeqCst) < 5 {
        assert!(tokio::time::Instant::now() < deadline, "chunks not forwarded");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The forwarding task drains until every sender is gone.
    drop(chunk_tx);
    controller.stop().await;
    let stats = controller.stats().await;
    assert_eq!(stats.chunks_forwarded, 5);
}
