use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::event::decode_listen_frame;
use super::{ChannelError, ChannelSignal, RecognitionChannel};
use crate::audio::AudioChunk;

type WsSink = futures::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;

/// Tells the remote endpoint to flush and close the stream.
const CLOSE_STREAM_MESSAGE: &str = r#"{"type":"CloseStream"}"#;

/// How long `close()` waits for the remote to acknowledge before giving up.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Persistent bidirectional websocket to a streaming recognition endpoint.
///
/// Each audio chunk is forwarded as one binary frame as soon as it arrives.
/// Inbound text frames are decoded into transcript events; malformed frames
/// are dropped and logged. A remote-initiated close is surfaced as
/// `ChannelSignal::Closed`, never swallowed.
pub struct StreamingChannel {
    endpoint: String,
    api_key: String,
    sample_rate: u32,
    channels: u16,
    interim_results: bool,
    open: Option<OpenStream>,
}

struct OpenStream {
    ws_tx: WsSink,
    reader: JoinHandle<()>,
    /// Set by `close()` so the reader does not report our own shutdown as a
    /// remote close.
    closing: Arc<AtomicBool>,
}

impl StreamingChannel {
    pub fn new(
        endpoint: String,
        api_key: String,
        sample_rate: u32,
        channels: u16,
        interim_results: bool,
    ) -> Self {
        Self {
            endpoint,
            api_key,
            sample_rate,
            channels,
            interim_results,
            open: None,
        }
    }

    /// Endpoint URL with the query parameters that select encoding, sample
    /// rate, channel count and interim results.
    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}encoding=linear16&sample_rate={}&channels={}&interim_results={}",
            self.endpoint, separator, self.sample_rate, self.channels, self.interim_results
        )
    }
}

#[async_trait]
impl RecognitionChannel for StreamingChannel {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<ChannelSignal>, ChannelError> {
        if self.open.is_some() {
            return Err(ChannelError::ConnectFailed(
                "channel is already open".to_string(),
            ));
        }

        let url = self.url();
        info!(endpoint = %self.endpoint, "Connecting to streaming recognition endpoint");

        let mut request = url
            .into_client_request()
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;

        info!("Streaming recognition connected");

        let (ws_tx, mut ws_rx) = ws_stream.split();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let closing_reader = Arc::clone(&closing);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(payload)) => match decode_listen_frame(payload.as_str()) {
                        Some(event) => {
                            if signal_tx.send(ChannelSignal::Event(event)).is_err() {
                                return;
                            }
                        }
                        None => {
                            debug!("Dropping recognition frame: {}", ChannelError::Malformed);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {} // binary/ping/pong frames carry no transcript
                    Err(e) => {
                        warn!("Streaming recognition read error: {}", e);
                        break;
                    }
                }
            }

            if !closing_reader.load(Ordering::SeqCst) {
                warn!("Streaming recognition closed by remote");
                let _ = signal_tx.send(ChannelSignal::Closed(ChannelError::RemoteClosed));
            }
        });

        self.open = Some(OpenStream {
            ws_tx,
            reader,
            closing,
        });

        Ok(signal_rx)
    }

    async fn send(&mut self, chunk: AudioChunk) {
        let Some(open) = self.open.as_mut() else {
            debug!("Dropping audio chunk: channel not open");
            return;
        };

        if let Err(e) = open.ws_tx.send(Message::Binary(chunk.pcm)).await {
            warn!("Failed to forward audio frame: {}", e);
        }
    }

    async fn close(&mut self) {
        let Some(mut open) = self.open.take() else {
            return;
        };

        info!("Closing streaming recognition channel");
        open.closing.store(true, Ordering::SeqCst);

        let _ = open
            .ws_tx
            .send(Message::Text(CLOSE_STREAM_MESSAGE.to_string()))
            .await;
        let _ = open.ws_tx.close().await;

        // The reader exits once the remote acknowledges the close; don't let
        // a stalled remote hold up teardown.
        if tokio::time::timeout(CLOSE_GRACE, &mut open.reader)
            .await
            .is_err()
        {
            open.reader.abort();
        }

        info!("Streaming recognition channel closed");
    }

    fn name(&self) -> &str {
        "streaming websocket"
    }
}
