//! WebSocket session to the hub relay.
//!
//! One [`WsClient`] is one socket: a read pump decoding frames into typed
//! events, and a write pump serialising outbound frames and keepalive pings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pawlink_protocol::constants::WS_MAX_MESSAGE_SIZE;
use pawlink_protocol::{Frame, ServerEvent};

use crate::error::WsError;
use crate::types::SessionConfig;

/// Why a session's read pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`WsClient::close`] was called or the client was dropped.
    Closed,
    /// The peer went away, the stream errored, or the keepalive expired.
    Lost,
}

/// Callbacks wired into a session before its pumps start, so that no
/// inbound frame can arrive unobserved.
pub struct SessionHandlers {
    pub on_event: Box<dyn Fn(ServerEvent) + Send + Sync>,
    pub on_disconnect: Box<dyn FnOnce(DisconnectReason) + Send>,
}

impl SessionHandlers {
    /// Handlers that drop everything.
    pub fn noop() -> Self {
        Self {
            on_event: Box::new(|_| {}),
            on_disconnect: Box::new(|_| {}),
        }
    }
}

/// A live relay session.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    closed: Arc<AtomicBool>,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Opens a socket to the relay, authenticating with the bearer token on
    /// the upgrade request.
    pub async fn connect(config: &SessionConfig, handlers: SessionHandlers) -> Result<Self, WsError> {
        let mut request = config.url.as_str().into_client_request()?;
        if !config.token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|e| WsError::Request(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false).await?;
        debug!(url = %config.url, "relay socket open");
        let (write, read) = ws_stream.split();

        Ok(Self::start(read, write, handlers))
    }

    /// Starts the pumps over an already-open stream/sink pair.
    pub fn start<R, W>(read: R, write: W, handlers: SessionHandlers) -> Self
    where
        R: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin + Send + 'static,
        W: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let closed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let closed = closed.clone();
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, handlers, closed, write_tx, cancel,
            ))
        };

        Self {
            write_tx,
            closed,
            _read_handle: read_handle,
            _write_handle: write_handle,
            cancel,
        }
    }

    /// Queues a frame for sending.
    pub async fn send(&self, frame: &Frame) -> Result<(), WsError> {
        if self.is_closed() {
            return Err(WsError::Closed);
        }
        let json = serde_json::to_string(frame)?;
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| WsError::Closed)
    }

    /// `true` once the read pump has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.write_tx.is_closed()
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use pawlink_protocol::EventKind;
    use std::time::Duration;

    type Inbound = Result<tungstenite::Message, tungstenite::Error>;

    fn channel_stream(
        rx: mpsc::Receiver<Inbound>,
    ) -> impl Stream<Item = Inbound> + Unpin + Send + 'static {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|m| (m, rx))
        }))
    }

    fn channel_sink(
        tx: mpsc::UnboundedSender<tungstenite::Message>,
    ) -> impl Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin + Send + 'static {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn inbound_frames_become_typed_events() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();

        let _client = WsClient::start(
            channel_stream(in_rx),
            channel_sink(out_tx),
            SessionHandlers {
                on_event: Box::new(move |ev| {
                    let _ = ev_tx.send(ev);
                }),
                on_disconnect: Box::new(|_| {}),
            },
        );

        let text = r#"{"event":"hub_status","data":{"hubAddress":"HUB-1","status":"online"}}"#;
        in_tx
            .send(Ok(tungstenite::Message::Text(text.into())))
            .await
            .unwrap();

        let ev = tokio::time::timeout(Duration::from_secs(2), ev_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind(), EventKind::HubStatus);
    }

    #[tokio::test]
    async fn send_writes_json_text_frame() {
        let (_in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let client = WsClient::start(
            channel_stream(in_rx),
            channel_sink(out_tx),
            SessionHandlers::noop(),
        );

        let frame = Frame::new("f-1", "control_request", Some(&serde_json::json!({"x": 1}))).unwrap();
        client.send(&frame).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let tungstenite::Message::Text(text) = msg else {
            panic!("expected text frame, got {msg:?}");
        };
        let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(v["event"], "control_request");
        assert_eq!(v["data"]["x"], 1);
    }

    #[tokio::test]
    async fn remote_close_reports_lost_and_marks_closed() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (dc_tx, dc_rx) = tokio::sync::oneshot::channel();
        let client = WsClient::start(
            channel_stream(in_rx),
            channel_sink(out_tx),
            SessionHandlers {
                on_event: Box::new(|_| {}),
                on_disconnect: Box::new(move |reason| {
                    let _ = dc_tx.send(reason);
                }),
            },
        );

        drop(in_tx);
        let reason = tokio::time::timeout(Duration::from_secs(2), dc_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, DisconnectReason::Lost);
        assert!(client.is_closed());

        let frame = Frame::new::<()>("f-2", "control_request", None).unwrap();
        assert!(matches!(client.send(&frame).await, Err(WsError::Closed)));
    }

    #[tokio::test]
    async fn local_close_reports_closed() {
        let (_in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (dc_tx, dc_rx) = tokio::sync::oneshot::channel();
        let client = WsClient::start(
            channel_stream(in_rx),
            channel_sink(out_tx),
            SessionHandlers {
                on_event: Box::new(|_| {}),
                on_disconnect: Box::new(move |reason| {
                    let _ = dc_tx.send(reason);
                }),
            },
        );

        client.close().await;
        let reason = tokio::time::timeout(Duration::from_secs(2), dc_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, DisconnectReason::Closed);
    }

    #[tokio::test]
    async fn connect_rejects_token_with_control_characters() {
        let config = SessionConfig::new("ws://127.0.0.1:1/socket", "bad\ntoken");
        let result = WsClient::connect(&config, SessionHandlers::noop()).await;
        assert!(matches!(result, Err(WsError::Request(_))));
    }
}
