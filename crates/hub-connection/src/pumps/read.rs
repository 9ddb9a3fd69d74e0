//! WebSocket read pump: decodes inbound frames into typed events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use pawlink_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use pawlink_protocol::{Frame, ServerEvent};

use crate::ws_client::{DisconnectReason, SessionHandlers};

/// Reads messages from the WebSocket and dispatches them.
///
/// Any inbound message resets the read deadline. If nothing at all arrives
/// within [`WS_PONG_WAIT`] the session is considered dead.
pub(crate) async fn read_pump<S>(
    mut read: S,
    handlers: SessionHandlers,
    closed: Arc<AtomicBool>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let SessionHandlers {
        on_event,
        on_disconnect,
    } = handlers;

    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("no traffic from relay within {WS_PONG_WAIT:?}, closing");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                if let Some(event) = decode_text(text.as_str()) {
                                    on_event(event);
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                debug!(?frame, "received close frame");
                                break;
                            }
                            _ => {} // Binary
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    closed.store(true, Ordering::Release);
    let reason = if cancel.is_cancelled() {
        DisconnectReason::Closed
    } else {
        DisconnectReason::Lost
    };
    on_disconnect(reason);
}

/// Parses a text frame. Malformed frames are logged and dropped.
fn decode_text(text: &str) -> Option<ServerEvent> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return None;
    }

    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return None;
        }
    };

    match frame.to_event() {
        Ok(event) => {
            trace!(event = %frame.event, id = %frame.id, "received event");
            Some(event)
        }
        Err(e) => {
            warn!(event = %frame.event, "dropping event with malformed payload: {e}");
            None
        }
    }
}
