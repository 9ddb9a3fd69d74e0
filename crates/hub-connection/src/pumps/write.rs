//! WebSocket write pump: serialises outbound frames and keepalive pings.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use pawlink_protocol::constants::WS_PING_PERIOD;

/// Writes queued messages to the WebSocket, pinging every
/// [`WS_PING_PERIOD`] so the relay keeps the session alive.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval(WS_PING_PERIOD);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // Skip immediate first tick.

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => {
                trace!("sending keepalive ping");
                tungstenite::Message::Ping(Vec::new().into())
            }
            msg = write_rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };
        if let Err(e) = write.send(next).await {
            error!("WebSocket write error: {e}");
            break;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    fn recording_sink(
        tx: mpsc::UnboundedSender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn write_pump_stops_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (_write_tx, write_rx) = mpsc::channel(16);

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            write_pump(recording_sink(sink_tx), write_rx, c).await;
        });

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        let close_msg = sink_rx.recv().await;
        assert!(matches!(close_msg, Some(tungstenite::Message::Close(_))));
    }

    #[tokio::test]
    async fn write_pump_pings_on_idle() {
        tokio::time::pause();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (_write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(recording_sink(sink_tx), write_rx, cancel.clone()));

        let first = sink_rx.recv().await.unwrap();
        assert!(matches!(first, tungstenite::Message::Ping(_)));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn write_pump_forwards_in_order() {
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::channel(16);
        let handle = tokio::spawn(write_pump(
            recording_sink(sink_tx),
            write_rx,
            CancellationToken::new(),
        ));

        write_tx.send(tungstenite::Message::Text("a".into())).await.unwrap();
        write_tx.send(tungstenite::Message::Text("b".into())).await.unwrap();
        drop(write_tx);
        handle.await.unwrap();

        let mut texts = Vec::new();
        while let Ok(m) = sink_rx.try_recv() {
            if let tungstenite::Message::Text(t) = m {
                texts.push(t.as_str().to_string());
            }
        }
        assert_eq!(texts, vec!["a", "b"]);
    }
}
