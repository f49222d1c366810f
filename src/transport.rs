//! One WebSocket to a CDP page target (spec §4.1).
//!
//! Grounded on `src/conn.rs`'s `Connection`, but expressed with async/await
//! instead of a hand-rolled `Stream`/`Sink` poll loop — spec §9 explicitly
//! asks implementations not to preserve the source's async shape. Reads and
//! writes are still split the same way: one half owned by the Coordinator's
//! reader loop, the other behind a lock so concurrent monitors never
//! interleave two outbound frames.

use async_tungstenite::tokio::{connect_async, ConnectStream};
use async_tungstenite::tungstenite::Message as WsMessage;
use async_tungstenite::WebSocketStream;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CdpError;
use crate::protocol::{parse_frame, InboundFrame};

/// The read half of the transport. Exclusively owned by the Coordinator's
/// single inbound-routing task (spec §5).
pub struct TransportReader {
    inner: SplitStream<WebSocketStream<ConnectStream>>,
}

enum WriterSink {
    Live(SplitSink<WebSocketStream<ConnectStream>, WsMessage>),
    #[cfg(test)]
    Fake(tokio::sync::mpsc::UnboundedSender<String>),
}

/// The write half. Wrapped behind a mutex so writes from many monitors
/// never interleave (spec §4.1: "writes are serialized").
pub struct TransportWriter {
    inner: Mutex<WriterSink>,
}

impl TransportWriter {
    /// Builds a `TransportWriter` backed by an in-memory channel instead of a
    /// real websocket, so monitor and dispatcher tests can feed synthetic CDP
    /// frames without a browser (spec §1, test tooling).
    #[cfg(test)]
    pub fn fake() -> (Self, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(WriterSink::Fake(tx)),
            },
            rx,
        )
    }
}

/// Opens one WebSocket to a CDP page target of the form
/// `ws://host:port/devtools/page/<targetId>`. The core doesn't launch the
/// browser or create the target, but it still validates the URL a
/// launch-helper handed it rather than letting a malformed one surface as
/// an opaque websocket-handshake failure.
pub async fn connect(page_ws_url: &str) -> Result<(TransportReader, TransportWriter), CdpError> {
    url::Url::parse(page_ws_url)?;
    let (ws, _response) = connect_async(page_ws_url).await?;
    let (sink, stream) = ws.split();
    Ok((
        TransportReader { inner: stream },
        TransportWriter {
            inner: Mutex::new(WriterSink::Live(sink)),
        },
    ))
}

impl TransportReader {
    /// Reads and parses the next frame. Returns `Ok(None)` on a clean
    /// remote close; an error on a read failure or malformed JSON.
    pub async fn next_frame(&mut self) -> Result<Option<InboundFrame>, CdpError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Some(parse_frame(&text)?));
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    debug!("dropping unexpected binary CDP frame");
                    continue;
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(?frame, "remote closed the CDP websocket");
                    return Ok(None);
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(err)) => {
                    warn!(error = %err, "CDP websocket read error");
                    return Err(CdpError::Ws(err));
                }
            }
        }
    }
}

impl TransportWriter {
    /// Writes one already-serialized command frame.
    pub async fn send_text(&self, text: String) -> Result<(), CdpError> {
        let mut sink = self.inner.lock().await;
        match &mut *sink {
            WriterSink::Live(s) => {
                s.send(WsMessage::Text(text.into())).await?;
            }
            #[cfg(test)]
            WriterSink::Fake(tx) => {
                let _ = tx.send(text);
            }
        }
        Ok(())
    }

    /// Initiates a close handshake. Best-effort: errors are swallowed since
    /// this is only ever called while tearing the session down.
    pub async fn close(&self) {
        let mut sink = self.inner.lock().await;
        match &mut *sink {
            WriterSink::Live(s) => {
                let _ = s.close().await;
            }
            #[cfg(test)]
            WriterSink::Fake(_) => {}
        }
    }
}
