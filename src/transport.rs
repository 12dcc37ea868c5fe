//! Transport abstraction and the WebSocket implementation.
//!
//! A [`Transport`] is a pair of channels: outbound text goes to a writer,
//! inbound frames and the final close arrive as [`TransportEvent`]s. Sends
//! never block; ordering and backpressure belong to the writer side.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::GatewayError;

/// Something the connection asks the writer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(u16),
}

/// Something the reader observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed { code: Option<u16>, reason: String },
}

/// Opens transports to a gateway URL.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Transport, GatewayError>>;
}

/// The far side of an in-memory transport.
#[derive(Debug)]
pub struct TransportPeer {
    /// Feed frames and closes to the connection.
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
    /// Everything the connection sent.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

#[derive(Debug)]
pub struct Transport {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    reader: Option<AbortHandle>,
    writer: Option<AbortHandle>,
}

impl Transport {
    /// An unattached transport and the peer end that drives it.
    pub fn pair() -> (Transport, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Transport {
                outbound: outbound_tx,
                inbound: inbound_rx,
                reader: None,
                writer: None,
            },
            TransportPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }

    /// Attach the I/O tasks that serve this transport so they can be aborted.
    pub fn with_tasks(mut self, reader: AbortHandle, writer: AbortHandle) -> Self {
        self.reader = Some(reader);
        self.writer = Some(writer);
        self
    }

    /// Queue a text frame. Returns false if the writer is gone.
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the writer to send a close frame and stop.
    pub fn close(&self, code: u16) {
        let _ = self.outbound.send(Outbound::Close(code));
    }

    /// Drop the connection without a close handshake.
    pub fn abort(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }

    /// Next inbound event. A vanished reader counts as an abnormal close.
    pub async fn recv(&mut self) -> TransportEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed {
                code: None,
                reason: "transport reader ended".to_string(),
            },
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // The writer is left to flush a pending close frame.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Connects with tokio-tungstenite and serves the socket from two tasks.
#[derive(Debug, Clone)]
pub struct WsConnector {
    api_version: u8,
}

impl WsConnector {
    pub fn new(api_version: u8) -> Self {
        Self { api_version }
    }

    /// Append the version and encoding query to a gateway URL.
    pub fn gateway_url(&self, base: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}v={}&encoding=json", self.api_version)
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Transport, GatewayError>> {
        let url = self.gateway_url(&url);
        Box::pin(connect_ws(url))
    }
}

async fn connect_ws(url: String) -> Result<Transport, GatewayError> {
    tracing::debug!("opening websocket to {}", url);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (transport, peer) = Transport::pair();
    let TransportPeer {
        inbound,
        mut outbound,
    } = peer;

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            match msg {
                Outbound::Text(text) => {
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(code) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: String::new().into(),
                    };
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let reader = tokio::spawn(async move {
        loop {
            let event = match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => TransportEvent::Frame(text),
                    Err(_) => {
                        tracing::warn!("dropping non-utf8 binary frame ({} bytes)", bytes.len());
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    let _ = inbound.send(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let _ = inbound.send(TransportEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    });
                    return;
                }
                None => {
                    let _ = inbound.send(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            };
            if inbound.send(event).is_err() {
                return;
            }
        }
    });

    Ok(transport.with_tasks(reader.abort_handle(), writer.abort_handle()))
}
