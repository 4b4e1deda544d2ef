//! Transport seam between the connection manager and the network.
//!
//! The manager only needs "open a link, read text frames, write text
//! frames". [`WsConnector`] provides that over a WebSocket; tests plug in an
//! in-memory [`Connector`].

use std::future::Future;
use std::pin::Pin;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ratelane_proto::ClientMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{LiveError, LiveResult};

/// Buffer size of the per-link channels.
const LINK_BUFFER: usize = 64;

/// What the reader side of a link yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// A text frame.
    Text(String),
    /// The link is gone; no more frames will follow.
    Closed {
        /// Why the link closed.
        reason: String,
    },
}

/// An open link: text frames out, [`TransportFrame`]s in.
///
/// Dropping `outbound` closes the link.
#[derive(Debug)]
pub struct TransportLink {
    /// Serialized outbound messages.
    pub outbound: mpsc::Sender<String>,
    /// Inbound frames in arrival order.
    pub inbound: mpsc::Receiver<TransportFrame>,
}

/// Future returned by [`Connector::open`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = LiveResult<TransportLink>> + Send + 'a>>;

/// Opens links to the push endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Open a new link. Completes when the handshake is done.
    fn open(&self) -> ConnectFuture<'_>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    hello: Option<ClientMessage>,
}

impl WsConnector {
    /// Create a connector for the given `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a WebSocket URL.
    pub fn new(url: impl Into<String>) -> LiveResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| LiveError::Config(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(LiveError::Config(format!(
                "url must start with ws:// or wss://, got '{url}'"
            )));
        }
        Ok(Self { url, hello: None })
    }

    /// Send this message right after the transport opens.
    #[must_use]
    pub fn with_hello(mut self, hello: ClientMessage) -> Self {
        self.hello = Some(hello);
        self
    }

    async fn open_ws(&self) -> LiveResult<TransportLink> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(classify_connect_error)?;

        let (mut write, read) = ws_stream.split();

        if let Some(hello) = &self.hello {
            let json = hello.to_json()?;
            write
                .send(Message::text(json))
                .await
                .map_err(|e| LiveError::Transport(format!("failed to send hello: {e}")))?;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportFrame>(LINK_BUFFER);

        tokio::spawn(reader_task(read, inbound_tx));
        tokio::spawn(writer_task(write, outbound_rx));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

impl Connector for WsConnector {
    fn open(&self) -> ConnectFuture<'_> {
        Box::pin(self.open_ws())
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Auth failures during the upgrade are reported as handshake errors; they
/// are still retried like any other transport failure.
fn classify_connect_error(err: tungstenite::Error) -> LiveError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                LiveError::Handshake(format!("server answered {status}"))
            } else {
                LiveError::Transport(format!("upgrade failed with {status}"))
            }
        }
        other => LiveError::Transport(format!("failed to connect: {other}")),
    }
}

async fn reader_task(
    mut read: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    tx: mpsc::Sender<TransportFrame>,
) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if tx
                    .send(TransportFrame::Text(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    // Manager dropped the link.
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame.map_or_else(
                    || "server closed connection".to_string(),
                    |f| format!("server closed connection: {}", &*f.reason),
                );
            }
            Some(Ok(_)) => {
                // Ping/Pong are handled by tungstenite; binary frames are not part of the protocol.
            }
            Some(Err(e)) => break format!("websocket error: {e}"),
            None => break "connection closed".to_string(),
        }
    };

    debug!(%reason, "websocket reader finished");
    let _ = tx.send(TransportFrame::Closed { reason }).await;
}

async fn writer_task(
    mut write: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(json) = rx.recv().await {
        if let Err(e) = write.send(Message::text(json)).await {
            warn!(error = %e, "websocket write failed");
            return;
        }
    }

    // Outbound sender dropped: close the socket.
    let _ = write.close().await;
}
