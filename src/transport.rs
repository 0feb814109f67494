//! Transport seam between the client and the network.
//!
//! The core never reconnects or backs off on its own; that is the
//! transport's job. Inbound payloads are delivered exactly as the
//! WebSocket layer produced them (text or binary), so the wire codec can
//! classify them before any cryptographic processing.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const URL: &str = "wss://w1.web.whatsapp.net/ws/chat";
const ORIGIN_VALUE: &str = "https://web.whatsapp.com";

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text payload was received.
    TextReceived(String),
    /// A binary payload was received.
    BinaryReceived(Bytes),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text payload to the server.
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Sends a binary payload to the server.
    async fn send_binary(&self, data: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Tokio WebSocket transport.
pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }

    async fn send_message(&self, message: Message) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;
        sink.send(message)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {e}"))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        debug!("--> Sending text payload: {} bytes", text.len());
        self.send_message(Message::text(text)).await
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        debug!("--> Sending binary payload: {} bytes", data.len());
        self.send_message(Message::binary(data.to_vec())).await
    }

    async fn disconnect(&self) {
        *self.ws_sink.lock().await = None;
    }
}

/// Factory for WebSocket transports pointed at the companion endpoint.
#[derive(Default)]
pub struct WebSocketTransportFactory;

impl WebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!("Dialing {URL}");
        let mut request = URL
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Failed to build request: {e}"))?;
        request
            .headers_mut()
            .insert(ORIGIN, ORIGIN_VALUE.parse().expect("static header value"));

        let (client, _response) = connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {e}"))?;

        let (sink, stream) = client.split();

        let (event_tx, event_rx) = mpsc::channel(100);
        let transport = Arc::new(WebSocketTransport::new(sink));

        tokio::task::spawn(read_pump(stream, event_tx.clone()));

        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!("<-- Received text payload: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::TextReceived(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                trace!("<-- Received binary payload: {} bytes", data.len());
                if event_tx
                    .send(TransportEvent::BinaryReceived(data))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                trace!("Received close frame");
                break;
            }
            Some(Ok(_)) => {} // ping/pong handled by the library
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

/// Scriptable in-memory transport used by the test suites.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    type Responder = Box<dyn Fn(&str) -> Option<TransportEvent> + Send>;

    /// Records everything sent and can answer each text send with a
    /// scripted reply computed from the outgoing payload (so tests can
    /// echo correlation tags back).
    pub struct MockTransport {
        pub sent_text: StdMutex<Vec<String>>,
        pub sent_binary: StdMutex<Vec<Vec<u8>>>,
        responders: StdMutex<VecDeque<Responder>>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl MockTransport {
        pub fn new() -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
            let (tx, rx) = mpsc::channel(32);
            (
                Arc::new(Self {
                    sent_text: StdMutex::new(Vec::new()),
                    sent_binary: StdMutex::new(Vec::new()),
                    responders: StdMutex::new(VecDeque::new()),
                    events: tx,
                }),
                rx,
            )
        }

        /// Queues a responder invoked with the next outgoing text payload.
        pub fn respond_to_next_send(
            &self,
            responder: impl Fn(&str) -> Option<TransportEvent> + Send + 'static,
        ) {
            self.responders
                .lock()
                .unwrap()
                .push_back(Box::new(responder));
        }

        /// Delivers an inbound event immediately.
        pub async fn inject(&self, event: TransportEvent) {
            let _ = self.events.send(event).await;
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
            self.sent_text.lock().unwrap().push(text.to_string());
            let reply = self
                .responders
                .lock()
                .unwrap()
                .pop_front()
                .and_then(|responder| responder(text));
            if let Some(event) = reply {
                let _ = self.events.send(event).await;
            }
            Ok(())
        }

        async fn send_binary(&self, data: &[u8]) -> Result<(), anyhow::Error> {
            self.sent_binary.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn disconnect(&self) {
            let _ = self.events.send(TransportEvent::Disconnected).await;
        }
    }
}
