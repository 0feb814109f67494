//! Top-level client: connection lifecycle, frame routing and the send API.

use crate::auth::{AuthError, Authenticator, DEFAULT_QR_WINDOW};
use crate::processor::{MessageProcessor, ProcessError};
use crate::store::{FileStore, StoreError};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::Duration;
use wawebcore::binary::{self, ControlMessage, WireFrame};
use wawebcore::session::{SerializableSession, SessionState};
use wawebcore::types::events::{Event, EventBus, EventHandler};
use wawebcore::types::message::{MessageType, OutgoingMessage};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("client is not connected")]
    NotConnected,
    #[error("client is not authenticated")]
    NotAuthenticated,
    #[error("connection to the server was lost")]
    ConnectionLost,
}

type Result<T> = std::result::Result<T, ClientError>;

/// Connection parameters. The browser pair identifies this client on the
/// paired phone's device list.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub browser_name: String,
    pub browser_version: String,
    pub qr_window: Duration,
    /// Where the session record is persisted; `None` disables persistence.
    pub session_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            browser_name: "Chrome".to_string(),
            browser_version: "120.0".to_string(),
            qr_window: DEFAULT_QR_WINDOW,
            session_path: Some(PathBuf::from("session.json")),
        }
    }
}

pub struct Client {
    transport_factory: Arc<dyn TransportFactory>,
    config: ClientConfig,
    session: Arc<RwLock<SessionState>>,
    event_bus: Arc<EventBus>,
    processor: MessageProcessor,
    store: Option<Arc<FileStore>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    authenticator: StdMutex<Option<Arc<Authenticator>>>,
}

impl Client {
    pub fn new(transport_factory: Arc<dyn TransportFactory>, config: ClientConfig) -> Self {
        let session = Arc::new(RwLock::new(SessionState::default()));
        let store = config
            .session_path
            .as_ref()
            .map(|path| Arc::new(FileStore::new(path)));
        Self {
            transport_factory,
            config,
            processor: MessageProcessor::new(session.clone()),
            session,
            event_bus: Arc::new(EventBus::new()),
            store,
            transport: Mutex::new(None),
            authenticator: StdMutex::new(None),
        }
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_bus.add_handler(handler);
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_authenticated()
    }

    /// Connects, authenticates (restoring a persisted session when one
    /// exists, falling back to a fresh QR handshake) and then routes
    /// inbound frames until the connection drops or [`Client::stop`] closes
    /// it.
    pub async fn run(&self) -> Result<()> {
        let (transport, mut events) = self.transport_factory.create_transport().await?;
        *self.transport.lock().await = Some(transport.clone());

        // The factory queues Connected before any payload.
        match events.recv().await {
            Some(TransportEvent::Connected) => {
                self.event_bus.dispatch(&Event::Connected);
            }
            _ => return Err(ClientError::ConnectionLost),
        }

        let authenticator = Arc::new(Authenticator::new(
            transport.clone(),
            self.session.clone(),
            self.event_bus.clone(),
            self.config.qr_window,
        ));
        *self.authenticator.lock().expect("authenticator lock poisoned") =
            Some(authenticator.clone());

        self.authenticate(&authenticator, &mut events).await?;
        let result = self.frame_loop(&authenticator, &mut events).await;
        *self.transport.lock().await = None;
        result
    }

    async fn authenticate(
        &self,
        authenticator: &Authenticator,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<()> {
        if let Some(store) = &self.store
            && let Some(record) = store.load().await.unwrap_or_else(|e| {
                warn!("Ignoring unreadable session file: {e}");
                None
            })
        {
            match authenticator.restore(events, record).await {
                Ok(()) => {
                    self.persist_session().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Session restore failed ({e}), falling back to QR authentication");
                    store.clear().await.ok();
                }
            }
        }

        authenticator
            .initialize(
                events,
                &self.config.browser_name,
                &self.config.browser_version,
            )
            .await?;
        Ok(())
    }

    async fn frame_loop(
        &self,
        authenticator: &Authenticator,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<()> {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::TextReceived(text) => {
                    self.handle_text_frame(authenticator, &text).await;
                }
                TransportEvent::BinaryReceived(data) => {
                    self.handle_binary_frame(authenticator, &data).await;
                }
                TransportEvent::Connected => {}
                TransportEvent::Disconnected => {
                    info!("Transport disconnected");
                    self.event_bus.dispatch(&Event::Disconnected);
                    return Err(ClientError::ConnectionLost);
                }
            }
        }
        self.event_bus.dispatch(&Event::Disconnected);
        Err(ClientError::ConnectionLost)
    }

    async fn handle_text_frame(&self, authenticator: &Authenticator, text: &str) {
        let body = match binary::parse_text_frame(text) {
            Ok((_, body)) => body,
            Err(e) => {
                warn!("Dropping malformed text frame: {e}");
                return;
            }
        };

        match binary::classify_control(&body) {
            ControlMessage::Conn(_) => match authenticator.handle_connection_message(&body).await {
                Ok(()) => self.persist_session().await,
                Err(e) => error!("Key exchange failed: {e}"),
            },
            ControlMessage::Challenge(_) => {
                warn!("Server issued a challenge for an unknown session; clearing it");
                if let Some(store) = &self.store {
                    store.clear().await.ok();
                }
            }
            ControlMessage::InitResponse {
                status: 200,
                server_ref: Some(server_ref),
            } => {
                // The server refreshes the QR reference while a scan is
                // pending; re-render without regenerating credentials.
                if let Err(e) = authenticator.refresh_qr(&server_ref) {
                    debug!("Ignoring ref refresh: {e}");
                }
            }
            ControlMessage::InitResponse { status, .. } => {
                debug!("Ignoring init response with status {status}")
            }
            ControlMessage::Status(status) => debug!("Server status update: {status}"),
            other => debug!("Unhandled control message: {other:?}"),
        }
    }

    async fn handle_binary_frame(&self, authenticator: &Authenticator, data: &[u8]) {
        let frame = match binary::decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable frame: {e}");
                return;
            }
        };

        match frame {
            WireFrame::Binary { tag, payload } => {
                match self.processor.process_binary(tag, &payload).await {
                    Ok(messages) => {
                        for message in messages {
                            self.event_bus.dispatch(&Event::Message(message));
                        }
                    }
                    Err(e) => warn!("Dropping message frame: {e}"),
                }
            }
            // A text frame can arrive on the binary channel; route it the
            // same way as native text.
            WireFrame::Text { body, .. } => {
                if let ControlMessage::Conn(_) = binary::classify_control(&body) {
                    match authenticator.handle_connection_message(&body).await {
                        Ok(()) => self.persist_session().await,
                        Err(e) => error!("Key exchange failed: {e}"),
                    }
                }
            }
        }
    }

    async fn persist_session(&self) {
        let Some(store) = &self.store else { return };
        let record = SerializableSession::from_state(&*self.session.read().await);
        if let Some(record) = record {
            let store = store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save(&record).await {
                    error!("Failed to persist session: {e}");
                }
            });
        }
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        transport.send_binary(frame).await?;
        Ok(())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<()> {
        if !self.is_authenticated().await {
            return Err(ClientError::NotAuthenticated);
        }
        let frame = self.processor.encrypt_message(&message).await?;
        self.send_frame(&frame).await
    }

    pub async fn send_text_message(
        &self,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<()> {
        self.send_message(OutgoingMessage::text(to, body)).await
    }

    pub async fn send_media_message(
        &self,
        to: impl Into<String>,
        kind: MessageType,
        url: impl Into<String>,
        caption: Option<String>,
    ) -> Result<()> {
        self.send_message(OutgoingMessage::media(to, kind, url, caption))
            .await
    }

    /// Persists the session (when authenticated) and closes the transport.
    pub async fn stop(&self) {
        if let (Some(store), Some(record)) = (
            &self.store,
            SerializableSession::from_state(&*self.session.read().await),
        ) && let Err(e) = store.save(&record).await
        {
            error!("Failed to persist session on stop: {e}");
        }

        if let Some(authenticator) = self
            .authenticator
            .lock()
            .expect("authenticator lock poisoned")
            .take()
        {
            authenticator.reset();
        }

        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        info!("Client stopped");
    }

    /// Drops the session both in memory and on disk, then disconnects.
    pub async fn logout(&self) -> Result<()> {
        self.session.write().await.clear();
        if let Some(store) = &self.store {
            store.clear().await?;
        }
        self.stop().await;
        Ok(())
    }
}
