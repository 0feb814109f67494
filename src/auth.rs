//! QR authentication orchestrator.
//!
//! Drives the handshake state machine over a [`Transport`]: init request,
//! QR issuance, the scan-timeout monitor and the key exchange itself. The
//! byte-exact key-exchange algorithm lives in [`wawebcore::auth`]; this
//! module owns the async choreography around it.

use crate::transport::{Transport, TransportEvent};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::{Duration, timeout};
use wawebcore::auth::qr::QrData;
use wawebcore::auth::{KeyExchangeError, process_shared_secret};
use wawebcore::binary::{self, ControlMessage};
use wawebcore::crypto::key_pair::{KeyPair, generate_client_id};
use wawebcore::session::{SerializableSession, SessionError, SessionState};
use wawebcore::types::events::{Event, EventBus};

/// Protocol version sent in the init handshake.
pub const PROTOCOL_VERSION: [u32; 3] = [2, 2121, 6];

const INIT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QR_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed handshake response: {0}")]
    Handshake(String),
    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),
    #[error("timed out waiting for a handshake response")]
    ResponseTimeout,
    #[error("QR window elapsed before a successful scan")]
    QrTimedOut,
    #[error("authenticator has no active credentials")]
    NotInitialized,
    #[error("no QR scan is pending")]
    NotAwaitingScan,
    #[error("connection lost during handshake")]
    ConnectionLost,
    #[error("session restore rejected with status {0}")]
    RestoreRejected(u16),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Initialized,
    AwaitingScan,
    KeyExchange,
    Authenticated,
    TimedOut,
    Failed,
}

struct Credentials {
    key_pair: KeyPair,
    client_id: String,
}

pub struct Authenticator {
    transport: Arc<dyn Transport>,
    session: Arc<RwLock<SessionState>>,
    event_bus: Arc<EventBus>,
    state: Arc<Mutex<AuthState>>,
    credentials: Mutex<Option<Credentials>>,
    qr_window: Duration,
    /// Settles the race between the timeout monitor and the scan path;
    /// whichever side wins it owns the terminal transition.
    attempt_latch: Mutex<Arc<AtomicBool>>,
    monitor_cancel: Mutex<Option<watch::Sender<()>>>,
    tag_counter: AtomicU64,
}

impl Authenticator {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<RwLock<SessionState>>,
        event_bus: Arc<EventBus>,
        qr_window: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            event_bus,
            state: Arc::new(Mutex::new(AuthState::Idle)),
            credentials: Mutex::new(None),
            qr_window,
            attempt_latch: Mutex::new(Arc::new(AtomicBool::new(false))),
            monitor_cancel: Mutex::new(None),
            tag_counter: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn is_initialized(&self) -> bool {
        self.credentials.lock().expect("credentials lock poisoned").is_some()
    }

    fn set_state(&self, next: AuthState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        debug!("Auth state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn next_tag(&self) -> String {
        let n = self.tag_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}.--{}", Utc::now().timestamp(), n)
    }

    /// Starts a fresh authentication attempt: generates credentials, sends
    /// the init message and waits for the correlated response carrying the
    /// QR reference. On success the QR event fires and the scan-timeout
    /// monitor starts.
    pub async fn initialize(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        browser_name: &str,
        browser_version: &str,
    ) -> Result<()> {
        info!("Initializing QR authentication");

        let key_pair = KeyPair::generate();
        let public_key = key_pair.public_key;
        let client_id = generate_client_id();
        *self.credentials.lock().expect("credentials lock poisoned") = Some(Credentials {
            key_pair,
            client_id: client_id.clone(),
        });
        *self.attempt_latch.lock().expect("latch lock poisoned") =
            Arc::new(AtomicBool::new(false));
        self.set_state(AuthState::Initialized);

        let init_body = json!([
            "admin",
            "init",
            PROTOCOL_VERSION,
            [browser_name, browser_version],
            client_id,
            true
        ]);
        let tag = self.next_tag();
        self.transport
            .send_text(&binary::encode_text(&tag, &init_body))
            .await?;

        let response = self.await_tagged_response(events, &tag).await?;
        let server_ref = match binary::classify_control(&response) {
            ControlMessage::InitResponse {
                status: 200,
                server_ref: Some(server_ref),
            } => server_ref,
            ControlMessage::InitResponse { status, .. } | ControlMessage::Status(status) => {
                self.set_state(AuthState::Failed);
                return Err(AuthError::Handshake(format!(
                    "init rejected with status {status}"
                )));
            }
            other => {
                self.set_state(AuthState::Failed);
                return Err(AuthError::Handshake(format!(
                    "unexpected init response: {other:?}"
                )));
            }
        };

        let qr = QrData::new(server_ref, public_key, client_id);
        self.set_state(AuthState::AwaitingScan);
        self.spawn_timeout_monitor();
        self.event_bus.dispatch(&Event::Qr {
            code: qr.render(),
            timeout: self.qr_window,
        });
        Ok(())
    }

    /// Re-issues the QR payload for a refreshed server reference without
    /// regenerating credentials. The running timeout monitor keeps its
    /// original deadline. Only valid while a scan is actually pending.
    pub fn refresh_qr(&self, server_ref: &str) -> Result<()> {
        if self.state() != AuthState::AwaitingScan {
            return Err(AuthError::NotAwaitingScan);
        }
        let credentials = self.credentials.lock().expect("credentials lock poisoned");
        let credentials = credentials.as_ref().ok_or(AuthError::NotInitialized)?;
        let qr = QrData::new(
            server_ref,
            credentials.key_pair.public_key,
            credentials.client_id.clone(),
        );
        self.event_bus.dispatch(&Event::Qr {
            code: qr.render(),
            timeout: self.qr_window,
        });
        Ok(())
    }

    async fn await_tagged_response(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        tag: &str,
    ) -> Result<Value> {
        let wait = async {
            loop {
                match events.recv().await {
                    Some(TransportEvent::TextReceived(text)) => {
                        if let Ok((frame_tag, body)) = binary::parse_text_frame(&text)
                            && frame_tag == tag
                        {
                            return Ok(body);
                        }
                        debug!("Ignoring uncorrelated text frame during handshake");
                    }
                    Some(TransportEvent::Connected) => continue,
                    Some(TransportEvent::BinaryReceived(_)) => {
                        debug!("Ignoring binary frame during handshake");
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        return Err(AuthError::ConnectionLost);
                    }
                }
            }
        };

        match timeout(INIT_RESPONSE_TIMEOUT, wait).await {
            Ok(result) => result,
            Err(_) => {
                self.set_state(AuthState::Failed);
                Err(AuthError::ResponseTimeout)
            }
        }
    }

    fn spawn_timeout_monitor(&self) {
        let (cancel_tx, mut cancel_rx) = watch::channel(());
        *self.monitor_cancel.lock().expect("monitor lock poisoned") = Some(cancel_tx);

        let latch = self.attempt_latch.lock().expect("latch lock poisoned").clone();
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let window = self.qr_window;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(window) => {
                    if latch
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        warn!("QR authentication timed out after {}s", window.as_secs());
                        *state.lock().expect("state lock poisoned") = AuthState::TimedOut;
                        event_bus.dispatch(&Event::Timeout);
                    }
                }
                _ = cancel_rx.changed() => {
                    debug!("QR timeout monitor cancelled");
                }
            }
        });
    }

    fn cancel_timeout_monitor(&self) {
        if let Some(cancel) = self.monitor_cancel.lock().expect("monitor lock poisoned").take() {
            let _ = cancel.send(());
        }
    }

    /// Handles a `["Conn", {"secret": ...}]` control message: validates the
    /// shape, runs the key exchange and installs the session keys.
    ///
    /// The timeout monitor is cancelled before the authenticated state or
    /// event becomes observable; if the monitor already fired, the scan
    /// loses the race and the attempt stays timed out.
    pub async fn handle_connection_message(&self, body: &Value) -> Result<()> {
        let secret_b64 = body
            .as_array()
            .filter(|items| items.first().and_then(Value::as_str) == Some("Conn"))
            .and_then(|items| items.get(1))
            .and_then(|payload| payload.get("secret"))
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::Handshake("malformed Conn message".into()))?;

        let secret = BASE64
            .decode(secret_b64)
            .map_err(|e| AuthError::Handshake(format!("secret is not valid base64: {e}")))?;

        // A settled attempt is terminal; a late scan must not disturb it.
        let latch = self.attempt_latch.lock().expect("latch lock poisoned").clone();
        if latch.load(Ordering::SeqCst) {
            warn!("Scan arrived after the attempt was settled; discarding");
            return Err(match self.state() {
                AuthState::TimedOut => AuthError::QrTimedOut,
                _ => AuthError::Handshake("authentication attempt already settled".into()),
            });
        }

        self.set_state(AuthState::KeyExchange);
        let result = {
            let credentials = self.credentials.lock().expect("credentials lock poisoned");
            let credentials = credentials.as_ref().ok_or(AuthError::NotInitialized)?;
            process_shared_secret(&secret, &credentials.key_pair, &credentials.client_id)
        };

        let auth = match result {
            Ok(auth) => auth,
            Err(e) => {
                // Only the latch winner owns the terminal state; if the
                // monitor fired mid-exchange, TimedOut stands.
                if latch
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.cancel_timeout_monitor();
                    self.set_state(AuthState::Failed);
                } else {
                    self.set_state(AuthState::TimedOut);
                }
                return Err(e.into());
            }
        };

        if latch
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Key exchange completed after the QR window elapsed; discarding");
            self.set_state(AuthState::TimedOut);
            return Err(AuthError::QrTimedOut);
        }
        self.cancel_timeout_monitor();

        self.session.write().await.apply_auth(&auth);
        self.set_state(AuthState::Authenticated);
        info!("Authentication successful for client {}", auth.client_id);
        self.event_bus.dispatch(&Event::Authenticated {
            client_id: auth.client_id,
            timestamp: auth.timestamp,
        });
        Ok(())
    }

    /// Restores a persisted session instead of issuing a QR code. Any
    /// failure leaves the shared state untouched so the caller can fall
    /// back to fresh authentication.
    pub async fn restore(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        record: SerializableSession,
    ) -> Result<()> {
        let restored = SessionState::restore(record)?;
        info!("Attempting session restore for {:?}", restored.client_id);

        let body = json!({
            "action": "restore",
            "clientId": restored.client_id,
            "serverToken": restored.server_token,
            "clientToken": restored.client_token,
        });
        let tag = self.next_tag();
        self.transport
            .send_text(&binary::encode_text(&tag, &body))
            .await?;

        let response = self.await_tagged_response(events, &tag).await?;
        match binary::classify_control(&response) {
            ControlMessage::Status(200) | ControlMessage::InitResponse { status: 200, .. } => {}
            ControlMessage::Status(status)
            | ControlMessage::InitResponse { status, .. } => {
                return Err(AuthError::RestoreRejected(status));
            }
            other => {
                return Err(AuthError::Handshake(format!(
                    "unexpected restore response: {other:?}"
                )));
            }
        }

        let client_id = restored.client_id.clone();
        *self.session.write().await = restored;
        self.set_state(AuthState::Authenticated);
        info!("Session restored for {client_id:?}");
        self.event_bus.dispatch(&Event::Authenticated {
            client_id: client_id.unwrap_or_default(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Abandons the current attempt: drops credentials and cancels the
    /// timeout monitor. The shared session state is not touched.
    pub fn reset(&self) {
        self.cancel_timeout_monitor();
        *self.credentials.lock().expect("credentials lock poisoned") = None;
        self.set_state(AuthState::Idle);
        debug!("QR authentication reset");
    }
}
