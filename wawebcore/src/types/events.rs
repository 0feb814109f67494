use crate::types::message::MessageEvent;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Events emitted by the client to registered handlers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A QR payload is ready to be rendered for scanning.
    Qr { code: String, timeout: Duration },
    /// The key exchange completed and session keys are installed.
    Authenticated {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The QR window elapsed without a successful scan.
    Timeout,
    Connected,
    Disconnected,
    Message(MessageEvent),
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

/// Register-many, fire-all handler registry. Handlers fire in registration
/// order; a handler only observes the event, so one slow or misbehaving
/// handler cannot stop the others from being invoked.
#[derive(Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            // A misbehaving handler must not take down the dispatch loop
            // or starve the handlers registered after it.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler.handle_event(event)
            }));
            if outcome.is_err() {
                log::error!("Event handler panicked; continuing dispatch");
            }
        }
    }
}
