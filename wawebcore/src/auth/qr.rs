use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// The data rendered into the pairing QR code.
///
/// Derived, never stored: it is rebuilt whenever the server issues a new
/// reference and invalidated on timeout or a successful scan.
#[derive(Debug, Clone)]
pub struct QrData {
    pub server_ref: String,
    pub public_key: [u8; 32],
    pub client_id: String,
}

impl QrData {
    pub fn new(server_ref: impl Into<String>, public_key: [u8; 32], client_id: impl Into<String>) -> Self {
        Self {
            server_ref: server_ref.into(),
            public_key,
            client_id: client_id.into(),
        }
    }

    /// Renders the scannable payload: `<ref>,<base64 public key>,<client_id>`.
    pub fn render(&self) -> String {
        format!(
            "{},{},{}",
            self.server_ref,
            BASE64.encode(self.public_key),
            self.client_id
        )
    }
}
