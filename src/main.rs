use chrono::Local;
use log::{error, info};
use std::sync::Arc;
use wawebcore::types::events::{Event, EventHandler};
use whatsapp_web_rs::transport::WebSocketTransportFactory;
use whatsapp_web_rs::{Client, ClientConfig};

// Minimal demo: authenticate via QR (or a persisted session) and log
// every incoming message.
//
// Usage:
//   cargo run                 # session persisted to ./session.json

struct Logger;

impl EventHandler for Logger {
    fn handle_event(&self, event: &Event) {
        match event {
            Event::Qr { code, timeout } => {
                info!(
                    "Scan this QR payload within {}s:\n{code}",
                    timeout.as_secs()
                );
            }
            Event::Authenticated { client_id, .. } => {
                info!("Authenticated as {client_id}");
            }
            Event::Timeout => error!("QR scan window elapsed; restart to retry"),
            Event::Connected => info!("Connected"),
            Event::Disconnected => info!("Disconnected"),
            Event::Message(message) => {
                info!(
                    "[{}] {} -> {:?}",
                    message.timestamp, message.jid, message.content
                );
            }
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let client = Client::new(
            Arc::new(WebSocketTransportFactory::new()),
            ClientConfig::default(),
        );
        client.add_event_handler(Arc::new(Logger));

        if let Err(e) = client.run().await {
            error!("Client exited: {e}");
        }
    });
}
