mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::{Recorder, build_secret_blob, parse_qr};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, sleep, timeout};
use wawebcore::crypto::{cbc, mac};
use wawebcore::session::SerializableSession;
use wawebcore::types::events::Event;
use whatsapp_web_rs::store::FileStore;
use whatsapp_web_rs::transport::mock::MockTransport;
use whatsapp_web_rs::transport::{Transport, TransportEvent, TransportFactory};
use whatsapp_web_rs::{Client, ClientConfig, ClientError};

/// Hands out a pre-scripted mock transport exactly once.
struct MockFactory {
    inner: Mutex<Option<(Arc<MockTransport>, mpsc::Receiver<TransportEvent>)>>,
}

impl MockFactory {
    fn new(pair: (Arc<MockTransport>, mpsc::Receiver<TransportEvent>)) -> Self {
        Self {
            inner: Mutex::new(Some(pair)),
        }
    }
}

#[async_trait::async_trait]
impl TransportFactory for MockFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (transport, rx) = self
            .inner
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("transport already taken"))?;
        transport.inject(TransportEvent::Connected).await;
        Ok((transport, rx))
    }
}

async fn wait_for<T>(
    log: &StdMutex<Vec<Event>>,
    pick: impl Fn(&Event) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(found) = log.lock().unwrap().iter().find_map(&pick) {
                return found;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("event did not arrive in time")
}

fn seal_inbound(enc_key: &[u8; 32], mac_key: &[u8; 32], payload: &Value) -> Vec<u8> {
    let plaintext = serde_json::to_vec(payload).unwrap();
    let encrypted = cbc::encrypt(enc_key, &plaintext, None).unwrap();
    let tag = mac::sha256(mac_key, &[&encrypted]);
    let mut frame = vec![0x01];
    frame.extend_from_slice(&tag);
    frame.extend_from_slice(&encrypted);
    frame
}

#[tokio::test]
async fn test_client_end_to_end_qr_auth_and_messaging() {
    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");

    let (transport, rx) = MockTransport::new();
    transport.respond_to_next_send(|sent| {
        let tag = sent.split(',').next().unwrap().to_string();
        let body = json!({"status": 200, "ref": "abc123", "ttl": 20000});
        Some(TransportEvent::TextReceived(format!("{tag},{body}")))
    });

    let client = Arc::new(Client::new(
        Arc::new(MockFactory::new((transport.clone(), rx))),
        ClientConfig {
            session_path: Some(session_path.clone()),
            ..ClientConfig::default()
        },
    ));
    let (recorder, log) = Recorder::new();
    client.add_event_handler(recorder);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    // Phone scan: read the QR, answer with a valid secret blob.
    let qr_code = wait_for(&log, |e| match e {
        Event::Qr { code, .. } => Some(code.clone()),
        _ => None,
    })
    .await;
    let (_, client_public, _) = parse_qr(&qr_code);

    let mut session_keys = [0u8; 64];
    session_keys[..32].copy_from_slice(&[0xAA; 32]);
    session_keys[32..].copy_from_slice(&[0xBB; 32]);
    let blob = build_secret_blob(&client_public, &session_keys);
    let conn = json!(["Conn", {"secret": BASE64.encode(&blob)}]);
    transport
        .inject(TransportEvent::TextReceived(format!("s1,{conn}")))
        .await;

    wait_for(&log, |e| match e {
        Event::Authenticated { .. } => Some(()),
        _ => None,
    })
    .await;
    assert!(client.is_authenticated().await);

    // Outbound: frame is tagged, authenticated and decryptable.
    client.send_text_message("555@c.us", "hello").await.unwrap();
    let frame = transport.sent_binary.lock().unwrap()[0].clone();
    assert_eq!(frame[0], 0x01);
    let (tag, encrypted) = frame[1..].split_at(32);
    assert!(mac::verify_sha256(&[0xBB; 32], &[encrypted], tag));
    let plaintext = cbc::decrypt(&[0xAA; 32], encrypted).unwrap();
    let value: Value = serde_json::from_slice(&plaintext).unwrap();
    assert_eq!(value["type"], "text");
    assert_eq!(value["to"], "555@c.us");
    assert_eq!(value["body"], "hello");

    // Inbound: a sealed message frame surfaces as a message event.
    let inbound = seal_inbound(
        &[0xAA; 32],
        &[0xBB; 32],
        &json!({
            "id": "in1", "jid": "777@c.us", "type": "text",
            "body": "pong", "t": 1700000000
        }),
    );
    transport
        .inject(TransportEvent::BinaryReceived(inbound.clone().into()))
        .await;
    let message = wait_for(&log, |e| match e {
        Event::Message(m) => Some(m.clone()),
        _ => None,
    })
    .await;
    assert_eq!(message.message_id, "in1");

    // A tampered frame is dropped without producing an event.
    let mut tampered = inbound;
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    transport
        .inject(TransportEvent::BinaryReceived(tampered.into()))
        .await;
    sleep(Duration::from_millis(50)).await;
    let messages = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::Message(_)))
        .count();
    assert_eq!(messages, 1);

    // The session landed on disk after authentication.
    let record = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(record)) = FileStore::new(&session_path).load().await {
                return record;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not persisted");
    assert_eq!(record.enc_key, hex::encode([0xAA; 32]));

    // Dropping the transport ends the run loop.
    transport.inject(TransportEvent::Disconnected).await;
    let outcome = runner.await.unwrap();
    assert!(matches!(outcome, Err(ClientError::ConnectionLost)));
    assert!(
        log.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::Disconnected))
    );
}

#[tokio::test]
async fn test_client_restores_persisted_session_without_qr() {
    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    FileStore::new(&session_path)
        .save(&SerializableSession {
            client_id: "restored-cid".into(),
            enc_key: hex::encode([0x0A; 32]),
            mac_key: hex::encode([0x0B; 32]),
            server_token: Some("stok".into()),
            client_token: Some("ctok".into()),
        })
        .await
        .unwrap();

    let (transport, rx) = MockTransport::new();
    transport.respond_to_next_send(|sent| {
        let tag = sent.split(',').next().unwrap().to_string();
        Some(TransportEvent::TextReceived(format!(
            "{tag},{}",
            json!({"status": 200})
        )))
    });

    let client = Arc::new(Client::new(
        Arc::new(MockFactory::new((transport.clone(), rx))),
        ClientConfig {
            session_path: Some(session_path),
            ..ClientConfig::default()
        },
    ));
    let (recorder, log) = Recorder::new();
    client.add_event_handler(recorder);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    let client_id = wait_for(&log, |e| match e {
        Event::Authenticated { client_id, .. } => Some(client_id.clone()),
        _ => None,
    })
    .await;
    assert_eq!(client_id, "restored-cid");
    assert!(client.is_authenticated().await);

    // No QR was issued, and the wire saw a restore request.
    assert!(!log.lock().unwrap().iter().any(|e| matches!(e, Event::Qr { .. })));
    let sent = transport.sent_text.lock().unwrap()[0].clone();
    assert!(sent.contains(r#""action":"restore""#));
    assert!(sent.contains("restored-cid"));

    transport.inject(TransportEvent::Disconnected).await;
    runner.await.unwrap().unwrap_err();
}

#[tokio::test]
async fn test_rejected_restore_falls_back_to_qr_and_clears_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    FileStore::new(&session_path)
        .save(&SerializableSession {
            client_id: "stale-cid".into(),
            enc_key: hex::encode([0x0A; 32]),
            mac_key: hex::encode([0x0B; 32]),
            server_token: Some("stok".into()),
            client_token: None,
        })
        .await
        .unwrap();

    let (transport, rx) = MockTransport::new();
    // The restore request is rejected; the following init succeeds.
    transport.respond_to_next_send(|sent| {
        let tag = sent.split(',').next().unwrap().to_string();
        Some(TransportEvent::TextReceived(format!(
            "{tag},{}",
            json!({"status": 401})
        )))
    });
    transport.respond_to_next_send(|sent| {
        let tag = sent.split(',').next().unwrap().to_string();
        let body = json!({"status": 200, "ref": "fresh-ref", "ttl": 20000});
        Some(TransportEvent::TextReceived(format!("{tag},{body}")))
    });

    let client = Arc::new(Client::new(
        Arc::new(MockFactory::new((transport.clone(), rx))),
        ClientConfig {
            session_path: Some(session_path.clone()),
            ..ClientConfig::default()
        },
    ));
    let (recorder, log) = Recorder::new();
    client.add_event_handler(recorder);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    let qr_code = wait_for(&log, |e| match e {
        Event::Qr { code, .. } => Some(code.clone()),
        _ => None,
    })
    .await;
    assert!(qr_code.starts_with("fresh-ref,"));
    assert!(!client.is_authenticated().await);

    // The stale record is gone and both requests hit the wire in order.
    assert!(FileStore::new(&session_path).load().await.unwrap().is_none());
    {
        let sent = transport.sent_text.lock().unwrap();
        assert!(sent[0].contains(r#""action":"restore""#));
        assert!(sent[1].contains(r#""admin","init""#));
    }
    assert!(
        !log.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::Authenticated { .. }))
    );

    transport.inject(TransportEvent::Disconnected).await;
    runner.await.unwrap().unwrap_err();
}

#[tokio::test]
async fn test_sending_before_authentication_is_rejected() {
    let (transport, rx) = MockTransport::new();
    let client = Client::new(
        Arc::new(MockFactory::new((transport, rx))),
        ClientConfig {
            session_path: None,
            ..ClientConfig::default()
        },
    );

    assert!(matches!(
        client.send_text_message("555@c.us", "hi").await,
        Err(ClientError::NotAuthenticated)
    ));
}
