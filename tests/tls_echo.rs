//! End-to-end scenario from spec §8.2: the same echo round trip as
//! `echo.rs`, but over `wss://` with a test self-signed certificate.
//! Also exercises `Client::has_ssl_support`/`Client::ssl_session`, and
//! their plain-socket counterparts from the same scenario.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rustls_pemfile::{certs, private_key};
use wsengine::client::Client;
use wsengine::config::{ClientConfig, ServerConfig};
use wsengine::event::{Event, EventStream};
use wsengine::frame::CloseCode;
use wsengine::message::Message;
use wsengine::server::Server;

async fn next_event(events: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended early")
}

/// Builds a self-signed cert for "localhost", a `rustls::ServerConfig`
/// wrapping it, and a temp file holding the cert's PEM for the client's
/// `ca_file` to trust (real deployments use a CA-issued cert instead).
fn test_tls_server_config() -> (rustls::ServerConfig, std::path::PathBuf) {
    let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = certified_key.cert.pem();
    let key_pem = certified_key.key_pair.serialize_pem();

    let cert_chain = certs(&mut Cursor::new(cert_pem.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = private_key(&mut Cursor::new(key_pem.as_bytes()))
        .unwrap()
        .expect("test cert carries a private key");

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .unwrap();

    let ca_path = std::env::temp_dir().join(format!("wsengine-tls-echo-{}.pem", std::process::id()));
    std::fs::write(&ca_path, cert_pem).unwrap();

    (server_config, ca_path)
}

#[tokio::test]
async fn tls_echo_round_trip_closes_cleanly() {
    let (tls_config, ca_path) = test_tls_server_config();
    let server_config = ServerConfig {
        tls_config: Some(Arc::new(tls_config)),
        ..ServerConfig::default()
    };
    let (server, mut server_events) = Server::bind("127.0.0.1:0", server_config).await.unwrap();
    let url = format!("wss://localhost:{}/", server.local_addr().port());

    let client_config = ClientConfig {
        ca_file: Some(ca_path.to_str().unwrap().to_string()),
        ..ClientConfig::default()
    };
    let (client, mut client_events) = Client::connect(url, client_config).await.unwrap();
    assert!(client.connect_blocking().await);
    assert!(client.has_ssl_support());
    assert!(!client.ssl_session().unwrap().protocol_version.is_empty());

    match next_event(&mut server_events).await {
        Event::NewClient(..) => {}
        _ => panic!("expected NewClient as the server's first event"),
    }

    client.send_text("hello").unwrap();
    match next_event(&mut server_events).await {
        Event::NewMessage(_, Message::Text(text)) => assert_eq!(text, "hello"),
        _ => panic!("expected server to receive \"hello\" over TLS"),
    }

    server.broadcast(Message::Text("hello".to_string()));
    match next_event(&mut client_events).await {
        Event::NewMessage(_, Message::Text(text)) => assert_eq!(text, "hello"),
        _ => panic!("expected client to receive the broadcast over TLS"),
    }

    client.close(CloseCode::Normal, "bye").unwrap();
    match next_event(&mut client_events).await {
        Event::Disconnect(_, info) => assert_eq!(info.code, CloseCode::Normal),
        _ => panic!("expected client to observe its own close"),
    }
    match next_event(&mut server_events).await {
        Event::Disconnect(_, info) => assert_eq!(info.code, CloseCode::Normal),
        _ => panic!("expected server to observe the peer-initiated close"),
    }

    server.stop(Duration::from_millis(200)).await;
    let _ = std::fs::remove_file(&ca_path);
}

#[tokio::test]
async fn plain_socket_has_no_ssl_support() {
    let (server, _server_events) = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    let url = format!("ws://{}/", server.local_addr());

    let (client, _client_events) = Client::connect(url, ClientConfig::default()).await.unwrap();
    assert!(!client.has_ssl_support());
    assert!(matches!(
        client.ssl_session(),
        Err(wsengine::error::Error::IllegalState(_))
    ));

    server.stop(Duration::from_millis(200)).await;
}
