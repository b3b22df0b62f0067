//! End-to-end scenario from spec §8.3: a large binary message crosses
//! the wire as several fragments and reassembles byte-for-byte on the
//! other side, with `on_fragment`/`Event::Fragment` observed along the way.

use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use wsengine::config::{ClientConfig, ServerConfig, WebSocketConfig};
use wsengine::event::{Event, EventStream};
use wsengine::message::Message;
use wsengine::server::Server;
use wsengine::client::Client;

const FRAGMENT_SIZE: usize = 14 * 1024;
const PAYLOAD_SIZE: usize = 70 * 1024;

async fn next_event(events: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended early")
}

#[tokio::test]
async fn large_binary_message_reassembles_across_fragments() {
    let (server, mut server_events) = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    let url = format!("ws://{}/", server.local_addr());

    let client_config = ClientConfig {
        web_socket_config: WebSocketConfig {
            max_frame_size: Some(FRAGMENT_SIZE),
            ..WebSocketConfig::default()
        },
        ..ClientConfig::default()
    };
    let (client, mut client_events) = Client::connect(url, client_config).await.unwrap();
    assert!(client.connect_blocking().await);

    match next_event(&mut server_events).await {
        Event::NewClient(..) => {}
        _ => panic!("expected NewClient"),
    }

    let payload: Vec<u8> = (0..PAYLOAD_SIZE).map(|i| (i % 256) as u8).collect();
    let expected_digest = Sha256::digest(&payload);
    client.send_binary(payload.clone()).unwrap();

    let mut fragments_seen = 0;
    let message = loop {
        match next_event(&mut server_events).await {
            Event::Fragment(_, info) => {
                fragments_seen += 1;
                assert_eq!(info.len, FRAGMENT_SIZE);
                assert!(!info.fin);
            }
            Event::NewMessage(_, message) => break message,
            _ => panic!("unexpected event while reassembling the fragmented message"),
        }
    };

    // 5 fragments total; the last one completes the message and is
    // delivered as `NewMessage` rather than another `Fragment` event, so
    // only the first 4 surface as `Fragment`.
    assert_eq!(fragments_seen, 4);

    let Message::Binary(received) = message else {
        panic!("expected a binary message");
    };
    assert_eq!(received.len(), PAYLOAD_SIZE);
    let actual_digest = Sha256::digest(&received);
    assert_eq!(actual_digest.as_slice(), expected_digest.as_slice());

    client.close(wsengine::frame::CloseCode::Normal, "done").unwrap();
    let _ = next_event(&mut client_events).await;
    server.stop(Duration::from_millis(200)).await;
}
