//! End-to-end scenario from spec §8.1: a server and a client exchange a
//! text message in both directions and then close cleanly with 1000.

use std::time::Duration;

use futures::StreamExt;
use wsengine::config::{ClientConfig, ServerConfig};
use wsengine::event::Event;
use wsengine::frame::CloseCode;
use wsengine::message::Message;
use wsengine::server::Server;
use wsengine::client::Client;

async fn next_event(events: &mut wsengine::event::EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended early")
}

#[tokio::test]
async fn plain_echo_round_trip_closes_cleanly() {
    let (server, mut server_events) = Server::bind("127.0.0.1:0", ServerConfig::default())
        .await
        .unwrap();
    let url = format!("ws://{}/", server.local_addr());

    let (client, mut client_events) = Client::connect(url, ClientConfig::default())
        .await
        .unwrap();
    assert!(client.connect_blocking().await);

    // Server sees the new connection before anything else.
    match next_event(&mut server_events).await {
        Event::NewClient(..) => {}
        _ => panic!("expected NewClient as the server's first event"),
    }

    client.send_text("hello").unwrap();
    match next_event(&mut server_events).await {
        Event::NewMessage(_, Message::Text(text)) => assert_eq!(text, "hello"),
        _ => panic!("expected server to receive \"hello\""),
    }

    // The server broadcasts back to every connection, including this one.
    server.broadcast(Message::Text("hello".to_string()));
    match next_event(&mut client_events).await {
        Event::NewMessage(_, Message::Text(text)) => assert_eq!(text, "hello"),
        _ => panic!("expected client to receive the broadcast"),
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
}
