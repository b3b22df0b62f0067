//! An async WebSocket protocol engine for the Tokio stack.
//!
//! Implements [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455):
//! the HTTP Upgrade handshake, frame encoding/decoding, fragmentation and
//! masking rules, the close handshake, and ping/pong liveness — for both
//! servers ([`server::Server`]) and clients ([`client::Client`]).
//!
//! A server binds a listener and hands every accepted connection to a
//! bounded pool of decode workers; a client dials a `ws://`/`wss://` URL
//! directly. Both drive the same [`connection::Connection`] state machine
//! and publish an [`event::Event`] stream applications can either poll
//! directly or drive through an [`event::WebSocketHandler`].
//!
//! ```no_run
//! use futures::StreamExt;
//! use wsengine::config::ServerConfig;
//! use wsengine::server::Server;
//!
//! # async fn run() -> Result<(), wsengine::error::Error> {
//! let (server, mut events) = Server::bind("127.0.0.1:9001", ServerConfig::default()).await?;
//! while let Some(_event) = events.next().await {}
//! server.stop(std::time::Duration::from_secs(1)).await;
//! # Ok(())
//! # }
//! ```

pub mod buffer_pool;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod draft;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod message;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod state;
pub mod stream;
mod utils;
pub mod worker_pool;
