//! The callback surface applications drive off of.
//!
//! Two layers, by design: [`EventStream`] is the low-level primitive (a
//! `Stream` over an mpsc channel) and
//! [`WebSocketHandler`] is a trait-based adapter on top of it, driven by
//! [`HandlerDriver`] — the Rust realization of "abstract callback class
//! becomes an interface."

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

use crate::connection::FragmentInfo;
use crate::error::Error;
use crate::frame::CloseCode;
use crate::message::Message;
use crate::registry::ConnectionHandle;
use crate::state::CloseInfo;

pub type ID = Uuid;

/// Generates a fresh connection identifier. Called once per accepted (or
/// dialed) connection.
pub fn generate_new_uuid() -> Uuid {
    let buf: [u8; 16] = rand::random();
    Uuid::new_v8(buf)
}

/// Every observable occurrence on a connection, delivered in arrival
/// order for that connection (no ordering guarantee across connections).
pub enum Event {
    NewClient(ID, ConnectionHandle),
    /// A non-final fragment of a message still being reassembled. The
    /// deprecated `onFragment` callback's realization — purely
    /// observational, emitted alongside (never instead of) the eventual
    /// `NewMessage` once the fragment sequence completes.
    Fragment(ID, FragmentInfo),
    NewMessage(ID, Message),
    Disconnect(ID, CloseInfo),
    Error(ID, Error),
}

/// Wraps the receiving half of the event channel in a `Stream` so callers
/// don't need to touch `tokio::sync::mpsc` directly.
pub struct EventStream {
    receiver: Receiver<Event>,
}

impl EventStream {
    pub fn new(receiver: Receiver<Event>) -> Self {
        Self { receiver }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}

/// The trait form of the event surface: one method per [`Event`] variant,
/// plus a server-only `on_start`. Implement this instead of matching on
/// `Event` directly when a stateful, method-per-occasion shape reads
/// better than a stream of enum values.
pub trait WebSocketHandler: Send + Sync {
    fn on_start(&self) {}
    fn on_open(&self, _id: ID, _handle: &ConnectionHandle) {}
    /// Deprecated in the source library this engine is modeled on; kept
    /// here as an optional hook with a no-op default. Never coupled to the
    /// reassembly invariants — skipping it changes nothing about how
    /// messages are delivered.
    fn on_fragment(&self, _id: ID, _info: &FragmentInfo) {}
    fn on_message(&self, id: ID, message: Message);
    fn on_close(&self, id: ID, close_info: &CloseInfo);
    fn on_error(&self, id: ID, error: &Error);
}

/// Drives a [`WebSocketHandler`] from an [`EventStream`] until the channel
/// closes (the server or client shut down).
pub struct HandlerDriver<H: WebSocketHandler> {
    handler: H,
}

impl<H: WebSocketHandler> HandlerDriver<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub async fn run(&self, mut events: EventStream) {
        self.handler.on_start();
        while let Some(event) = events.next().await {
            match event {
                Event::NewClient(id, handle) => self.handler.on_open(id, &handle),
                Event::Fragment(id, info) => self.handler.on_fragment(id, &info),
                Event::NewMessage(id, message) => self.handler.on_message(id, message),
                Event::Disconnect(id, close_info) => self.handler.on_close(id, &close_info),
                Event::Error(id, error) => self.handler.on_error(id, &error),
            }
        }
    }
}

impl ConnectionHandle {
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.send_message(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.send_message(Message::Binary(data))
    }

    pub fn send_message(&self, message: Message) -> Result<(), Error> {
        if self.activity.is_closing() {
            return Err(Error::NotConnected);
        }
        for frame in message.to_frames(self.max_frame_size) {
            self.outbound
                .try_send(frame)
                .map_err(|_| Error::CommunicationError)?;
        }
        Ok(())
    }

    /// Requests a local close. Routed through `close_tx` to the connection's
    /// own reader task rather than written straight to `outbound`, so the
    /// `CLOSE` frame only ever comes from the state machine that owns
    /// `ReadyState` — local close() is always the last frame sent.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<(), Error> {
        if self.activity.is_closing() {
            return Err(Error::NotConnected);
        }
        self.close_tx
            .try_send((code, reason.to_string()))
            .map_err(|_| Error::CommunicationError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandler {
        messages: std::sync::Mutex<Vec<String>>,
    }

    impl WebSocketHandler for RecordingHandler {
        fn on_message(&self, _id: ID, message: Message) {
            if let Message::Text(text) = message {
                self.messages.lock().unwrap().push(text);
            }
        }

        fn on_close(&self, _id: ID, _close_info: &CloseInfo) {}
        fn on_error(&self, _id: ID, _error: &Error) {}
    }

    #[tokio::test]
    async fn driver_dispatches_events_to_handler() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let id = generate_new_uuid();
        tx.send(Event::NewMessage(id, Message::Text("hi".into())))
            .await
            .unwrap();
        drop(tx);

        let handler = RecordingHandler {
            messages: std::sync::Mutex::new(Vec::new()),
        };
        let driver = HandlerDriver::new(handler);
        driver.run(EventStream::new(rx)).await;
        assert_eq!(driver.handler.messages.into_inner().unwrap(), vec!["hi"]);
    }

    #[test]
    fn generated_uuids_are_unique() {
        assert_ne!(generate_new_uuid(), generate_new_uuid());
    }
}
