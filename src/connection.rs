//! Per-socket state machine: ready-state transitions, fragment reassembly,
//! and close-handshake bookkeeping, unified into a single machine so
//! ready-state transitions are centrally enforced against one transition
//! table.
//!
//! `Connection` never touches a socket directly — it is fed already-decoded
//! bytes (via [`Connection::receive`], called by a decode worker with a
//! [`crate::codec::FrameCodec`]) and produces outbound frames on a channel
//! the connection's writer future drains. This split is what lets the same
//! state machine serve both the server (buffer handed off by the reactor)
//! and the client (buffer read directly off its own socket).

use std::sync::Arc;

use tokio::sync::mpsc::Sender;

use crate::error::Error;
use crate::event::ID;
use crate::frame::{CloseCode, Frame, OpCode};
use crate::message::Message;
use crate::state::{CloseInfo, CloseInitiator, ConnectionActivity, ReadyState, Role};

struct FragmentedMessage {
    opcode: OpCode,
    payload: Vec<u8>,
}

/// Metadata for one non-final fragment of a message in progress — the
/// deprecated `onFragment` hook's payload. Informational only: nothing
/// about reassembly depends on whether a caller looks at this.
#[derive(Debug, Clone, Copy)]
pub struct FragmentInfo {
    pub opcode: OpCode,
    pub fin: bool,
    pub len: usize,
}

/// What a caller sees come out of [`Connection::receive`] or
/// [`Connection::close`]: either a fully reassembled message, or the fact
/// that the connection is now closed (with the negotiated code/reason).
pub enum ConnectionEvent {
    /// A non-final fragment of a message still being reassembled. Purely
    /// observational — emitted in addition to (never instead of) the
    /// eventual `Message` event once the fragment sequence completes.
    Fragment(FragmentInfo),
    Message(Message),
    /// A close handshake has begun — the ready state just moved to
    /// `Closing` and, if this side hadn't already sent one, an echoed
    /// `CLOSE` was queued. Not delivered to the application; the caller
    /// finalizes the `Closing` → `Closed` transition with
    /// [`Connection::finalize_close`] once the outbound queue has
    /// actually drained that frame onto the wire.
    Closing,
    Closed(CloseInfo),
}

/// One endpoint's view of a single WebSocket connection.
pub struct Connection {
    pub id: ID,
    role: Role,
    ready_state: ReadyState,
    fragmented: Option<FragmentedMessage>,
    close_info: Option<CloseInfo>,
    max_message_size: Option<usize>,
    max_frame_size: usize,
    outbound: Sender<Frame>,
    activity: Arc<ConnectionActivity>,
}

impl Connection {
    pub fn new(
        id: ID,
        role: Role,
        max_frame_size: usize,
        max_message_size: Option<usize>,
        outbound: Sender<Frame>,
        activity: Arc<ConnectionActivity>,
    ) -> Self {
        Self {
            id,
            role,
            ready_state: ReadyState::NotYetConnected,
            fragmented: None,
            close_info: None,
            max_message_size,
            max_frame_size,
            outbound,
            activity,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Clones the sender half of this connection's outbound queue — used to
    /// hand a matching [`crate::registry::ConnectionHandle`] to application
    /// code without exposing the state machine itself.
    pub fn outbound_sender(&self) -> Sender<Frame> {
        self.outbound.clone()
    }

    pub fn activity_handle(&self) -> Arc<ConnectionActivity> {
        self.activity.clone()
    }

    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    /// Called once the handshake completes successfully.
    pub fn on_handshake_ok(&mut self) -> Result<(), Error> {
        self.transition(ReadyState::Open)
    }

    /// Called when the handshake fails. No callback fires past this point
    /// except the final error the caller already has in hand.
    pub fn on_handshake_err(&mut self) {
        self.ready_state = ReadyState::Closed;
    }

    /// Feeds a decoded frame through the state machine. Called by a decode
    /// worker for every frame [`crate::codec::FrameCodec::decode`] produces
    /// out of the connection's staging buffer, strictly in arrival order.
    pub fn receive(&mut self, frame: Frame) -> Result<Option<ConnectionEvent>, Error> {
        if self.ready_state == ReadyState::Closed {
            // Accepted but never delivered — the peer may still be
            // trickling bytes in after we tore down.
            return Ok(None);
        }

        self.activity.mark_seen();
        self.validate_masking(&frame)?;
        frame.validate_control_frame()?;

        match frame.opcode {
            OpCode::Text | OpCode::Binary if !frame.final_fragment => {
                if self.fragmented.is_some() {
                    return Err(Error::FragmentedInProgress);
                }
                self.check_message_size(frame.payload.len())?;
                let info = FragmentInfo {
                    opcode: frame.opcode,
                    fin: false,
                    len: frame.payload.len(),
                };
                self.fragmented = Some(FragmentedMessage {
                    opcode: frame.opcode,
                    payload: frame.payload,
                });
                Ok(Some(ConnectionEvent::Fragment(info)))
            }
            OpCode::Continue => {
                let Some(fragmented) = self.fragmented.as_mut() else {
                    return Err(Error::InvalidContinuationFrame);
                };
                self.check_message_size(fragmented.payload.len() + frame.payload.len())?;
                fragmented.payload.extend_from_slice(&frame.payload);
                if !frame.final_fragment {
                    let info = FragmentInfo {
                        opcode: OpCode::Continue,
                        fin: false,
                        len: frame.payload.len(),
                    };
                    return Ok(Some(ConnectionEvent::Fragment(info)));
                }
                let fragmented = self.fragmented.take().unwrap();
                let message = Message::from_frame(Frame::new(
                    true,
                    fragmented.opcode,
                    fragmented.payload,
                ))?;
                Ok(Some(ConnectionEvent::Message(message)))
            }
            OpCode::Text | OpCode::Binary => {
                if self.fragmented.is_some() {
                    return Err(Error::InvalidFrameFragmentation);
                }
                self.check_message_size(frame.payload.len())?;
                let message = Message::from_frame(frame)?;
                Ok(Some(ConnectionEvent::Message(message)))
            }
            OpCode::Ping => {
                self.queue_outbound(Frame::pong(frame.payload))?;
                Ok(None)
            }
            OpCode::Pong => Ok(None),
            OpCode::Close => self.handle_incoming_close(frame),
        }
    }

    fn handle_incoming_close(&mut self, frame: Frame) -> Result<Option<ConnectionEvent>, Error> {
        let (code, reason) = parse_close_payload(&frame.payload);
        let already_closing = self.ready_state == ReadyState::Closing;

        if !already_closing {
            // Peer-initiated close: move to Closing and echo the code
            // back. `Closed` only follows once the caller confirms the
            // echo reached the wire — see `finalize_close`.
            self.transition(ReadyState::Closing)?;
            self.queue_outbound(Frame::close(code, &reason))?;
        }
        self.activity.mark_closing();

        let initiator = if already_closing {
            CloseInitiator::Local
        } else {
            CloseInitiator::Remote
        };
        self.close_info = Some(CloseInfo::new(code, reason, initiator));
        Ok(Some(ConnectionEvent::Closing))
    }

    /// Completes the `Closing` → `Closed` transition — the
    /// "outQueue drained" row of the state table — once the caller has
    /// confirmed the queued or echoed `CLOSE` frame actually reached the
    /// wire. Idempotent no-op if some other path (an I/O error racing the
    /// close handshake) already forced `Closed`.
    pub fn finalize_close(&mut self) -> ConnectionEvent {
        let _ = self.transition(ReadyState::Closed);
        let close_info = self.close_info.clone().unwrap_or_else(|| {
            CloseInfo::new(CloseCode::AbnormalClose, String::new(), CloseInitiator::Remote)
        });
        ConnectionEvent::Closed(close_info)
    }

    /// Local-initiated close: queues the outbound `CLOSE` frame (always the
    /// last frame this connection ever sends) and moves to `Closing`.
    pub fn close(&mut self, code: CloseCode, reason: impl Into<String>) -> Result<(), Error> {
        let reason = reason.into();
        self.transition(ReadyState::Closing)?;
        self.activity.mark_closing();
        self.queue_outbound(Frame::close(code, &reason))?;
        self.close_info = Some(CloseInfo::new(code, reason, CloseInitiator::Local));
        Ok(())
    }

    /// The socket died out from under us. Synthesizes a local 1006
    /// (never sent on the wire) and moves straight to `Closed`.
    pub fn on_io_error(&mut self) -> ConnectionEvent {
        self.activity.mark_closing();
        self.ready_state = ReadyState::Closed;
        let close_info = CloseInfo::new(
            CloseCode::AbnormalClose,
            String::new(),
            CloseInitiator::Remote,
        );
        self.close_info = Some(close_info.clone());
        ConnectionEvent::Closed(close_info)
    }

    pub fn send_message(&self, message: Message) -> Result<(), Error> {
        if self.ready_state != ReadyState::Open {
            return Err(Error::IllegalState("cannot send on a non-open connection"));
        }
        for frame in message.to_frames(self.max_frame_size) {
            self.queue_outbound(frame)?;
        }
        Ok(())
    }

    pub fn send_ping(&self, payload: Vec<u8>) -> Result<(), Error> {
        self.queue_outbound(Frame::ping(payload))
    }

    fn queue_outbound(&self, frame: Frame) -> Result<(), Error> {
        self.outbound
            .try_send(frame)
            .map_err(|_| Error::CommunicationError)
    }

    fn validate_masking(&self, frame: &Frame) -> Result<(), Error> {
        match self.role {
            // A server receives frames a client sent — those MUST be masked.
            Role::Server if !frame.masked => Err(Error::UnmaskedClientFrame),
            // A client receives frames a server sent — those MUST NOT be masked.
            Role::Client if frame.masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }

    fn check_message_size(&self, size: usize) -> Result<(), Error> {
        match self.max_message_size {
            Some(limit) if size > limit => Err(Error::MessageTooBig),
            _ => Ok(()),
        }
    }

    fn transition(&mut self, next: ReadyState) -> Result<(), Error> {
        if !self.ready_state.can_transition_to(next) {
            return Err(Error::IllegalState("invalid ready-state transition"));
        }
        self.ready_state = next;
        Ok(())
    }
}

fn parse_close_payload(payload: &[u8]) -> (CloseCode, String) {
    if payload.len() < 2 {
        return (CloseCode::Normal, String::new());
    }
    let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
    let reason = String::from_utf8_lossy(&payload[2..]).to_string();
    (code, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::generate_new_uuid;

    fn server_connection() -> (Connection, tokio::sync::mpsc::Receiver<Frame>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let mut conn = Connection::new(
            generate_new_uuid(),
            Role::Server,
            1024,
            Some(1 << 20),
            tx,
            std::sync::Arc::new(crate::state::ConnectionActivity::new()),
        );
        conn.on_handshake_ok().unwrap();
        (conn, rx)
    }

    fn masked_frame(opcode: OpCode, final_fragment: bool, payload: Vec<u8>) -> Frame {
        let mut frame = Frame::new(final_fragment, opcode, payload);
        frame.masked = true;
        frame
    }

    #[test]
    fn single_final_text_frame_yields_message() {
        let (mut conn, _rx) = server_connection();
        let frame = masked_frame(OpCode::Text, true, b"hi".to_vec());
        let event = conn.receive(frame).unwrap();
        assert!(matches!(
            event,
            Some(ConnectionEvent::Message(Message::Text(ref s))) if s == "hi"
        ));
    }

    #[test]
    fn fragmented_message_reassembles_on_final_continue() {
        let (mut conn, _rx) = server_connection();
        let first = conn
            .receive(masked_frame(OpCode::Binary, false, vec![1, 2]))
            .unwrap();
        assert!(matches!(first, Some(ConnectionEvent::Fragment(_))));
        let event = conn
            .receive(masked_frame(OpCode::Continue, true, vec![3, 4]))
            .unwrap();
        match event {
            Some(ConnectionEvent::Message(Message::Binary(data))) => {
                assert_eq!(data, vec![1, 2, 3, 4])
            }
            _ => panic!("expected reassembled binary message"),
        }
    }

    #[test]
    fn non_final_fragment_surfaces_fragment_event() {
        let (mut conn, _rx) = server_connection();
        let event = conn
            .receive(masked_frame(OpCode::Text, false, vec![1, 2, 3]))
            .unwrap();
        match event {
            Some(ConnectionEvent::Fragment(info)) => {
                assert_eq!(info.opcode, OpCode::Text);
                assert!(!info.fin);
                assert_eq!(info.len, 3);
            }
            _ => panic!("expected a fragment event"),
        }
    }

    #[test]
    fn continuation_without_start_is_rejected() {
        let (mut conn, _rx) = server_connection();
        let err = conn
            .receive(masked_frame(OpCode::Continue, true, vec![1]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidContinuationFrame));
    }

    #[test]
    fn interleaved_data_frame_during_fragment_is_rejected() {
        let (mut conn, _rx) = server_connection();
        conn.receive(masked_frame(OpCode::Text, false, vec![1]))
            .unwrap();
        let err = conn
            .receive(masked_frame(OpCode::Binary, true, vec![2]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFrameFragmentation));
    }

    #[test]
    fn unmasked_client_frame_is_rejected_by_server() {
        let (mut conn, _rx) = server_connection();
        let frame = Frame::new(true, OpCode::Text, b"hi".to_vec());
        let err = conn.receive(frame).unwrap_err();
        assert!(matches!(err, Error::UnmaskedClientFrame));
    }

    #[test]
    fn ping_queues_pong_and_surfaces_no_event() {
        let (mut conn, mut rx) = server_connection();
        let event = conn
            .receive(masked_frame(OpCode::Ping, true, vec![9]))
            .unwrap();
        assert!(event.is_none());
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.opcode, OpCode::Pong);
        assert_eq!(queued.payload, vec![9]);
    }

    #[test]
    fn local_close_then_peer_echo_reaches_closed() {
        let (mut conn, mut rx) = server_connection();
        conn.close(CloseCode::Normal, "bye").unwrap();
        assert_eq!(conn.ready_state(), ReadyState::Closing);
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.opcode, OpCode::Close);

        let echo = masked_frame(OpCode::Close, true, queued.payload);
        let event = conn.receive(echo).unwrap();
        // Still Closing — only `finalize_close` (called once the caller
        // has confirmed the queue drained) moves this to Closed.
        assert_eq!(conn.ready_state(), ReadyState::Closing);
        assert!(matches!(event, Some(ConnectionEvent::Closing)));

        let event = conn.finalize_close();
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert!(matches!(event, ConnectionEvent::Closed(_)));
    }

    #[test]
    fn peer_initiated_close_is_echoed_back() {
        let (mut conn, mut rx) = server_connection();
        let frame = masked_frame(OpCode::Close, true, Frame::close(CloseCode::Normal, "").payload);
        let event = conn.receive(frame).unwrap();
        assert_eq!(conn.ready_state(), ReadyState::Closing);
        assert!(matches!(event, Some(ConnectionEvent::Closing)));
        let echoed = rx.try_recv().unwrap();
        assert_eq!(echoed.opcode, OpCode::Close);

        let event = conn.finalize_close();
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert!(matches!(event, ConnectionEvent::Closed(_)));
    }

    #[test]
    fn frames_after_closed_are_accepted_but_not_delivered() {
        let (mut conn, mut rx) = server_connection();
        conn.receive(masked_frame(OpCode::Close, true, vec![]))
            .unwrap();
        let _ = rx.try_recv();
        conn.finalize_close();
        let event = conn
            .receive(masked_frame(OpCode::Text, true, b"late".to_vec()))
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (mut conn, _rx) = server_connection();
        let err = conn
            .receive(masked_frame(OpCode::Binary, true, vec![0u8; 2 << 20]))
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooBig));
    }
}
