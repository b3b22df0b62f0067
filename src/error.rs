use crate::frame::{CloseCode, Frame};
use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Sender / Receiver errors
    #[error("{source}")]
    SendError {
        #[from]
        source: SendError<Frame>,
    },

    #[error("channel communication error")]
    CommunicationError,

    // General errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Sec-WebSocket-Version must be 13")]
    UnsupportedVersion,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    // Framing errors
    #[error("RSV bit set without a negotiated extension")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    #[error("Frame length was not minimally encoded")]
    NonMinimalLength,

    // Fragmentation errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("Invalid opcode")]
    InvalidOpcode,

    #[error("Client-originated data frame was not masked")]
    UnmaskedClientFrame,

    #[error("Server-originated frame must not be masked")]
    MaskedServerFrame,

    #[error("Text message payload is not valid UTF-8")]
    InvalidUtf8,

    // HTTP errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("URL has no port")]
    URLNoPort,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    // Domain addr parsing error
    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("use_tls = `{0}` argument does not match the passed URL scheme: `{1}`")]
    SchemeAgainstTlsConfig(bool, String),

    // Policy errors
    #[error("connection rejected by admission policy")]
    PolicyViolation,

    #[error("message size exceeds the configured policy limit")]
    MessageTooBig,

    // Usage errors — surfaced synchronously, engine state unchanged
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("not connected")]
    NotConnected,

    #[error("server already started")]
    AlreadyStarted,
}

impl Error {
    /// Maps a framing/fragmentation violation to the close code §8
    /// scenario 5 requires the peer to see on the wire. `None` for errors
    /// that aren't protocol violations (I/O failures, usage errors) —
    /// those tear the connection down without a CLOSE frame.
    pub fn protocol_close_code(&self) -> Option<CloseCode> {
        match self {
            Error::RSVNotZero
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::NonMinimalLength
            | Error::InvalidFrameFragmentation
            | Error::FragmentedInProgress
            | Error::InvalidContinuationFrame
            | Error::InvalidOpcode
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Error::MaxFrameSize | Error::MaxMessageSize | Error::MessageTooBig => {
                Some(CloseCode::TooBig)
            }
            _ => None,
        }
    }
}
