use crate::error::Error;
use crate::frame::{Frame, OpCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Converts a fully-reassembled data frame into a Message. Per the base
    /// draft, Text frames MUST be valid UTF-8 once assembled.
    pub fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => String::from_utf8(frame.payload)
                .map(Message::Text)
                .map_err(|_| Error::InvalidUtf8),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.clone(),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) => Ok(String::from_utf8(data.clone())?),
        }
    }

    /// Splits the message into a sequence of frames bounded by
    /// `max_frame_size`, following the `(TEXT|BINARY) CONT* FIN` opcode
    /// pattern RFC 6455 requires for fragmented messages.
    pub fn to_frames(self, max_frame_size: usize) -> Vec<Frame> {
        let opcode = match &self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        };

        let payload = match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        };

        if payload.is_empty() {
            return vec![Frame::new(true, opcode, payload)];
        }

        let mut frames = Vec::new();
        for chunk in payload.chunks(max_frame_size.max(1)) {
            let frame_opcode = if frames.is_empty() {
                opcode
            } else {
                OpCode::Continue
            };
            frames.push(Frame::new(false, frame_opcode, chunk.to_vec()));
        }

        if let Some(last_frame) = frames.last_mut() {
            last_frame.final_fragment = true;
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_small_message_is_one_final_frame() {
        let frames = Message::Text("hi".to_string()).to_frames(1024);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].final_fragment);
        assert_eq!(frames[0].opcode, OpCode::Text);
    }

    #[test]
    fn large_message_splits_into_continue_frames() {
        let payload = vec![b'x'; 100];
        let frames = Message::Binary(payload.clone()).to_frames(30);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        for frame in &frames[1..] {
            assert_eq!(frame.opcode, OpCode::Continue);
        }
        assert!(frames.last().unwrap().final_fragment);
        let reassembled: Vec<u8> = frames.into_iter().flat_map(|f| f.payload).collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn invalid_utf8_text_frame_is_rejected() {
        let frame = Frame::new(true, OpCode::Text, vec![0xFF, 0xFE]);
        assert!(matches!(Message::from_frame(frame), Err(Error::InvalidUtf8)));
    }
}
