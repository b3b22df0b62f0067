use crate::error::Error;

/// Default size of a read buffer handed out by the [`crate::buffer_pool::BufferPool`].
pub const DEFAULT_RCVBUF: usize = 16 * 1024;

/// Hard ceiling on a single frame's payload length, regardless of configured
/// `max_frame_size`. Matches RFC 6455's 63-bit length field in spirit while
/// keeping allocations bounded on this platform.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            // 0x3-0x7 and 0xB-0xF are reserved by RFC 6455 and MUST fail parsing.
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary | OpCode::Continue)
    }
}

/// A single RFC 6455 frame as it crosses the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub final_fragment: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload,
        }
    }

    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.as_u16().to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(true, OpCode::Close, payload)
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// `Control frames (opcode >= 0x8) have fin=true and payload <= 125 octets.`
    pub fn validate_control_frame(&self) -> Result<(), Error> {
        if self.opcode.is_control() {
            if !self.final_fragment {
                return Err(Error::ControlFramesFragmented);
            }
            if self.payload.len() > 125 {
                return Err(Error::ControlFramePayloadSize);
            }
        }
        Ok(())
    }
}

/// RFC 6455 §7.4 close codes. 1006 is never sent on the wire — it is
/// synthesized locally to represent an abnormal closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    ProtocolError,
    Unsupported,
    AbnormalClose,
    InvalidPayload,
    PolicyViolation,
    TooBig,
    ExtensionRequired,
    UnexpectedCondition,
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::AbnormalClose => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::ExtensionRequired => 1010,
            CloseCode::UnexpectedCondition => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1006 => CloseCode::AbnormalClose,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::ExtensionRequired,
            1011 => CloseCode::UnexpectedCondition,
            other => CloseCode::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for byte in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let op = OpCode::from_byte(byte).unwrap();
            assert_eq!(op.as_u8(), byte);
        }
    }

    #[test]
    fn reserved_opcodes_fail() {
        for byte in [0x3u8, 0x4, 0x7, 0xB, 0xF] {
            assert!(OpCode::from_byte(byte).is_err());
        }
    }

    #[test]
    fn control_frame_validation() {
        let mut frame = Frame::new(false, OpCode::Ping, Vec::new());
        assert!(matches!(
            frame.validate_control_frame(),
            Err(Error::ControlFramesFragmented)
        ));
        frame.final_fragment = true;
        frame.payload = vec![0u8; 126];
        assert!(matches!(
            frame.validate_control_frame(),
            Err(Error::ControlFramePayloadSize)
        ));
    }

    #[test]
    fn close_code_roundtrip() {
        for code in [1000u16, 1001, 1002, 1007, 1008, 1009, 1011, 4000] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }
}
