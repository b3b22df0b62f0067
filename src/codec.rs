//! Stateless frame encoding, streaming frame decoding.
//!
//! [`FrameCodec::decode`] is handed a `BytesMut` window that may contain less
//! than a whole frame; it either returns a [`Decoded::Frame`] and advances
//! past the consumed bytes, reports [`Decoded::Incomplete`] (remembering
//! nothing — callers re-present the accumulated buffer on the next read), or
//! fails with an [`Error`] carrying an implied close code (see
//! `crate::error::Error`).

use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::state::Role;

pub enum Decoded {
    Frame(Frame),
    Incomplete,
}

/// Minimum number of bytes needed before a length field can even be read.
const MIN_HEADER_LEN: usize = 2;

pub struct FrameCodec;

impl FrameCodec {
    /// Attempts to decode exactly one frame from the front of `buf`. On
    /// success the consumed bytes are advanced out of `buf`; on
    /// `Incomplete`, `buf` is left untouched so the caller can append more
    /// bytes and retry.
    pub fn decode(buf: &mut BytesMut) -> Result<Decoded, Error> {
        if buf.len() < MIN_HEADER_LEN {
            return Ok(Decoded::Incomplete);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let final_fragment = (b0 & 0b1000_0000) != 0;
        let rsv1 = (b0 & 0b0100_0000) != 0;
        let rsv2 = (b0 & 0b0010_0000) != 0;
        let rsv3 = (b0 & 0b0001_0000) != 0;
        // The base draft carries no extensions: any RSV bit set is a protocol error.
        if rsv1 || rsv2 || rsv3 {
            return Err(Error::RSVNotZero);
        }

        let opcode = OpCode::from_byte(b0 & 0b0000_1111)?;

        if !final_fragment && opcode.is_control() {
            return Err(Error::ControlFramesFragmented);
        }

        let masked = (b1 & 0b1000_0000) != 0;
        let len7 = (b1 & 0b0111_1111) as usize;

        if len7 > 125 && opcode.is_control() {
            return Err(Error::ControlFramePayloadSize);
        }

        let mut cursor = MIN_HEADER_LEN;
        let payload_len: u64 = match len7 {
            0..=125 => len7 as u64,
            126 => {
                if buf.len() < cursor + 2 {
                    return Ok(Decoded::Incomplete);
                }
                let v = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]);
                cursor += 2;
                // Minimally-encoded: a length that fits in 7 bits must not use the 16-bit form.
                if (v as u64) <= 125 {
                    return Err(Error::NonMinimalLength);
                }
                v as u64
            }
            127 => {
                if buf.len() < cursor + 8 {
                    return Ok(Decoded::Incomplete);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[cursor..cursor + 8]);
                cursor += 8;
                let v = u64::from_be_bytes(raw);
                // Top bit reserved and must be 0; also enforce minimal encoding.
                if v & 0x8000_0000_0000_0000 != 0 {
                    return Err(Error::NonMinimalLength);
                }
                if v <= u16::MAX as u64 {
                    return Err(Error::NonMinimalLength);
                }
                v
            }
            _ => unreachable!("7-bit field"),
        };

        if payload_len as usize > crate::frame::MAX_PAYLOAD_SIZE {
            return Err(Error::MaxFrameSize);
        }

        let mask_key = if masked {
            if buf.len() < cursor + 4 {
                return Ok(Decoded::Incomplete);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[cursor..cursor + 4]);
            cursor += 4;
            Some(key)
        } else {
            None
        };

        let payload_len = payload_len as usize;
        if buf.len() < cursor + payload_len {
            return Ok(Decoded::Incomplete);
        }

        buf.advance(cursor);
        let mut payload = buf.split_to(payload_len).to_vec();

        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Decoded::Frame(Frame {
            final_fragment,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked,
            payload,
        }))
    }

    /// Encodes one frame for the wire. `role` decides the masking rule: a
    /// `Client` frame always gets a fresh random mask key; a `Server` frame
    /// is never masked.
    pub fn encode(frame: &Frame, role: Role) -> BytesMut {
        let mut out = BytesMut::with_capacity(frame.payload.len() + 14);

        let first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
        out.extend_from_slice(&[first_byte]);

        let should_mask = role.must_mask_outbound();
        let payload_len = frame.payload.len();
        let mask_bit = if should_mask { 0b1000_0000 } else { 0 };

        if payload_len <= 125 {
            out.extend_from_slice(&[mask_bit | payload_len as u8]);
        } else if payload_len <= u16::MAX as usize {
            let len_bytes = (payload_len as u16).to_be_bytes();
            out.extend_from_slice(&[mask_bit | 126, len_bytes[0], len_bytes[1]]);
        } else {
            let len_bytes = (payload_len as u64).to_be_bytes();
            out.extend_from_slice(&[mask_bit | 127]);
            out.extend_from_slice(&len_bytes);
        }

        if should_mask {
            let key: [u8; 4] = rand::random();
            out.extend_from_slice(&key);
            let mut masked_payload = frame.payload.clone();
            apply_mask(&mut masked_payload, key);
            out.extend_from_slice(&masked_payload);
        } else {
            out.extend_from_slice(&frame.payload);
        }

        out
    }
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
