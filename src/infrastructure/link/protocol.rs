//! Uplink wire protocol
//!
//! This module contains the framing and command payload layout for the
//! link to the remote drive unit.

use crate::domain::errors::FrameError;
use crate::domain::models::{ControlCommand, MotorDirection, MAX_SERVO_ANGLE};
use crate::domain::settings::FRAME_PAYLOAD_LIMIT;
use tracing::trace;

/// First byte of every frame ('[')
pub const START_MARKER: u8 = 0x5B;

/// Last byte of every frame (']')
pub const END_MARKER: u8 = 0x5D;

/// Start marker, length byte and end marker
pub const FRAME_OVERHEAD: usize = 3;

/// Serialized size of a [`ControlCommand`]
pub const COMMAND_PAYLOAD_LEN: usize = 4;

/// One length-delimited wire unit
///
/// # Frame Structure
///
/// ```text
/// [0]       : Start marker (0x5B)
/// [1]       : Payload length N (0..=255)
/// [2..2+N]  : Payload
/// [2+N]     : End marker (0x5D)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Wrap a payload, rejecting anything a one-byte length cannot describe
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > FRAME_PAYLOAD_LIMIT {
            return Err(FrameError::Oversize);
        }

        let mut bytes = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
        bytes.push(START_MARKER);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(payload);
        bytes.push(END_MARKER);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[2..self.bytes.len() - 1]
    }

    /// Total size on the wire, markers and length byte included
    pub fn wire_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Command payload layout (4 bytes)
///
/// ```text
/// [0] : Motor direction (0 = stop, 1 = forward, 2 = reverse)
/// [1] : Servo angle, two's-complement i8 in -90..=90
/// [2] : Motor speed, unsigned 0..=255
/// [3] : Reserved, always 0
/// ```
pub fn command_payload(cmd: &ControlCommand) -> [u8; COMMAND_PAYLOAD_LEN] {
    [
        cmd.direction().as_byte(),
        cmd.servo_angle() as u8,
        cmd.speed(),
        cmd.reserved(),
    ]
}

/// Parse a command payload, rejecting values the encoder never produces
pub fn parse_command_payload(payload: &[u8]) -> Result<ControlCommand, FrameError> {
    let [direction, angle, speed, reserved] = payload else {
        return Err(FrameError::Malformed);
    };

    let direction = MotorDirection::from_byte(*direction).ok_or(FrameError::Malformed)?;
    let angle = *angle as i8;
    if !(-MAX_SERVO_ANGLE..=MAX_SERVO_ANGLE).contains(&angle) || *reserved != 0 {
        return Err(FrameError::Malformed);
    }

    Ok(ControlCommand::new(direction, angle, *speed))
}

/// Frame codec with a configurable payload ceiling
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload: FRAME_PAYLOAD_LIMIT,
        }
    }
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(FRAME_PAYLOAD_LIMIT),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn encode_payload(&self, payload: &[u8]) -> Result<Frame, FrameError> {
        if payload.len() > self.max_payload {
            return Err(FrameError::Oversize);
        }
        Frame::from_payload(payload)
    }

    /// Validate markers and length, returning the single frame in `bytes`
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<Frame, FrameError> {
        match bytes.first() {
            None => return Err(FrameError::Truncated),
            Some(&START_MARKER) => {}
            Some(_) => return Err(FrameError::Malformed),
        }

        let Some(&length) = bytes.get(1) else {
            return Err(FrameError::Truncated);
        };
        let length = usize::from(length);
        if length > self.max_payload {
            return Err(FrameError::Oversize);
        }

        let expected = length + FRAME_OVERHEAD;
        if bytes.len() < expected {
            return Err(FrameError::Truncated);
        }
        // trailing bytes mean the length byte disagrees with the payload
        if bytes.len() > expected || bytes[expected - 1] != END_MARKER {
            return Err(FrameError::Malformed);
        }

        Ok(Frame {
            bytes: bytes.to_vec(),
        })
    }

    pub fn encode(&self, cmd: &ControlCommand) -> Result<Frame, FrameError> {
        self.encode_payload(&command_payload(cmd))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ControlCommand, FrameError> {
        let frame = self.decode_frame(bytes)?;
        trace!("Decoded frame: {:02X?}", frame.as_bytes());
        parse_command_payload(frame.payload())
    }
}

/// Encode a command into its fixed seven-byte frame
pub fn encode(cmd: &ControlCommand) -> Frame {
    let payload = command_payload(cmd);
    let mut bytes = Vec::with_capacity(COMMAND_PAYLOAD_LEN + FRAME_OVERHEAD);
    bytes.push(START_MARKER);
    bytes.push(COMMAND_PAYLOAD_LEN as u8);
    bytes.extend_from_slice(&payload);
    bytes.push(END_MARKER);
    Frame { bytes }
}

pub fn decode(bytes: &[u8]) -> Result<ControlCommand, FrameError> {
    FrameCodec::default().decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let cmd = ControlCommand::new(MotorDirection::Reverse, -90, 200);
        let frame = encode(&cmd);
        assert_eq!(frame.as_bytes(), &[0x5B, 0x04, 0x02, 0xA6, 0xC8, 0x00, 0x5D]);
        assert_eq!(frame.wire_len(), COMMAND_PAYLOAD_LEN + FRAME_OVERHEAD);
    }

    #[test]
    fn test_round_trip_every_command() {
        let directions = [
            MotorDirection::Stop,
            MotorDirection::Forward,
            MotorDirection::Reverse,
        ];
        for direction in directions {
            for angle in -MAX_SERVO_ANGLE..=MAX_SERVO_ANGLE {
                for speed in 0..=u8::MAX {
                    let cmd = ControlCommand::new(direction, angle, speed);
                    assert_eq!(decode(encode(&cmd).as_bytes()), Ok(cmd));
                }
            }
        }
    }

    #[test]
    fn test_codec_encode_matches_free_encode() {
        let cmd = ControlCommand::new(MotorDirection::Forward, 33, 44);
        assert_eq!(FrameCodec::default().encode(&cmd), Ok(encode(&cmd)));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        // length says 3 but four payload bytes follow
        let bytes = [0x5B, 0x03, 0x01, 0x00, 0x10, 0x00, 0x5D];
        assert_eq!(decode(&bytes), Err(FrameError::Malformed));

        // trailing garbage after a well-formed frame
        let mut bytes = encode(&ControlCommand::neutral()).into_bytes();
        bytes.push(0x00);
        assert_eq!(decode(&bytes), Err(FrameError::Malformed));
    }

    #[test]
    fn test_missing_markers_are_malformed() {
        let mut bytes = encode(&ControlCommand::neutral()).into_bytes();
        bytes[0] = 0x00;
        assert_eq!(decode(&bytes), Err(FrameError::Malformed));

        let mut bytes = encode(&ControlCommand::neutral()).into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert_eq!(decode(&bytes), Err(FrameError::Malformed));
    }

    #[test]
    fn test_short_buffers_are_truncated() {
        assert_eq!(decode(&[]), Err(FrameError::Truncated));
        assert_eq!(decode(&[0x5B]), Err(FrameError::Truncated));
        assert_eq!(decode(&[0x5B, 0x04, 0x01, 0x00]), Err(FrameError::Truncated));
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let payload = vec![0u8; 256];
        assert_eq!(Frame::from_payload(&payload), Err(FrameError::Oversize));

        let frame = Frame::from_payload(&vec![0u8; 255]).unwrap();
        assert_eq!(frame.wire_len(), 258);
    }

    #[test]
    fn test_configured_limit() {
        let codec = FrameCodec::new(2);
        assert_eq!(
            codec.encode(&ControlCommand::neutral()),
            Err(FrameError::Oversize)
        );
        assert_eq!(codec.decode_frame(&[0x5B, 0x03, 1, 2, 3, 0x5D]), Err(FrameError::Oversize));
        assert_eq!(FrameCodec::new(4096).max_payload(), 255);
    }

    #[test]
    fn test_generic_payload_frames() {
        let codec = FrameCodec::default();
        let frame = codec.encode_payload(&[]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x5B, 0x00, 0x5D]);
        assert!(frame.payload().is_empty());
        assert_eq!(frame.wire_len(), FRAME_OVERHEAD);

        let decoded = codec.decode_frame(&[0x5B, 0x02, 0xAA, 0xBB, 0x5D]).unwrap();
        assert_eq!(decoded.payload(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_invalid_payload_values_rejected() {
        // unknown direction
        assert_eq!(
            decode(&[0x5B, 0x04, 0x07, 0x00, 0x00, 0x00, 0x5D]),
            Err(FrameError::Malformed)
        );
        // angle 91
        assert_eq!(
            decode(&[0x5B, 0x04, 0x00, 0x5B, 0x00, 0x00, 0x5D]),
            Err(FrameError::Malformed)
        );
        // reserved byte set
        assert_eq!(
            decode(&[0x5B, 0x04, 0x00, 0x00, 0x00, 0x01, 0x5D]),
            Err(FrameError::Malformed)
        );
        // well-formed frame with a non-command payload length
        assert_eq!(decode(&[0x5B, 0x01, 0x00, 0x5D]), Err(FrameError::Malformed));
    }
}
