//! Binary frame encoding and resynchronizing decoding.
//!
//! Two wire versions are supported:
//!
//! - **Legacy (v1):** `$ M <dir> <len> <cmd> <payload> <xor>`, where the
//!   checksum is the XOR of length, command and payload bytes. Payloads of
//!   255 bytes or more use the jumbo form with a 16-bit length after the command.
//! - **Extended (v2):** `$ X <dir> <flag> <cmd:u16> <len:u16> <payload> <crc>`,
//!   where the checksum is a CRC-8/DVB-S2 over flag, command, length and payload.
//!
//! The [`Decoder`] accepts arbitrarily split chunks and skips noise and
//! corrupted frames without losing the frames that follow them.

use crate::command::LEGACY_MAX_ID;
use crc::{CRC_8_DVB_S2, Crc};
use log::{debug, trace};
use strum::{Display, FromRepr};

const PREAMBLE: u8 = b'$';
const MARKER_V1: u8 = b'M';
const MARKER_V2: u8 = b'X';
const JUMBO_LEN: u8 = 0xff;

/// Largest payload accepted by the decoder.
///
/// Longer declared lengths are treated as noise.
pub const MAX_PAYLOAD: usize = 4096;

/// Wire version of a frame.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Version {
    /// Legacy frame with an 8-bit command identifier.
    V1,
    /// Extended frame with a 16-bit command identifier.
    V2,
}

/// Direction byte of a frame.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Direction {
    /// Sent to the flight controller.
    Request = b'<',
    /// Successful reply from the flight controller.
    Response = b'>',
    /// Explicit error reply, e.g. for an unknown command.
    Error = b'!',
}

/// A single decoded or to-be-encoded frame.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Frame {
    /// Wire version.
    pub version: Version,
    /// Frame direction.
    pub direction: Direction,
    /// Command identifier.
    pub command: u16,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Constructs an outgoing request, choosing the smallest wire version
    /// able to represent the command identifier.
    #[must_use]
    pub fn request(command: u16, payload: &[u8]) -> Self {
        let version = if command > LEGACY_MAX_ID {
            Version::V2
        } else {
            Version::V1
        };

        Self {
            version,
            direction: Direction::Request,
            command,
            payload: payload.to_vec(),
        }
    }

    /// Serializes the frame into wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let bytes = match self.version {
            Version::V1 => self.encode_v1(),
            Version::V2 => self.encode_v2(),
        };

        trace!("Encoded frame: {bytes:02x?}");

        bytes
    }

    fn encode_v1(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 8);

        buf.extend_from_slice(&[PREAMBLE, MARKER_V1, self.direction as u8]);

        if self.payload.len() >= usize::from(JUMBO_LEN) {
            buf.extend_from_slice(&[JUMBO_LEN, self.command as u8]);
            buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        } else {
            buf.extend_from_slice(&[self.payload.len() as u8, self.command as u8]);
        }

        buf.extend_from_slice(&self.payload);
        buf.push(checksum_xor(&buf[3..]));

        buf
    }

    fn encode_v2(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 9);

        buf.extend_from_slice(&[PREAMBLE, MARKER_V2, self.direction as u8, 0x00]);
        buf.extend_from_slice(&self.command.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.push(crc8_dvb_s2(&buf[3..]));

        buf
    }
}

/// Encodes a request for the given command and payload.
#[must_use]
pub fn encode_request(command: u16, payload: &[u8]) -> Vec<u8> {
    Frame::request(command, payload).encode()
}

/// Computes the legacy XOR checksum.
#[must_use]
pub fn checksum_xor(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &x| acc ^ x)
}

const MSP_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_DVB_S2);

/// Computes the CRC-8/DVB-S2 checksum (polynomial `0xd5`, initial value 0).
#[must_use]
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    MSP_CRC.checksum(data)
}

/// Result of parsing the start of the receive buffer.
enum Parse {
    /// More bytes are required.
    Incomplete,
    /// The leading `$` does not start a valid frame.
    Invalid,
    /// A complete frame occupying the given number of bytes.
    Frame(Frame, usize),
}

/// Incremental frame decoder.
///
/// Feed received chunks into [`Decoder::push`], which returns every frame
/// completed by that chunk.
#[derive(Default, Debug)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    /// Constructs an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards any partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Returns the number of buffered bytes not yet part of a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Consumes a chunk and returns all frames completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        self.buf.extend_from_slice(chunk);

        loop {
            // Skip noise up to the next preamble
            match self.buf.iter().position(|&b| b == PREAMBLE) {
                Some(start) => {
                    if start > 0 {
                        trace!("Skipping {start} bytes of noise");
                        self.buf.drain(..start);
                    }
                }
                None => {
                    self.buf.clear();
                    break;
                }
            }

            match parse(&self.buf) {
                Parse::Incomplete => match self.buffered_frame() {
                    // A bogus header claiming a long payload must not hold
                    // back a complete frame already received after it
                    Some(start) => {
                        trace!("Skipping {start} bytes of truncated header");
                        self.buf.drain(..start);
                    }
                    None => break,
                },
                Parse::Invalid => {
                    // Resume scanning right after the bogus preamble so that
                    // frames swallowed by a corrupted length are recovered
                    self.buf.drain(..1);
                }
                Parse::Frame(frame, len) => {
                    self.buf.drain(..len);
                    frames.push(frame);
                }
            }
        }

        frames
    }

    /// Returns the offset of the first later preamble that starts a
    /// complete, checksum-valid frame.
    fn buffered_frame(&self) -> Option<usize> {
        (1..self.buf.len())
            .filter(|&i| self.buf[i] == PREAMBLE)
            .find(|&i| matches!(parse(&self.buf[i..]), Parse::Frame(..)))
    }
}

fn parse(buf: &[u8]) -> Parse {
    let Some(&marker) = buf.get(1) else {
        return Parse::Incomplete;
    };
    let version = match marker {
        MARKER_V1 => Version::V1,
        MARKER_V2 => Version::V2,
        _ => return Parse::Invalid,
    };
    let Some(&dir) = buf.get(2) else {
        return Parse::Incomplete;
    };
    let Some(direction) = Direction::from_repr(dir) else {
        return Parse::Invalid;
    };

    match version {
        Version::V1 => parse_v1(buf, direction),
        Version::V2 => parse_v2(buf, direction),
    }
}

fn parse_v1(buf: &[u8], direction: Direction) -> Parse {
    if buf.len() < 5 {
        return Parse::Incomplete;
    }

    let command = u16::from(buf[4]);
    let (header, len) = if buf[3] == JUMBO_LEN {
        if buf.len() < 7 {
            return Parse::Incomplete;
        }

        (7, usize::from(u16::from_le_bytes([buf[5], buf[6]])))
    } else {
        (5, usize::from(buf[3]))
    };

    if len > MAX_PAYLOAD {
        return Parse::Invalid;
    }

    let total = header + len + 1;

    if buf.len() < total {
        return Parse::Incomplete;
    }

    if checksum_xor(&buf[3..total - 1]) != buf[total - 1] {
        debug!("Dropping v1 frame for command {command} with incorrect checksum");

        return Parse::Invalid;
    }

    Parse::Frame(
        Frame {
            version: Version::V1,
            direction,
            command,
            payload: buf[header..total - 1].to_vec(),
        },
        total,
    )
}

fn parse_v2(buf: &[u8], direction: Direction) -> Parse {
    const HEADER: usize = 8;

    if buf.len() < HEADER {
        return Parse::Incomplete;
    }

    let command = u16::from_le_bytes([buf[4], buf[5]]);
    let len = usize::from(u16::from_le_bytes([buf[6], buf[7]]));

    if len > MAX_PAYLOAD {
        return Parse::Invalid;
    }

    let total = HEADER + len + 1;

    if buf.len() < total {
        return Parse::Incomplete;
    }

    if crc8_dvb_s2(&buf[3..total - 1]) != buf[total - 1] {
        debug!("Dropping v2 frame for command {command:#06x} with incorrect checksum");

        return Parse::Invalid;
    }

    Parse::Frame(
        Frame {
            version: Version::V2,
            direction,
            command,
            payload: buf[HEADER..total - 1].to_vec(),
        },
        total,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_logger;

    fn response_v1(command: u8, payload: &[u8]) -> Vec<u8> {
        Frame {
            version: Version::V1,
            direction: Direction::Response,
            command: command.into(),
            payload: payload.to_vec(),
        }
        .encode()
    }

    #[test]
    fn encode_legacy_request() {
        init_logger();

        assert_eq!(
            encode_request(1, &[]),
            [0x24, 0x4d, 0x3c, 0x00, 0x01, 0x01],
            "request bytes should be correct"
        );
        assert_eq!(
            encode_request(35, &[0x02, 0x00, 0x01, 0x20, 0x30]),
            [0x24, 0x4d, 0x3c, 0x05, 0x23, 0x02, 0x00, 0x01, 0x20, 0x30, 0x35],
            "request bytes should be correct"
        );
    }

    #[test]
    fn encode_extended_request() {
        init_logger();

        assert_eq!(
            encode_request(0x1003, &[0x00, 0x05, 0x00]),
            [0x24, 0x58, 0x3c, 0x00, 0x03, 0x10, 0x03, 0x00, 0x00, 0x05, 0x00, 0x3d],
            "request bytes should be correct"
        );

        let mut frame = Frame::request(100, &[]);

        frame.version = Version::V2;

        assert_eq!(
            frame.encode(),
            [0x24, 0x58, 0x3c, 0x00, 0x64, 0x00, 0x00, 0x00, 0x8f],
            "forced v2 request should be correct"
        );
    }

    #[test]
    fn encode_jumbo_request() {
        init_logger();

        let payload = [0xaa; 300];
        let bytes = encode_request(0x7b, &payload);

        assert_eq!(&bytes[..7], [0x24, 0x4d, 0x3c, 0xff, 0x7b, 0x2c, 0x01]);
        assert_eq!(bytes.len(), 7 + 300 + 1, "frame length should be correct");

        let mut decoder = Decoder::new();
        let frames = decoder.push(&bytes);

        assert_eq!(frames.len(), 1, "jumbo frame should decode");
        assert_eq!(frames[0].payload.len(), 300);
    }

    #[test]
    fn decode_split_chunks() {
        init_logger();

        let bytes = response_v1(108, &[0x10, 0x00, 0xf0, 0xff, 0x5a, 0x00]);
        let mut decoder = Decoder::new();

        assert!(decoder.push(&bytes[..4]).is_empty());
        assert!(decoder.push(&bytes[4..9]).is_empty());

        let frames = decoder.push(&bytes[9..]);

        assert_eq!(
            frames,
            [Frame {
                version: Version::V1,
                direction: Direction::Response,
                command: 108,
                payload: vec![0x10, 0x00, 0xf0, 0xff, 0x5a, 0x00],
            }],
            "frame should be reassembled"
        );
        assert_eq!(decoder.buffered(), 0, "buffer should be drained");
    }

    #[test]
    fn decode_multiple_frames_and_noise() {
        init_logger();

        let mut chunk = b"garbage".to_vec();

        chunk.extend(response_v1(109, &[0x01, 0x00, 0x00, 0x00, 0x02, 0x00]));
        chunk.extend_from_slice(&[0x00, 0x24, 0x13]);
        chunk.extend([0x24, 0x58, 0x21, 0x00, 0x31, 0x20, 0x00, 0x00, 0x50]);

        let frames = Decoder::new().push(&chunk);

        assert_eq!(frames.len(), 2, "both frames should decode");
        assert_eq!(frames[0].command, 109);
        assert_eq!(frames[1].command, 0x2031);
        assert_eq!(frames[1].direction, Direction::Error);
        assert_eq!(frames[1].version, Version::V2);
    }

    #[test]
    fn decode_extended_response() {
        init_logger();

        let frames =
            Decoder::new().push(&[0x24, 0x58, 0x3e, 0x00, 0x03, 0x10, 0x01, 0x00, 0x2a, 0xd0]);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x1003);
        assert_eq!(frames[0].payload, [0x2a], "payload should be correct");
    }

    #[test]
    fn resync_after_corrupted_length() {
        init_logger();

        // A truncated header claims a long payload and swallows the real frame
        let mut chunk = vec![0x24, 0x4d, 0x3e, 0x20, 0x6c];

        chunk.extend(response_v1(110, &[0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));

        let mut decoder = Decoder::new();
        let frames = decoder.push(&chunk);

        assert_eq!(frames.len(), 1, "swallowed frame should be recovered");
        assert_eq!(frames[0].command, 110);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn resync_across_chunks() {
        init_logger();

        let mut decoder = Decoder::new();

        assert!(decoder.push(&[0x24, 0x58, 0x3e, 0x00, 0x01]).is_empty());
        assert!(decoder.push(&[0x00, 0x00, 0x10]).is_empty());

        // The bogus header stays buffered until a complete frame shows up
        let frames = decoder.push(&response_v1(108, &[0x10, 0x00, 0x20, 0x00, 0x30, 0x00]));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 108);
        assert_eq!(frames[0].payload, [0x10, 0x00, 0x20, 0x00, 0x30, 0x00]);
    }

    #[test]
    fn partial_frame_waits_for_rest() {
        init_logger();

        let bytes = response_v1(110, &[0x7e, 0x00, 0x00]);
        let mut decoder = Decoder::new();

        assert!(decoder.push(&bytes[..6]).is_empty());
        assert_eq!(decoder.buffered(), 6);
        assert_eq!(decoder.push(&bytes[6..]).len(), 1);
    }

    #[test]
    fn drop_incorrect_checksum() {
        init_logger();

        let mut bytes = response_v1(101, &[0x01, 0x02]);
        let last = bytes.len() - 1;

        bytes[last] ^= 0xff;
        bytes.extend(response_v1(101, &[0x03]));

        let frames = Decoder::new().push(&bytes);

        assert_eq!(frames.len(), 1, "corrupted frame should be dropped");
        assert_eq!(frames[0].payload, [0x03]);
    }
}
