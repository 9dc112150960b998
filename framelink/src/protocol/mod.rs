//! Wire protocol for framed command records.
//!
//! A frame is a fixed 8-byte header (two start codes, command code,
//! argument count), a payload of big-endian 32-bit signed integers and a
//! 6-byte footer (CRC over header + payload, two end codes). All
//! multi-byte fields are network byte order.
//!
//! [`encode_into`] produces frames; [`FrameDecoder`] consumes them in
//! exactly-sized phases for the connection read loop; [`FrameCodec`] is
//! the buffered [`tokio_util::codec`] flavor that scans past garbage.

pub mod codec;
pub mod crc;
pub mod decoder;
pub mod error;

pub use codec::FrameCodec;
pub use decoder::{FrameDecoder, Step};
pub use error::FramingError;

use bytes::{BufMut, Bytes, BytesMut};

/// First start code, `EB 90` on the wire.
pub const START_CODE_1: u16 = 0xEB90;
/// Second start code, `5B 6A` on the wire.
pub const START_CODE_2: u16 = 0x5B6A;
/// First end code, `C5 A4` on the wire.
pub const END_CODE_1: u16 = 0xC5A4;
/// Second end code, `D2 79` on the wire.
pub const END_CODE_2: u16 = 0xD279;

/// The 4-byte start marker as it appears on the wire.
pub const START_MARKER: [u8; 4] = [0xEB, 0x90, 0x5B, 0x6A];

/// Header length in bytes: both start codes, command code, argument count.
pub const HEADER_LEN: usize = 8;
/// Footer length in bytes: CRC and both end codes.
pub const FOOTER_LEN: usize = 6;

/// Reserved command code for liveness frames. Heartbeats are consumed by
/// the connection manager and never delivered to consumers.
pub const HEARTBEAT: u16 = 0xFFFF;

/// Protocol ceiling on the number of arguments in one frame.
pub const MAX_ARGS: usize = u16::MAX as usize;

/// Largest legal frame, roughly 256 KiB.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + 4 * MAX_ARGS + FOOTER_LEN;

/// A command record: a 16-bit code and its 32-bit signed arguments.
///
/// Commands are plain values; they are moved onto the outbound queue by
/// producers and created fresh by the decoder for each inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub code: u16,
    pub args: Vec<i32>,
}

impl Command {
    pub fn new(code: u16, args: Vec<i32>) -> Self {
        Self { code, args }
    }

    /// The reserved zero-argument liveness command.
    pub fn heartbeat() -> Self {
        Self {
            code: HEARTBEAT,
            args: Vec::new(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.code == HEARTBEAT
    }

    /// On-wire size of this command: `14 + 4 * args.len()`.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + 4 * self.args.len() + FOOTER_LEN
    }
}

/// Serializes a command into `dst`.
///
/// Infallible for well-formed commands. Panics if the argument count
/// exceeds [`MAX_ARGS`], which cannot be represented in the header.
pub fn encode_into(cmd: &Command, dst: &mut BytesMut) {
    assert!(
        cmd.args.len() <= MAX_ARGS,
        "argument count {} exceeds protocol limit",
        cmd.args.len()
    );

    dst.reserve(cmd.frame_len());
    let start = dst.len();
    dst.put_u16(START_CODE_1);
    dst.put_u16(START_CODE_2);
    dst.put_u16(cmd.code);
    dst.put_u16(cmd.args.len() as u16);
    for &arg in &cmd.args {
        dst.put_i32(arg);
    }
    let crc = crc::crc16(&dst[start..]);
    dst.put_u16(crc);
    dst.put_u16(END_CODE_1);
    dst.put_u16(END_CODE_2);
}

/// Serializes a command into a fresh buffer.
pub fn encode(cmd: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(cmd.frame_len());
    encode_into(cmd, &mut buf);
    buf.freeze()
}
