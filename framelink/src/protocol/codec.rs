//! Buffered codec with marker-scan resynchronization.
//!
//! Unlike [`FrameDecoder`](super::FrameDecoder), which trusts framing
//! and is fed exactly-sized reads, this codec works over an elastic
//! [`BytesMut`] and hunts for the 4-byte start marker: garbage and
//! failed frame candidates are skipped one byte at a time until a frame
//! validates. The connection write path uses the [`Encoder`] half; the
//! dissector and the resync tests use the [`Decoder`] half.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::tracing::prelude::*;

use super::{
    encode_into, crc::crc16, Command, END_CODE_1, END_CODE_2, FOOTER_LEN, HEADER_LEN, START_MARKER,
};

/// Frame codec for buffered streams and captures.
#[derive(Debug)]
pub struct FrameCodec {
    arg_limit: u16,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_arg_limit(u16::MAX)
    }

    /// Header candidates declaring more than `arg_limit` arguments are
    /// treated as false markers and scanned past.
    pub fn with_arg_limit(arg_limit: u16) -> Self {
        Self { arg_limit }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Command;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, io::Error> {
        let mut skipped = 0usize;
        let decoded = loop {
            // Hunt for a start marker at the front of the buffer.
            while src.len() >= START_MARKER.len() && src[..4] != START_MARKER {
                src.advance(1);
                skipped += 1;
            }
            if src.len() < HEADER_LEN {
                break None;
            }

            let arg_count = u16::from_be_bytes([src[6], src[7]]);
            if arg_count > self.arg_limit {
                src.advance(1);
                skipped += 1;
                continue;
            }

            let body_len = HEADER_LEN + 4 * arg_count as usize;
            let total = body_len + FOOTER_LEN;
            if src.len() < total {
                src.reserve(total - src.len());
                break None;
            }

            let received = u16::from_be_bytes([src[body_len], src[body_len + 1]]);
            let end1 = u16::from_be_bytes([src[body_len + 2], src[body_len + 3]]);
            let end2 = u16::from_be_bytes([src[body_len + 4], src[body_len + 5]]);
            let computed = crc16(&src[..body_len]);
            if end1 != END_CODE_1 || end2 != END_CODE_2 || computed != received {
                // False marker or damaged frame; keep scanning.
                src.advance(1);
                skipped += 1;
                continue;
            }

            let mut frame = src.split_to(total);
            frame.advance(4); // start marker
            let code = frame.get_u16();
            let declared = frame.get_u16();
            let mut args = Vec::with_capacity(declared as usize);
            for _ in 0..declared {
                args.push(frame.get_i32());
            }
            break Some(Command { code, args });
        };

        if skipped > 0 {
            trace!(skipped, "skipped bytes while hunting for a start marker");
        }
        Ok(decoded)
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), io::Error> {
        encode_into(&item, dst);
        Ok(())
    }
}
