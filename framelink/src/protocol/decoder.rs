//! Incremental frame decoder.
//!
//! The connection read loop asks the kernel for exactly the bytes the
//! decoder needs next, so the decoder never buffers: each call to
//! [`FrameDecoder::feed`] consumes one complete phase (header, payload
//! or footer) and answers with the size of the next one.
//!
//! ```text
//!              feed(8B header)            feed(4·n B args)
//!  AwaitHeader ───────────────► AwaitArgs ────────────────► AwaitFooter
//!       ▲                                                       │
//!       └────────────────── feed(6B footer) ────────────────────┘
//! ```
//!
//! On [`Step::Corrupt`] the caller owns recovery: reset the decoder,
//! discard whatever is buffered at the transport and read a fresh
//! header candidate. The decoder trusts framing and does not scan for
//! markers; [`super::FrameCodec`] is the scanning flavor.

use bytes::Buf;

use super::crc::Crc16;
use super::{
    Command, FramingError, END_CODE_1, END_CODE_2, FOOTER_LEN, HEADER_LEN, START_CODE_1,
    START_CODE_2,
};

/// What the decoder wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Feed exactly `n` more bytes for the next phase. May be zero for
    /// an argument phase with no arguments; re-enter with an empty
    /// slice.
    Need(usize),

    /// The scratch command now holds a complete, validated frame.
    Complete,

    /// Markers or CRC failed; the caller must reset and resynchronize.
    Corrupt(FramingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitHeader,
    AwaitArgs,
    AwaitFooter,
}

/// Three-phase decoder state: the phase, the running CRC and the
/// argument count declared by the current header.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    crc: Crc16,
    arg_count: u16,
    arg_limit: u16,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_arg_limit(u16::MAX)
    }

    /// A decoder that rejects headers declaring more than `arg_limit`
    /// arguments before any payload space is reserved.
    pub fn with_arg_limit(arg_limit: u16) -> Self {
        Self {
            state: State::AwaitHeader,
            crc: Crc16::new(),
            arg_count: 0,
            arg_limit,
        }
    }

    /// Resets to `AwaitHeader`, discarding any in-progress frame.
    pub fn restart(&mut self) {
        self.state = State::AwaitHeader;
        self.crc = Crc16::new();
        self.arg_count = 0;
    }

    /// True while a frame is partially decoded.
    pub fn mid_frame(&self) -> bool {
        self.state != State::AwaitHeader
    }

    /// Bytes the decoder expects in the next `feed` call.
    pub fn next_request(&self) -> usize {
        match self.state {
            State::AwaitHeader => HEADER_LEN,
            State::AwaitArgs => 4 * self.arg_count as usize,
            State::AwaitFooter => FOOTER_LEN,
        }
    }

    /// Consumes exactly the bytes of the current phase, populating
    /// `scratch` incrementally.
    pub fn feed(&mut self, bytes: &[u8], scratch: &mut Command) -> Step {
        debug_assert_eq!(bytes.len(), self.next_request());
        let mut buf = bytes;
        match self.state {
            State::AwaitHeader => {
                let code1 = buf.get_u16();
                let code2 = buf.get_u16();
                if code1 != START_CODE_1 || code2 != START_CODE_2 {
                    return Step::Corrupt(FramingError::BadStartCode(code1, code2));
                }
                let cmd_code = buf.get_u16();
                let arg_count = buf.get_u16();
                if arg_count > self.arg_limit {
                    return Step::Corrupt(FramingError::TooManyArgs {
                        count: arg_count,
                        limit: self.arg_limit,
                    });
                }
                scratch.code = cmd_code;
                scratch.args.clear();
                scratch.args.reserve(arg_count as usize);
                self.crc = Crc16::new();
                self.crc.update(bytes);
                self.arg_count = arg_count;
                self.state = State::AwaitArgs;
                Step::Need(4 * arg_count as usize)
            }

            State::AwaitArgs => {
                for _ in 0..self.arg_count {
                    scratch.args.push(buf.get_i32());
                }
                self.crc.update(bytes);
                self.state = State::AwaitFooter;
                Step::Need(FOOTER_LEN)
            }

            State::AwaitFooter => {
                let received = buf.get_u16();
                let code1 = buf.get_u16();
                let code2 = buf.get_u16();
                if code1 != END_CODE_1 || code2 != END_CODE_2 {
                    return Step::Corrupt(FramingError::BadEndCode(code1, code2));
                }
                let computed = self.crc.finish();
                if computed != received {
                    return Step::Corrupt(FramingError::CrcMismatch { computed, received });
                }
                self.state = State::AwaitHeader;
                Step::Complete
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{encode, FOOTER_LEN, HEADER_LEN};
    use super::*;

    /// Drives a decoder over a byte stream the way the read loop does:
    /// slices of exactly the requested size.
    fn run(decoder: &mut FrameDecoder, stream: &[u8]) -> Result<Vec<Command>, FramingError> {
        let mut decoded = Vec::new();
        let mut scratch = Command::default();
        let mut offset = 0;
        let mut request = HEADER_LEN;
        while offset + request <= stream.len() {
            let step = decoder.feed(&stream[offset..offset + request], &mut scratch);
            offset += request;
            match step {
                Step::Need(n) => request = n,
                Step::Complete => {
                    decoded.push(std::mem::take(&mut scratch));
                    request = HEADER_LEN;
                }
                Step::Corrupt(err) => return Err(err),
            }
        }
        Ok(decoded)
    }

    #[test]
    fn decodes_zero_arg_frame() {
        let frame = encode(&Command::new(0x0001, vec![]));
        let mut decoder = FrameDecoder::new();
        let decoded = run(&mut decoder, &frame).unwrap();
        assert_eq!(decoded, vec![Command::new(0x0001, vec![])]);
        assert!(!decoder.mid_frame());
    }

    #[test]
    fn decodes_args_including_negative() {
        let cmd = Command::new(0x00B0, vec![0xFACE, 0x0BAD, -1]);
        let frame = encode(&cmd);
        let decoded = run(&mut FrameDecoder::new(), &frame).unwrap();
        assert_eq!(decoded, vec![cmd]);
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let first = Command::new(0x10, vec![1, 2]);
        let second = Command::new(0x11, vec![-3]);
        let mut stream = encode(&first).to_vec();
        stream.extend_from_slice(&encode(&second));
        let decoded = run(&mut FrameDecoder::new(), &stream).unwrap();
        assert_eq!(decoded, vec![first, second]);
    }

    #[test]
    fn zero_arg_phase_consumes_nothing() {
        let frame = encode(&Command::new(0x7, vec![]));
        let mut decoder = FrameDecoder::new();
        let mut scratch = Command::default();

        assert_eq!(
            decoder.feed(&frame[..HEADER_LEN], &mut scratch),
            Step::Need(0)
        );
        assert!(decoder.mid_frame());
        assert_eq!(decoder.feed(&[], &mut scratch), Step::Need(FOOTER_LEN));
        assert_eq!(
            decoder.feed(&frame[HEADER_LEN..], &mut scratch),
            Step::Complete
        );
        assert_eq!(scratch.code, 0x7);
    }

    #[test]
    fn rejects_bad_start_code() {
        let mut frame = encode(&Command::new(0x1, vec![])).to_vec();
        frame[0] = 0x00;
        let err = run(&mut FrameDecoder::new(), &frame).unwrap_err();
        assert!(matches!(err, FramingError::BadStartCode(..)));
    }

    #[test]
    fn rejects_bad_end_code() {
        let mut frame = encode(&Command::new(0x1, vec![9])).to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = run(&mut FrameDecoder::new(), &frame).unwrap_err();
        assert!(matches!(err, FramingError::BadEndCode(..)));
    }

    #[test]
    fn rejects_corrupted_payload_via_crc() {
        let mut frame = encode(&Command::new(0x1, vec![0x01020304])).to_vec();
        frame[HEADER_LEN] ^= 0xFF; // flip a payload byte
        let err = run(&mut FrameDecoder::new(), &frame).unwrap_err();
        assert!(matches!(err, FramingError::CrcMismatch { .. }));
    }

    #[test]
    fn rejects_oversized_arg_count_before_allocating() {
        let frame = encode(&Command::new(0x1, vec![0; 8]));
        let mut decoder = FrameDecoder::with_arg_limit(4);
        let mut scratch = Command::default();
        let step = decoder.feed(&frame[..HEADER_LEN], &mut scratch);
        assert_eq!(
            step,
            Step::Corrupt(FramingError::TooManyArgs { count: 8, limit: 4 })
        );
        assert!(scratch.args.is_empty());
    }

    #[test]
    fn restart_recovers_after_corruption() {
        let good = Command::new(0x22, vec![5, 6, 7]);
        let mut decoder = FrameDecoder::new();
        let mut scratch = Command::default();

        let mut bad = encode(&Command::new(0x21, vec![])).to_vec();
        bad[2] = 0xAA; // break the second start code
        assert!(matches!(
            decoder.feed(&bad[..HEADER_LEN], &mut scratch),
            Step::Corrupt(_)
        ));

        decoder.restart();
        assert!(!decoder.mid_frame());
        let decoded = run(&mut decoder, &encode(&good)).unwrap();
        assert_eq!(decoded, vec![good]);
    }
}
