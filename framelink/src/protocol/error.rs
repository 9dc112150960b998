//! Framing errors.

use thiserror::Error;

/// A malformed frame detected while decoding.
///
/// Framing errors are recovered locally: the decoder is reset, the
/// offending bytes are discarded and reading resumes. They are logged
/// but never surfaced to command consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("bad start code {0:#06x} {1:#06x}")]
    BadStartCode(u16, u16),

    #[error("bad end code {0:#06x} {1:#06x}")]
    BadEndCode(u16, u16),

    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    CrcMismatch { computed: u16, received: u16 },

    #[error("argument count {count} exceeds limit {limit}")]
    TooManyArgs { count: u16, limit: u16 },
}
