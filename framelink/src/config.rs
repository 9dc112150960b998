//! Per-connection configuration.

use std::time::Duration;

/// Automatic acknowledgement of received frames, applied by the client
/// role on a command (non-monitor) link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// No automatic acknowledgement.
    #[default]
    None,

    /// Ack with the received command's code and a single argument
    /// carrying the frame's total byte count.
    FrameBytes,

    /// Re-enqueue the received command verbatim.
    Echo,
}

/// Connection knobs. The listen/connect role is chosen by the
/// [`open_server`](crate::open_server) / [`open_client`](crate::open_client)
/// entry points, not here.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Emit a heartbeat every `heartbeat_interval` and, for the client
    /// role, expect the peer to do the same (arming the read-idle
    /// deadline).
    pub use_heartbeat: bool,

    /// Client role only: issue oversized speculative reads instead of
    /// decoding frames. Any bytes at all mean the link is alive; a zero
    /// read means it is lost.
    pub monitor_link: bool,

    /// Automatic acknowledgement policy.
    pub ack: AckPolicy,

    /// Heartbeat cadence.
    pub heartbeat_interval: Duration,

    /// Read deadline when heartbeats are expected or a frame is half
    /// read. A 500 ms grace period over the heartbeat cadence.
    pub read_idle_timeout: Duration,

    /// Deadline for one connect attempt.
    pub connect_timeout: Duration,

    /// Pause between failed connect attempts.
    pub retry_delay: Duration,

    /// `SO_SNDBUF` for established sockets. Kept small to favor
    /// low-latency delivery of small frames.
    pub send_buffer_size: usize,

    /// Upper bound accepted for a header's argument count. Headers
    /// declaring more are rejected as framing errors before any payload
    /// buffer is reserved.
    pub max_args: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            use_heartbeat: false,
            monitor_link: false,
            ack: AckPolicy::None,
            heartbeat_interval: Duration::from_millis(1000),
            read_idle_timeout: Duration::from_millis(1500),
            connect_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
            send_buffer_size: 1024,
            max_args: u16::MAX,
        }
    }
}
