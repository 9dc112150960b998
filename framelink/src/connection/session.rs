//! One established socket: reader, writer and heartbeat workers.
//!
//! The reader owns the decoder and asks the kernel for exactly the
//! bytes the decoder needs next. The writer drains the outbound queue
//! through the frame encoder. A session ends when the peer goes away,
//! a deadline expires, a worker hits an I/O error, or the session token
//! is cancelled; the caller decides what the end means (client
//! reconnects, server retires the peer).

use std::io::ErrorKind;
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::config::AckPolicy;
use crate::protocol::{Command, FrameCodec, FrameDecoder, HEADER_LEN, Step};
use crate::queue::Received;
use crate::tracing::prelude::*;

use super::{Role, Shared};

/// Read scratch buffer, sized to hold the largest single decoder
/// request (a maximum-size payload) with room to spare.
const RECV_BUFFER_LEN: usize = 1 << 20;

/// Speculative read size for monitor links (the protocol's `0xFFFF`).
const MONITOR_READ_LEN: usize = 0xFFFF;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The session token was cancelled (shutdown or supersession).
    Stopped,
    /// Clean EOF from the peer.
    PeerClosed,
    ReadError,
    WriteError,
    /// The read-idle deadline expired with no traffic.
    IdleTimeout,
}

/// Runs one established stream to completion.
pub(crate) async fn run(
    shared: &Arc<Shared>,
    stream: TcpStream,
    session: CancellationToken,
) -> SessionEnd {
    if let Err(e) = tune_socket(&stream, shared.config.send_buffer_size) {
        debug!(error = %e, "failed to set socket send buffer size");
    }
    let (mut read_half, write_half) = stream.into_split();

    let writer = shared
        .tracker
        .spawn(write_loop(write_half, shared.clone(), session.clone()));
    let heartbeat = shared
        .config
        .use_heartbeat
        .then(|| shared.tracker.spawn(heartbeat_loop(shared.clone(), session.clone())));

    let end = if shared.config.monitor_link && shared.role == Role::Client {
        monitor_loop(&mut read_half, &session).await
    } else {
        read_loop(&mut read_half, shared, &session).await
    };

    session.cancel();
    let write_errored = writer.await.unwrap_or(false);
    if let Some(handle) = heartbeat {
        let _ = handle.await;
    }

    if end == SessionEnd::Stopped && write_errored && !shared.shutdown.is_cancelled() {
        SessionEnd::WriteError
    } else {
        end
    }
}

fn tune_socket(stream: &TcpStream, size: usize) -> std::io::Result<()> {
    socket2::SockRef::from(stream).set_send_buffer_size(size)
}

/// Decoder-driven read loop for command links.
async fn read_loop(
    read: &mut OwnedReadHalf,
    shared: &Arc<Shared>,
    session: &CancellationToken,
) -> SessionEnd {
    let cfg = &shared.config;
    let expects_heartbeat = cfg.use_heartbeat && shared.role == Role::Client;
    let mut decoder = FrameDecoder::with_arg_limit(cfg.max_args);
    let mut scratch = Command::default();
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    let mut request = HEADER_LEN;

    loop {
        let step = if request == 0 {
            // Zero-byte phase (a frame with no arguments); re-enter
            // the decoder without touching the socket.
            decoder.feed(&[], &mut scratch)
        } else {
            let deadline =
                (expects_heartbeat || decoder.mid_frame()).then_some(cfg.read_idle_timeout);
            match read_phase(read, &mut buf[..request], deadline, session).await {
                Ok(()) => decoder.feed(&buf[..request], &mut scratch),
                Err(end) => return end,
            }
        };

        match step {
            Step::Need(n) => request = n,

            Step::Complete => {
                let cmd = std::mem::take(&mut scratch);
                if cmd.is_heartbeat() {
                    // Liveness only; the completed read already
                    // refreshed the idle deadline. Never delivered.
                    trace!("heartbeat received");
                } else {
                    trace!(code = cmd.code, args = cmd.args.len(), "frame received");
                    if shared.role == Role::Client {
                        enqueue_ack(shared, &cmd);
                    }
                    shared.inbound.push(cmd);
                }
                request = HEADER_LEN;
            }

            Step::Corrupt(err) => {
                warn!(error = %err, "framing error, resynchronizing");
                let drained = drain_readable(read);
                if drained > 0 {
                    debug!(bytes = drained, "discarded unaligned bytes");
                }
                decoder.restart();
                scratch = Command::default();
                request = HEADER_LEN;
            }
        }
    }
}

/// Reads exactly `buf.len()` bytes, subject to the idle deadline and
/// session cancellation.
async fn read_phase(
    read: &mut OwnedReadHalf,
    buf: &mut [u8],
    deadline: Option<std::time::Duration>,
    session: &CancellationToken,
) -> Result<(), SessionEnd> {
    let result = tokio::select! {
        _ = session.cancelled() => return Err(SessionEnd::Stopped),
        result = async {
            match deadline {
                Some(limit) => time::timeout(limit, read.read_exact(buf)).await,
                None => Ok(read.read_exact(buf).await),
            }
        } => result,
    };
    match result {
        Err(_elapsed) => {
            warn!("read deadline expired with no traffic, dropping the link");
            Err(SessionEnd::IdleTimeout)
        }
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => {
            info!("peer closed the connection");
            Err(SessionEnd::PeerClosed)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "read failed");
            Err(SessionEnd::ReadError)
        }
        Ok(Ok(_)) => Ok(()),
    }
}

/// Pulls whatever is currently readable off the socket so the next
/// header read starts aligned with fresh data.
fn drain_readable(read: &OwnedReadHalf) -> usize {
    let mut scratch = [0u8; 4096];
    let mut total = 0;
    loop {
        match read.try_read(&mut scratch) {
            // EOF surfaces on the next read_exact.
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
    total
}

fn enqueue_ack(shared: &Shared, cmd: &Command) {
    match shared.config.ack {
        AckPolicy::None => {}
        AckPolicy::FrameBytes => {
            shared
                .outbound
                .push(Command::new(cmd.code, vec![cmd.frame_len() as i32]));
        }
        AckPolicy::Echo => shared.outbound.push(cmd.clone()),
    }
}

/// Monitor links carry no decodable traffic: any bytes at all prove
/// the link is alive, and a zero-length read means it is gone.
async fn monitor_loop(read: &mut OwnedReadHalf, session: &CancellationToken) -> SessionEnd {
    let mut buf = vec![0u8; MONITOR_READ_LEN];
    loop {
        let result = tokio::select! {
            _ = session.cancelled() => return SessionEnd::Stopped,
            result = read.read(&mut buf) => result,
        };
        match result {
            Ok(0) => {
                info!("monitor link closed by peer");
                return SessionEnd::PeerClosed;
            }
            Ok(n) => trace!(bytes = n, "monitor link alive"),
            Err(e) => {
                warn!(error = %e, "monitor read failed");
                return SessionEnd::ReadError;
            }
        }
    }
}

/// Drains the outbound queue through the frame encoder.
///
/// Returns true if it stopped because a write failed (after cancelling
/// the session so the reader stops too).
async fn write_loop(
    write_half: OwnedWriteHalf,
    shared: Arc<Shared>,
    session: CancellationToken,
) -> bool {
    let mut sink = FramedWrite::new(write_half, FrameCodec::new());
    loop {
        let received = tokio::select! {
            _ = session.cancelled() => return false,
            received = shared.outbound.recv() => received,
        };
        match received {
            Received::Command(cmd) => {
                trace!(code = cmd.code, args = cmd.args.len(), "writing frame");
                if let Err(e) = sink.send(cmd).await {
                    warn!(error = %e, "write failed, dropping the link");
                    session.cancel();
                    return true;
                }
            }
            Received::Closed => return false,
        }
    }
}

/// Enqueues a heartbeat on the configured cadence for as long as the
/// session lives.
async fn heartbeat_loop(shared: Arc<Shared>, session: CancellationToken) {
    let mut ticker = time::interval(shared.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            _ = ticker.tick() => shared.outbound.push(Command::heartbeat()),
        }
    }
}
