//! Connection management: endpoint roles, queues and lifecycle.
//!
//! A [`Connection`] is a cloneable handle over the shared state of one
//! endpoint. All socket I/O happens on worker tasks owned by the
//! connection: a reader driving the incremental decoder, a writer
//! draining the outbound queue and an optional heartbeat ticker.
//! Producers and consumers only ever touch the queues, so no lock is
//! ever held across a socket operation.
//!
//! ```text
//!  send() ──► outbound queue ──► writer task ──► socket
//!  recv_one() ◄── inbound queue ◄── reader task ◄── socket
//! ```

mod client;
mod server;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::protocol::Command;
use crate::queue::{CommandQueue, Received};
use crate::tracing::prelude::*;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Constructed but not connected. For the server role this means
    /// listening with no peer attached.
    Idle,

    /// Client role: a connect attempt is in flight.
    Connecting,

    /// A peer is attached and frames flow.
    Connected,

    /// Client role: the link was lost and will be retried.
    Reconnecting,

    /// Shut down; all workers have exited.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Server,
    Client,
}

/// State shared between the public handle and the worker tasks.
pub(crate) struct Shared {
    pub(crate) config: LinkConfig,
    pub(crate) role: Role,
    /// Client role: the address to connect to.
    pub(crate) target: Option<SocketAddr>,
    /// Server role: the bound listen address.
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) inbound: CommandQueue,
    pub(crate) outbound: CommandQueue,
    pub(crate) state: watch::Sender<LinkState>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    /// Server role: the session of the most recently accepted peer.
    pub(crate) active_peer: Mutex<Option<(u64, CancellationToken)>>,
    pub(crate) next_peer_id: AtomicU64,
}

impl Shared {
    fn new(
        config: LinkConfig,
        role: Role,
        target: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            config,
            role,
            target,
            local_addr,
            inbound: CommandQueue::new(),
            outbound: CommandQueue::new(),
            state,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active_peer: Mutex::new(None),
            next_peer_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    pub(crate) fn link_state(&self) -> LinkState {
        *self.state.borrow()
    }
}

/// Handle to one transport endpoint.
///
/// Cloning is cheap and every clone refers to the same connection.
/// Workers keep running until [`close`](Connection::close) is called.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Enqueues a command for transmission.
    ///
    /// On a client whose link is currently down the command is dropped
    /// with a log notice; producers are never handed transport errors.
    pub fn send(&self, code: u16, args: Vec<i32>) {
        self.send_command(Command::new(code, args));
    }

    /// Enqueues an already-built command for transmission.
    pub fn send_command(&self, cmd: Command) {
        if self.shared.role == Role::Client && !self.is_open() {
            debug!(code = cmd.code, "link is down, dropping outbound command");
            return;
        }
        self.shared.outbound.push(cmd);
    }

    /// Waits for the next inbound command.
    ///
    /// Returns [`Received::Closed`] once [`close`](Connection::close)
    /// or [`stop_reading`](Connection::stop_reading) has run.
    pub async fn recv_one(&self) -> Received {
        self.shared.inbound.recv().await
    }

    /// Pops up to `max` inbound commands without waiting for more.
    pub fn recv_many(&self, max: usize) -> Vec<Command> {
        self.shared.inbound.drain(max)
    }

    /// True while a peer is attached and frames flow.
    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn state(&self) -> LinkState {
        self.shared.link_state()
    }

    /// The bound listen address (server role). Useful when binding to
    /// port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    /// Wakes every blocked reader with [`Received::Closed`] without
    /// tearing down the link.
    pub fn stop_reading(&self) {
        self.shared.inbound.shutdown();
    }

    /// Tears the connection down: cancels I/O, wakes all blocked
    /// readers, joins every worker and clears both queues.
    pub async fn close(&self) {
        debug!("closing connection");
        self.shared.shutdown.cancel();
        self.shared.inbound.shutdown();
        self.shared.outbound.shutdown();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.inbound.clear();
        self.shared.outbound.clear();
        self.shared.set_state(LinkState::Stopped);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.shared.role)
            .field("state", &self.shared.link_state())
            .finish()
    }
}

/// Binds a listener and returns the server endpoint.
///
/// The acceptor keeps accepting peers until the connection is closed;
/// the most recently accepted peer owns the connection's queues.
pub async fn open_server(
    address: &str,
    port: u16,
    config: LinkConfig,
) -> Result<Connection, LinkError> {
    let addr = SocketAddr::new(address.parse()?, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| LinkError::Bind { addr, source })?;
    let local_addr = listener.local_addr().ok();
    info!(addr = %local_addr.unwrap_or(addr), "server listening");

    let shared = Arc::new(Shared::new(config, Role::Server, None, local_addr));
    shared.tracker.spawn(server::run(shared.clone(), listener));
    Ok(Connection { shared })
}

/// Returns a client endpoint that connects (and reconnects) to the
/// given address in the background.
///
/// Must be called from within a tokio runtime.
pub fn open_client(
    address: &str,
    port: u16,
    config: LinkConfig,
) -> Result<Connection, LinkError> {
    let addr = SocketAddr::new(address.parse()?, port);
    let shared = Arc::new(Shared::new(config, Role::Client, Some(addr), None));
    shared.tracker.spawn(client::run(shared.clone()));
    Ok(Connection { shared })
}
