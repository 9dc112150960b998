//! Server role: accept peers and hand each one a session.
//!
//! There is no reconnect at this level; the acceptor simply keeps
//! listening. The connection's queues always belong to the most
//! recently accepted peer, so a returning client supersedes a stale
//! session it left behind.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::net::TcpListener;

use crate::tracing::prelude::*;

use super::session;
use super::{LinkState, Shared};

pub(crate) async fn run(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!(peer = %peer, "peer connected");
                let id = shared.next_peer_id.fetch_add(1, Ordering::Relaxed);
                let session_token = shared.shutdown.child_token();
                let previous = shared
                    .active_peer
                    .lock()
                    .replace((id, session_token.clone()));
                if let Some((_, stale)) = previous {
                    stale.cancel();
                }
                shared.set_state(LinkState::Connected);

                let task_shared = shared.clone();
                shared.tracker.spawn(async move {
                    let end = session::run(&task_shared, stream, session_token).await;
                    debug!(?end, "peer session ended");
                    let mut active = task_shared.active_peer.lock();
                    let still_active =
                        active.as_ref().is_some_and(|(active_id, _)| *active_id == id);
                    if still_active {
                        *active = None;
                        drop(active);
                        if !task_shared.shutdown.is_cancelled() {
                            task_shared.set_state(LinkState::Idle);
                        }
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    shared.set_state(LinkState::Stopped);
}
