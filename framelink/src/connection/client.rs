//! Client role: connect with a deadline, run the session, reconnect.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::time;

use crate::tracing::prelude::*;

use super::session::{self, SessionEnd};
use super::{LinkState, Shared};

pub(crate) async fn run(shared: Arc<Shared>) {
    let Some(addr) = shared.target else {
        error!("client started without a target address");
        return;
    };

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }
        shared.set_state(LinkState::Connecting);
        debug!(addr = %addr, "connecting");

        let attempt = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            attempt = time::timeout(shared.config.connect_timeout, TcpStream::connect(addr)) => attempt,
        };

        match attempt {
            Ok(Ok(stream)) => {
                info!(addr = %addr, "connected");
                shared.set_state(LinkState::Connected);
                let session_token = shared.shutdown.child_token();
                let end = session::run(&shared, stream, session_token).await;
                // Items queued against the dead link are stale.
                shared.outbound.clear();
                match end {
                    SessionEnd::Stopped => break,
                    reason => {
                        warn!(?reason, "link lost, reconnecting");
                        shared.set_state(LinkState::Reconnecting);
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "connect failed");
                shared.set_state(LinkState::Reconnecting);
                if !pause(&shared).await {
                    break;
                }
            }
            Err(_elapsed) => {
                warn!(addr = %addr, "connect attempt timed out");
                shared.set_state(LinkState::Reconnecting);
                if !pause(&shared).await {
                    break;
                }
            }
        }
    }
    shared.set_state(LinkState::Stopped);
}

/// Waits out the retry delay. Returns false if shutdown interrupted it.
async fn pause(shared: &Shared) -> bool {
    tokio::select! {
        _ = shared.shutdown.cancelled() => false,
        _ = time::sleep(shared.config.retry_delay) => true,
    }
}
