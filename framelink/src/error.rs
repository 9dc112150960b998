//! Connection construction errors.
//!
//! Only the open functions return errors. Once a connection exists,
//! framing and transport failures are recovered internally (resync or
//! reconnect) and reported through the logging sink.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
}
