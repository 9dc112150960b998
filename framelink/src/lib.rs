//! Framed command transport over TCP.
//!
//! Two peers — a listening endpoint and a connecting endpoint —
//! exchange length-delimited command records over long-lived
//! connections. Each record carries a 16-bit command code and a payload
//! of 32-bit signed integers, framed by fixed start/end markers and a
//! CRC. Application code enqueues commands with [`Connection::send`]
//! and drains arrivals with [`Connection::recv_one`]; framing and
//! transport failures are recovered internally (resync, reconnect) and
//! only ever reported through the logging sink.
//!
//! ```no_run
//! use framelink::{LinkConfig, Received, open_client, open_server};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let server = open_server("127.0.0.1", 4510, LinkConfig::default()).await?;
//! let client = open_client(
//!     "127.0.0.1",
//!     4510,
//!     LinkConfig {
//!         use_heartbeat: true,
//!         ..LinkConfig::default()
//!     },
//! )?;
//!
//! client.send(0x00B0, vec![1, 2, -3]);
//! if let Received::Command(cmd) = server.recv_one().await {
//!     server.send_command(cmd); // echo it back
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod tracing;

pub use config::{AckPolicy, LinkConfig};
pub use connection::{Connection, LinkState, open_client, open_server};
pub use error::LinkError;
pub use protocol::Command;
pub use queue::Received;
