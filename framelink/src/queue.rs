//! Command queues between application code and the connection manager.
//!
//! Each connection owns two of these: producers push outbound commands
//! and the writer task drains them; the read loop pushes inbound
//! commands and consumers drain those. A queue is a plain FIFO behind a
//! mutex with a [`Notify`] wake signal, so any number of producers can
//! feed one blocking consumer.
//!
//! Shutdown is a sum type, not a magic command value: once
//! [`CommandQueue::shutdown`] runs, every blocked and future
//! [`CommandQueue::recv`] returns [`Received::Closed`] immediately,
//! even if items remain queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::protocol::Command;

/// Result of a blocking queue read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The next command in FIFO order.
    Command(Command),

    /// The connection is shutting down; no further commands will be
    /// delivered.
    Closed,
}

/// Thread-safe FIFO of commands with an async blocking pop.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: Mutex<VecDeque<Command>>,
    available: Notify,
    closed: AtomicBool,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command and wakes one waiting consumer.
    pub fn push(&self, cmd: Command) {
        self.items.lock().push_back(cmd);
        self.available.notify_one();
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Command> {
        self.items.lock().pop_front()
    }

    /// Waits until a command is available or the queue is shut down.
    ///
    /// The shutdown flag wins over queued items, so a consumer blocked
    /// across a shutdown observes it promptly.
    pub async fn recv(&self) -> Received {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Received::Closed;
            }
            if let Some(cmd) = self.try_pop() {
                return Received::Command(cmd);
            }
            self.available.notified().await;
        }
    }

    /// Pops up to `max` commands without blocking for more.
    pub fn drain(&self, max: usize) -> Vec<Command> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Marks the queue closed and wakes every waiter.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
        // A consumer between its closed-check and its wait still gets
        // woken by the stored permit.
        self.available.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
