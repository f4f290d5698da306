//! Outbound transfer queues
//!
//! Commands and data frames wait in two independent FIFOs until the card
//! signals it can take the next one. Each queue has its own lock; the worker
//! takes packets out by value so nothing is shared once a transfer starts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_utils::atomic::AtomicCell;

use crate::error::{Error, Result};
use crate::signal::WakeSignal;

/// Which port and queue a buffer travels through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Firmware command (command port)
    Command,
    /// Network data frame (data port)
    Data,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Command => write!(f, "command"),
            Direction::Data => write!(f, "data"),
        }
    }
}

/// Round `len` up to a multiple of 4
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// A buffer waiting to be written to the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    direction: Direction,
    buffer: Vec<u8>,
}

impl QueuedPacket {
    /// Copy `payload` into a zero-padded buffer of `align4(len)` bytes
    pub fn new(direction: Direction, payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            log::error!("queue: invalid size requested: 0");
            return Err(Error::InvalidArgument("zero-length transfer"));
        }
        let blen = align4(payload.len());
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(blen)
            .map_err(|_| Error::OutOfMemory)?;
        buffer.extend_from_slice(payload);
        buffer.resize(blen, 0);
        Ok(Self { direction, buffer })
    }

    /// Queue this packet belongs to
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Padded buffer as written to the port
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Padded length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Always false; packets are never empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// The command and data FIFOs
#[derive(Debug, Default)]
pub struct TransferQueues {
    cmd: Mutex<VecDeque<QueuedPacket>>,
    data: Mutex<VecDeque<QueuedPacket>>,
    closed: AtomicCell<bool>,
}

impl TransferQueues {
    /// Create two empty queues
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, direction: Direction) -> MutexGuard<'_, VecDeque<QueuedPacket>> {
        let queue = match direction {
            Direction::Command => &self.cmd,
            Direction::Data => &self.data,
        };
        // A panicking holder cannot leave a VecDeque half-updated
        queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a packet to the tail of its queue
    ///
    /// Fails with `Detached` once the queues are closed.
    pub fn enqueue(&self, packet: QueuedPacket) -> Result<()> {
        let mut queue = self.queue(packet.direction);
        // Checked under the queue lock, which drain also takes
        if self.closed.load() {
            return Err(Error::Detached);
        }
        queue.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        queue.push_back(packet);
        Ok(())
    }

    /// Remove the head of a queue
    pub fn dequeue_head(&self, direction: Direction) -> Option<QueuedPacket> {
        self.queue(direction).pop_front()
    }

    /// Number of packets waiting in a queue
    pub fn len(&self, direction: Direction) -> usize {
        self.queue(direction).len()
    }

    /// True when both queues are empty
    pub fn is_empty(&self) -> bool {
        self.len(Direction::Command) == 0 && self.len(Direction::Data) == 0
    }

    /// Refuse further packets; anything already queued stays until drained
    pub fn close(&self) {
        self.closed.store(true);
    }

    /// True after [`close`](Self::close)
    pub fn is_closed(&self) -> bool {
        self.closed.load()
    }

    /// Discard everything still queued, returning how many packets were dropped
    pub fn drain(&self) -> usize {
        let cmd = std::mem::take(&mut *self.queue(Direction::Command)).len();
        let data = std::mem::take(&mut *self.queue(Direction::Data)).len();
        cmd + data
    }
}

/// Handle given to the upper layer for sending buffers to the card
#[derive(Debug, Clone)]
pub struct Submitter {
    queues: Arc<TransferQueues>,
    wake: WakeSignal,
}

impl Submitter {
    pub(crate) fn new(queues: Arc<TransferQueues>, wake: WakeSignal) -> Self {
        Self { queues, wake }
    }

    /// Queue `bytes` for transmission and wake the worker
    ///
    /// Never blocks on the bus. Fails with `InvalidArgument` for an empty
    /// buffer, `OutOfMemory` when the packet cannot be allocated and
    /// `Detached` once the card has been detached.
    pub fn submit(&self, direction: Direction, bytes: &[u8]) -> Result<()> {
        log::trace!("queue: submit {} ({} bytes)", direction, bytes.len());
        let packet = QueuedPacket::new(direction, bytes)?;
        if let Err(e) = self.queues.enqueue(packet) {
            if matches!(e, Error::Detached) {
                log::debug!("queue: {} submitted after detach, dropped", direction);
            }
            return Err(e);
        }
        self.wake.post();
        Ok(())
    }

    /// Number of buffers waiting in a queue
    pub fn pending(&self, direction: Direction) -> usize {
        self.queues.len(direction)
    }
}
