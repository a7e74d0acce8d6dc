use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use crossbeam_queue::ArrayQueue;
use tracing::trace;

use crate::telemetry::LossCounters;

/// Extra room reserved in every packet buffer for the line that overflows it.
pub(crate) const OVERFLOW_HEADROOM: usize = 1024;

/// A bounded pool of reusable packet buffers.
///
/// Neither acquiring nor releasing ever blocks: an empty pool results in a fresh allocation, and a full pool simply
/// frees the returned buffer.
pub(crate) struct PacketPool {
    buffers: ArrayQueue<Vec<u8>>,
    buffer_capacity: usize,
}

impl PacketPool {
    /// Creates a new `PacketPool` holding at most `capacity` idle buffers of `buffer_capacity` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, buffer_capacity: usize) -> Self {
        Self { buffers: ArrayQueue::new(capacity), buffer_capacity }
    }

    /// Takes an empty buffer from the pool, or allocates one if the pool is empty.
    pub fn acquire(&self) -> Vec<u8> {
        self.buffers.pop().unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    /// Returns a buffer to the pool.
    ///
    /// Returns `false` if the pool was full and the buffer was dropped instead.
    pub fn release(&self, mut buf: Vec<u8>) -> bool {
        buf.clear();
        self.buffers.push(buf).is_ok()
    }

    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.buffers.len()
    }
}

/// The aggregation buffer.
///
/// Metric lines are appended to the current packet buffer until it grows past the maximum packet size, at which point
/// every line except the one that overflowed is handed off to the dispatch queue. The overflowing line seeds the next
/// packet, so no line is ever split across packets.
///
/// `Aggregator` is not synchronized itself: callers wrap it in a mutex, which makes the lock holder the single writer.
pub(crate) struct Aggregator {
    buf: Vec<u8>,
    max_packet_size: usize,
    queue: Option<Sender<Vec<u8>>>,
    pool: Arc<PacketPool>,
    losses: Arc<LossCounters>,
}

impl Aggregator {
    /// Creates a new `Aggregator` that dispatches packets of at most `max_packet_size` bytes to `queue`.
    pub fn new(
        max_packet_size: usize,
        queue: Sender<Vec<u8>>,
        pool: Arc<PacketPool>,
        losses: Arc<LossCounters>,
    ) -> Self {
        Self { buf: pool.acquire(), max_packet_size, queue: Some(queue), pool, losses }
    }

    /// Returns `true` if the dispatch queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.queue.is_none()
    }

    /// Appends whatever `write` writes to the current packet, dispatching the packet if it overflows.
    ///
    /// `write` must append exactly one complete, newline-terminated line.
    pub fn append<F>(&mut self, write: F)
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let last_len = self.buf.len();
        write(&mut self.buf);

        if self.buf.len() > self.max_packet_size {
            self.flush_at(last_len);
        }
    }

    /// Dispatches the current packet, if it holds any lines.
    pub fn flush(&mut self) {
        if !self.buf.is_empty() {
            self.flush_at(self.buf.len());
        }
    }

    /// Flushes the current packet and closes the dispatch queue.
    ///
    /// Send workers exit once they have drained the queue. Any packet dispatched after this point is counted as lost.
    pub fn close(&mut self) {
        self.flush();
        self.queue = None;
    }

    /// Dispatches the first `len` bytes of the current packet, carrying the remainder over into a fresh buffer.
    fn flush_at(&mut self, len: usize) {
        // A single line larger than the maximum packet size: nothing complete to send yet, so it stays put and goes out
        // on its own with the next flush.
        if len == 0 {
            return;
        }

        let mut next = self.pool.acquire();
        next.extend_from_slice(&self.buf[len..]);

        let mut packet = std::mem::replace(&mut self.buf, next);
        packet.truncate(len);

        self.dispatch(packet);
    }

    fn dispatch(&mut self, packet: Vec<u8>) {
        let result = match &self.queue {
            Some(queue) => queue.try_send(packet),
            None => Err(TrySendError::Disconnected(packet)),
        };

        if let Err(e) = result {
            trace!(queue_full = e.is_full(), "Dropping packet: dispatch queue unavailable.");
            self.losses.record_lost_packet();
            self.pool.release(e.into_inner());
        }
    }
}
