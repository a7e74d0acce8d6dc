use std::{sync::Arc, thread::JoinHandle, time::Duration};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    buffer::Aggregator,
    tags::Tag,
    telemetry::LossCounters,
    writer::{LineWriter, MetricType, MetricValue},
};

/// Errors that could occur while closing a client.
#[derive(Debug, Error)]
pub enum CloseError {
    /// A background thread panicked before it could be joined.
    #[error("background thread '{name}' panicked")]
    WorkerPanicked {
        /// Name of the thread that panicked.
        name: String,
    },
}

/// Handles to the background threads of a client.
pub(crate) struct Background {
    pub shutdown: Sender<()>,
    pub flusher: JoinHandle<()>,
    pub workers: Vec<JoinHandle<()>>,
    pub reporter: Option<JoinHandle<()>>,
}

impl Background {
    /// Signals shutdown and waits for every background thread to exit.
    ///
    /// The flusher performs the final flush and closes the dispatch queue, so it is joined before the send workers.
    fn stop(self) -> Result<(), CloseError> {
        drop(self.shutdown);

        let mut result = Ok(());
        let handles = std::iter::once(self.flusher).chain(self.workers).chain(self.reporter);
        for handle in handles {
            let name = handle.thread().name().unwrap_or("statsd-client").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Background thread panicked.");
                result = Err(CloseError::WorkerPanicked { name });
            }
        }

        debug!("Client closed.");
        result
    }
}

pub(crate) struct ClientInner {
    aggregator: Arc<Mutex<Aggregator>>,
    writer: LineWriter,
    losses: Arc<LossCounters>,
    background: Mutex<Option<Background>>,
}

impl ClientInner {
    pub fn new(
        aggregator: Arc<Mutex<Aggregator>>,
        writer: LineWriter,
        losses: Arc<LossCounters>,
        background: Background,
    ) -> Self {
        Self { aggregator, writer, losses, background: Mutex::new(Some(background)) }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(background) = self.background.get_mut().take() {
            // Errors are already logged by `stop`.
            let _ = background.stop();
        }
    }
}

/// A StatsD client.
///
/// Metrics are formatted into a shared in-memory packet as they are emitted, and packets are handed off to background
/// send workers either when they fill up or when the flush interval elapses. Emitting a metric never performs network
/// I/O and never blocks on the network: if the send workers cannot keep up, whole packets are dropped and counted (see
/// [`lost_packets`][Self::lost_packets]).
///
/// Cloning a client is cheap. Every clone shares the same buffer, send workers and background threads, even when it
/// carries a different prefix. The background threads are stopped when [`close`][Self::close] is called, or
/// when the last clone is dropped.
#[derive(Clone)]
pub struct StatsdClient {
    prefix: Arc<str>,
    inner: Arc<ClientInner>,
}

impl StatsdClient {
    pub(crate) fn new(prefix: &str, inner: ClientInner) -> Self {
        Self { prefix: Arc::from(prefix), inner: Arc::new(inner) }
    }

    /// Returns a client sharing this client's state, with its metric prefix replaced by `prefix`.
    #[must_use]
    pub fn clone_with_prefix(&self, prefix: &str) -> Self {
        Self { prefix: Arc::from(prefix), inner: Arc::clone(&self.inner) }
    }

    /// Returns a client sharing this client's state, with `extension` appended to its metric prefix.
    #[must_use]
    pub fn clone_with_prefix_extension(&self, extension: &str) -> Self {
        let prefix = format!("{}{}", self.prefix, extension);
        Self { prefix: Arc::from(prefix), inner: Arc::clone(&self.inner) }
    }

    /// Returns the metric prefix of this client.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the number of packets lost over the lifetime of the client.
    ///
    /// Packets are lost when the dispatch queue is full at the time a packet is handed off. Packets that failed to be
    /// written to the socket are not included.
    pub fn lost_packets(&self) -> u64 {
        self.inner.losses.overall()
    }

    /// Hands the current packet, if any, off to the send workers.
    pub fn flush(&self) {
        self.inner.aggregator.lock().flush();
    }

    /// Closes the client.
    ///
    /// Performs a final flush, then waits for the send workers to drain the dispatch queue and for every background
    /// thread to exit. Metrics emitted afterwards, from this handle or any clone, are discarded. Calling `close` again
    /// has no effect.
    ///
    /// # Errors
    ///
    /// If any background thread panicked, an error is returned naming it. The remaining threads are still joined.
    pub fn close(&self) -> Result<(), CloseError> {
        let background = self.inner.background.lock().take();
        match background {
            Some(background) => background.stop(),
            None => Ok(()),
        }
    }

    fn emit(&self, name: &str, metric_type: MetricType, tags: &[Tag], values: &[MetricValue<'_>]) {
        let mut aggregator = self.inner.aggregator.lock();
        if aggregator.is_closed() {
            return;
        }

        for value in values {
            aggregator.append(|buf| {
                self.inner.writer.write_line(buf, &self.prefix, name, *value, metric_type, tags);
            });
        }
    }

    /// Increments a counter.
    ///
    /// Nothing is sent when `count` is zero.
    pub fn incr(&self, name: &str, count: i64, tags: &[Tag]) {
        if count != 0 {
            self.emit(name, MetricType::Counter, tags, &[MetricValue::Integer(count)]);
        }
    }

    /// Decrements a counter.
    ///
    /// Nothing is sent when `count` is zero.
    pub fn decr(&self, name: &str, count: i64, tags: &[Tag]) {
        self.incr(name, count.saturating_neg(), tags);
    }

    /// Increments a counter by a floating-point amount.
    ///
    /// Nothing is sent when `count` is zero.
    pub fn fincr(&self, name: &str, count: f64, tags: &[Tag]) {
        if count != 0.0 {
            self.emit(name, MetricType::Counter, tags, &[MetricValue::FloatingPoint(count)]);
        }
    }

    /// Decrements a counter by a floating-point amount.
    ///
    /// Nothing is sent when `count` is zero.
    pub fn fdecr(&self, name: &str, count: f64, tags: &[Tag]) {
        self.fincr(name, -count, tags);
    }

    /// Records a timing, in milliseconds.
    pub fn timing(&self, name: &str, delta_ms: i64, tags: &[Tag]) {
        self.emit(name, MetricType::Timing, tags, &[MetricValue::Integer(delta_ms)]);
    }

    /// Records a timing from a [`Duration`].
    ///
    /// The value is sent in milliseconds, with as many fractional digits as needed: `157.356` for 157,356µs, `150`
    /// for 150ms.
    pub fn precision_timing(&self, name: &str, delta: Duration, tags: &[Tag]) {
        let delta_ms = delta.as_nanos() as f64 / 1_000_000.0;
        self.ftiming(name, delta_ms, tags);
    }

    pub(crate) fn ftiming(&self, name: &str, delta_ms: f64, tags: &[Tag]) {
        self.emit(name, MetricType::Timing, tags, &[MetricValue::FloatingPoint(delta_ms)]);
    }

    /// Sets a gauge to an absolute value.
    ///
    /// The wire format reads a leading `-` as a relative change, so a negative value is sent as a reset to zero
    /// followed by the value itself.
    pub fn gauge(&self, name: &str, value: i64, tags: &[Tag]) {
        if value < 0 {
            self.emit(name, MetricType::Gauge, tags, &[MetricValue::Integer(0), MetricValue::Integer(value)]);
        } else {
            self.emit(name, MetricType::Gauge, tags, &[MetricValue::Integer(value)]);
        }
    }

    /// Changes a gauge by a relative amount.
    pub fn gauge_delta(&self, name: &str, delta: i64, tags: &[Tag]) {
        self.emit(name, MetricType::Gauge, tags, &[MetricValue::IntegerDelta(delta)]);
    }

    /// Sets a gauge to an absolute floating-point value.
    ///
    /// As with [`gauge`][Self::gauge], a negative value is preceded by a reset to zero.
    pub fn fgauge(&self, name: &str, value: f64, tags: &[Tag]) {
        if value < 0.0 {
            self.emit(name, MetricType::Gauge, tags, &[MetricValue::Integer(0), MetricValue::FloatingPoint(value)]);
        } else {
            self.emit(name, MetricType::Gauge, tags, &[MetricValue::FloatingPoint(value)]);
        }
    }

    /// Changes a gauge by a relative floating-point amount.
    pub fn fgauge_delta(&self, name: &str, delta: f64, tags: &[Tag]) {
        self.emit(name, MetricType::Gauge, tags, &[MetricValue::FloatingPointDelta(delta)]);
    }

    /// Adds a unique element to a set.
    pub fn set_add(&self, name: &str, value: &str, tags: &[Tag]) {
        self.emit(name, MetricType::Set, tags, &[MetricValue::Token(value)]);
    }
}
