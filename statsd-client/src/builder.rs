use std::{sync::Arc, thread, time::Duration};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    buffer::{Aggregator, PacketPool, OVERFLOW_HEADROOM},
    client::{Background, ClientInner, StatsdClient},
    forwarder::{Forwarder, ForwarderConfiguration},
    recorder::StatsdRecorder,
    tags::{Tag, TagFormat},
    telemetry::LossCounters,
    timers::{run_flush_loop, run_report_loop},
    writer::LineWriter,
};

const DEFAULT_REMOTE_ADDR: &str = "127.0.0.1:8125";
const DEFAULT_MAX_PACKET_SIZE: usize = 1432;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_BUFFER_POOL_CAPACITY: usize = 20;
const DEFAULT_SEND_QUEUE_CAPACITY: usize = 10;
const DEFAULT_SEND_WORKERS: usize = 1;

/// Errors that could occur while building or installing a StatsD client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid value.
        reason: String,
    },

    /// Failed to spawn a background thread.
    #[error("failed to spawn background thread for client")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install client as global recorder")]
    FailedToInstall,
}

/// Builder for a StatsD client.
pub struct StatsdBuilder {
    remote_addr: String,
    prefix: String,
    max_packet_size: usize,
    flush_interval: Duration,
    reconnect_interval: Duration,
    report_interval: Duration,
    retry_timeout: Duration,
    write_timeout: Duration,
    buffer_pool_capacity: usize,
    send_queue_capacity: usize,
    send_workers: usize,
    default_tags: Vec<Tag>,
    tag_format: TagFormat,
    telemetry: bool,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// The address must be in the format of `<host>:<port>`. It is only validated syntactically here: name resolution
    /// happens in the send workers, every time they connect, so that address changes are picked up on reconnect.
    ///
    /// Defaults to `127.0.0.1:8125`.
    ///
    /// # Errors
    ///
    /// If the given address is not in the format of `<host>:<port>`, an error will be returned indicating the reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let addr = addr.as_ref();
        validate_remote_address(addr).map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        self.remote_addr = addr.to_string();
        Ok(self)
    }

    /// Set the prefix prepended to every metric name.
    ///
    /// The prefix is used as-is, so it should usually end in a `.`.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = prefix.into();
        self
    }

    /// Set the maximum packet size.
    ///
    /// Metric lines are accumulated into a packet until the next line would take it past this size, at which point
    /// the packet is sent. A single line larger than this is still sent, in a packet of its own.
    ///
    /// The default is sized to fit a single Ethernet frame once IP and UDP headers are accounted for. Larger values
    /// should only be used on networks known to support jumbo frames.
    ///
    /// Defaults to 1432 bytes.
    #[must_use]
    pub fn with_maximum_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set the flush interval.
    ///
    /// This controls how long metrics can sit in a partially filled packet before being sent anyway. A zero interval
    /// disables periodic flushing, leaving only full packets, explicit calls to `flush`, and closing the client to
    /// send metrics.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the reconnect interval.
    ///
    /// When non-zero, send workers drop their socket and reconnect on this interval even without errors, which
    /// re-resolves the remote address.
    ///
    /// Defaults to zero, which disables periodic reconnects.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the report interval.
    ///
    /// Packets lost to a full send queue are logged as a warning on this interval. A zero interval disables reporting;
    /// [`StatsdClient::lost_packets`] keeps counting either way.
    ///
    /// Defaults to 1 minute.
    #[must_use]
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set the retry timeout.
    ///
    /// This is how long a send worker waits after failing to connect before trying again.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Set the write timeout for sending packets.
    ///
    /// When the write timeout is reached, the write is aborted, the packet being sent at the time is dropped without
    /// retrying, and the send worker reconnects. A zero timeout lets writes block indefinitely.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the buffer pool capacity.
    ///
    /// This is the number of idle packet buffers kept around for reuse. It does not limit how many buffers can be in
    /// use at once.
    ///
    /// Defaults to 20.
    #[must_use]
    pub fn with_buffer_pool_capacity(mut self, capacity: usize) -> Self {
        self.buffer_pool_capacity = capacity;
        self
    }

    /// Set the send queue capacity.
    ///
    /// This is the number of packets that can be waiting for a send worker. When the queue is full, new packets are
    /// dropped and counted as lost rather than blocking the caller.
    ///
    /// Defaults to 10.
    #[must_use]
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Set the number of send workers.
    ///
    /// Each worker runs on its own thread with its own socket. Packets are not guaranteed to arrive in order when
    /// more than one worker is used.
    ///
    /// Defaults to 1.
    #[must_use]
    pub fn with_send_workers(mut self, workers: usize) -> Self {
        self.send_workers = workers;
        self
    }

    /// Set the default tags.
    ///
    /// Default tags are written on every metric, ahead of any tags given at the call site.
    ///
    /// Defaults to no tags.
    #[must_use]
    pub fn with_default_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.default_tags = tags.into_iter().collect();
        self
    }

    /// Set the tag format.
    ///
    /// See [`TagFormat`] for the supported formats.
    ///
    /// Defaults to [`TagFormat::InfluxDb`].
    #[must_use]
    pub fn with_tag_format(mut self, tag_format: TagFormat) -> Self {
        self.tag_format = tag_format;
        self
    }

    /// Set whether or not to enable telemetry for the client.
    ///
    /// When enabled, the number of lost packets is also emitted through the `metrics` facade, as the
    /// `statsd.client.packets_lost` counter, every time it is reported.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the client.
    ///
    /// The send workers and timers are spawned on background threads, and run until the client is closed or the last
    /// handle to it is dropped.
    ///
    /// # Errors
    ///
    /// If any of the capacities, the number of send workers, or the maximum packet size is zero, or if a background
    /// thread could not be spawned, an error will be returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        self.validate()?;

        let pool = Arc::new(PacketPool::new(self.buffer_pool_capacity, self.max_packet_size + OVERFLOW_HEADROOM));
        let losses = Arc::new(LossCounters::default());
        let (queue_tx, queue_rx) = bounded(self.send_queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let aggregator = Arc::new(Mutex::new(Aggregator::new(
            self.max_packet_size,
            queue_tx,
            Arc::clone(&pool),
            Arc::clone(&losses),
        )));

        let forwarder_config = ForwarderConfiguration {
            remote_addr: self.remote_addr,
            reconnect_interval: self.reconnect_interval,
            retry_timeout: self.retry_timeout,
            write_timeout: self.write_timeout,
        };

        let workers = (0..self.send_workers)
            .map(|id| {
                let forwarder = Forwarder::new(
                    id,
                    forwarder_config.clone(),
                    queue_rx.clone(),
                    shutdown_rx.clone(),
                    Arc::clone(&pool),
                );

                thread::Builder::new()
                    .name(format!("statsd-client-forwarder-{id}"))
                    .spawn(move || forwarder.run())
                    .map_err(|_| BuildError::Backend)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let flusher = {
            let aggregator = Arc::clone(&aggregator);
            let shutdown = shutdown_rx.clone();
            let interval = self.flush_interval;

            thread::Builder::new()
                .name("statsd-client-flusher".to_string())
                .spawn(move || run_flush_loop(aggregator, interval, shutdown))
                .map_err(|_| BuildError::Backend)?
        };

        let reporter = if self.report_interval.is_zero() {
            None
        } else {
            let losses = Arc::clone(&losses);
            let interval = self.report_interval;
            let telemetry = self.telemetry;

            let handle = thread::Builder::new()
                .name("statsd-client-reporter".to_string())
                .spawn(move || run_report_loop(losses, interval, shutdown_rx, telemetry))
                .map_err(|_| BuildError::Backend)?;
            Some(handle)
        };

        let background = Background { shutdown: shutdown_tx, flusher, workers, reporter };
        let writer = LineWriter::new(self.tag_format, self.default_tags);
        let inner = ClientInner::new(aggregator, writer, losses, background);

        Ok(StatsdClient::new(&self.prefix, inner))
    }

    /// Builds the client and wraps it in a recorder.
    ///
    /// The recorder must be manually installed by the caller.
    ///
    /// # Errors
    ///
    /// If the client could not be built, an error will be returned. See [`build`][Self::build].
    pub fn build_recorder(self) -> Result<StatsdRecorder, BuildError> {
        self.build().map(StatsdRecorder::new)
    }

    /// Builds the client and installs a recorder over it as the global recorder.
    ///
    /// The returned client shares its state with the installed recorder, and can be used to emit metrics directly or
    /// to flush and close the client on shutdown.
    ///
    /// # Errors
    ///
    /// If the client could not be built, or if a global recorder is already installed, an error will be returned.
    pub fn install(self) -> Result<StatsdClient, BuildError> {
        let client = self.build()?;
        let recorder = StatsdRecorder::new(client.clone());

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)?;
        Ok(client)
    }

    fn validate(&self) -> Result<(), BuildError> {
        let checks = [
            (self.max_packet_size, "maximum packet size"),
            (self.buffer_pool_capacity, "buffer pool capacity"),
            (self.send_queue_capacity, "send queue capacity"),
            (self.send_workers, "number of send workers"),
        ];

        for (value, what) in checks {
            if value == 0 {
                return Err(BuildError::InvalidConfiguration { reason: format!("{what} must be greater than zero") });
            }
        }

        Ok(())
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addr: DEFAULT_REMOTE_ADDR.to_string(),
            prefix: String::new(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            reconnect_interval: Duration::ZERO,
            report_interval: DEFAULT_REPORT_INTERVAL,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            buffer_pool_capacity: DEFAULT_BUFFER_POOL_CAPACITY,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            send_workers: DEFAULT_SEND_WORKERS,
            default_tags: Vec::new(),
            tag_format: TagFormat::default(),
            telemetry: false,
        }
    }
}

fn validate_remote_address(addr: &str) -> Result<(), String> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| format!("missing port in '{addr}'"))?;
    if host.is_empty() {
        return Err(format!("missing host in '{addr}'"));
    }

    port.parse::<u16>().map_err(|e| format!("invalid port '{port}': {e}"))?;
    Ok(())
}
