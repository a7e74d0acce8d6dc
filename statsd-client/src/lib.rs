//! A buffered, non-blocking client for sending metrics to a [StatsD][statsd] server over UDP.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! ```no_run
//! # use statsd_client::{StatsdBuilder, Tag};
//! // First, create a builder.
//! //
//! // The builder can configure many aspects of the client, such as the remote address, the metric prefix, how often
//! // packets are flushed, how tags are encoded, and more.
//! let client = StatsdBuilder::default()
//!     .with_remote_address("127.0.0.1:8125")
//!     .expect("invalid remote address")
//!     .with_prefix("myapp.")
//!     .build()
//!     .expect("failed to build client");
//!
//! // Metrics are emitted directly through the client. Emitting never blocks on the network.
//! client.incr("requests", 1, &[Tag::string("method", "get")]);
//! client.gauge("connections", 42, &[]);
//!
//! // Clones share the same buffer and background threads, and can carry a different prefix.
//! let db = client.clone_with_prefix_extension("db.");
//! db.precision_timing("query", std::time::Duration::from_micros(1250), &[]);
//!
//! // Closing the client flushes whatever is buffered and waits for it to be sent.
//! client.close().expect("background thread panicked");
//! ```
//!
//! The client can also be used as a [`metrics`] recorder, either by calling [`StatsdBuilder::install`] to install it
//! globally, or by calling [`StatsdBuilder::build_recorder`] to get a [`StatsdRecorder`] for use elsewhere.
//!
//! # Features
//!
//! ## Buffering
//!
//! Metric lines are written into a shared in-memory packet as they are emitted. Packets are sent when they reach the
//! maximum packet size, when the flush interval elapses, or when [`StatsdClient::flush`] is called. Lines are never
//! split across packets.
//!
//! ## Non-blocking emission
//!
//! Packets are handed off to a bounded queue drained by one or more send workers, each running on its own thread with
//! its own socket. When the workers cannot keep up and the queue is full, packets are dropped rather than blocking the
//! caller. Dropped packets are counted, reported as a warning on a configurable interval, and available through
//! [`StatsdClient::lost_packets`].
//!
//! ## Reconnecting
//!
//! Send workers reconnect after a failed write, retry failed connections after a configurable timeout, and can
//! optionally reconnect on a fixed interval. The remote address is resolved again on every connection attempt, so DNS
//! changes are picked up.
//!
//! ## Tags
//!
//! Tags are supported in the InfluxDB, Graphite, DogStatsD and Okmeter dialects. See [`TagFormat`].
//!
//! # Logging
//!
//! The client logs connection failures, write failures and lost packets through [`tracing`]. Nothing is ever returned
//! to, or logged on behalf of, the caller emitting metrics.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::doc_markdown)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod buffer;

mod builder;
pub use self::builder::{BuildError, StatsdBuilder};

mod client;
pub use self::client::{CloseError, StatsdClient};

mod forwarder;

mod recorder;
pub use self::recorder::StatsdRecorder;

mod tags;
pub use self::tags::{Tag, TagFormat, TagValue};

mod telemetry;
mod timers;
mod writer;
