use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, Counter};

/// Counters tracking packets dropped before they ever reached the network.
///
/// A packet is lost when the dispatch queue is full (or already closed) at the time the aggregation buffer tries to hand
/// it off. Failed socket writes are not counted here.
#[derive(Debug, Default)]
pub(crate) struct LossCounters {
    period: AtomicU64,
    overall: AtomicU64,
}

impl LossCounters {
    /// Records a single lost packet.
    pub fn record_lost_packet(&self) {
        self.period.fetch_add(1, Ordering::Relaxed);
        self.overall.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of packets lost since the last call, resetting the period counter to zero.
    pub fn take_period(&self) -> u64 {
        self.period.swap(0, Ordering::AcqRel)
    }

    /// Returns the number of packets lost over the lifetime of the client.
    pub fn overall(&self) -> u64 {
        self.overall.load(Ordering::Relaxed)
    }
}

/// Client telemetry.
///
/// When enabled, the report loop mirrors the loss counters into the `metrics` facade, so that whichever recorder is
/// installed globally also sees how much data the client is shedding.
pub(crate) struct Telemetry {
    packets_lost: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new() -> Self {
        Self { packets_lost: counter!("statsd.client.packets_lost", "client_transport" => "udp") }
    }

    /// Applies a loss report for the elapsed period.
    pub fn apply_report(&self, lost: u64) {
        self.packets_lost.increment(lost);
    }
}
