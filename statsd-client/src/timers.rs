use std::{sync::Arc, time::Duration};

use crossbeam_channel::{never, select, tick, Receiver};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    buffer::Aggregator,
    telemetry::{LossCounters, Telemetry},
};

/// Periodically flushes the aggregation buffer.
///
/// When shutdown is signalled, performs a final flush and closes the dispatch queue, which in turn lets the send
/// workers drain and exit. The periodic flush is disabled when `interval` is zero, but the shutdown flush still happens.
pub(crate) fn run_flush_loop(aggregator: Arc<Mutex<Aggregator>>, interval: Duration, shutdown: Receiver<()>) {
    let ticker = if interval.is_zero() { never() } else { tick(interval) };

    loop {
        select! {
            recv(shutdown) -> _ => {
                aggregator.lock().close();
                debug!("Flushed final packet and closed dispatch queue.");
                return;
            },
            recv(ticker) -> _ => aggregator.lock().flush(),
        }
    }
}

/// Periodically reports packets lost to dispatch queue overflow.
pub(crate) fn run_report_loop(
    losses: Arc<LossCounters>,
    interval: Duration,
    shutdown: Receiver<()>,
    telemetry_enabled: bool,
) {
    let ticker = tick(interval);

    // Registered on first use, so that it binds to the global recorder installed after the client was built.
    let mut telemetry: Option<Telemetry> = None;

    loop {
        select! {
            recv(shutdown) -> _ => return,
            recv(ticker) -> _ => {
                let lost = losses.take_period();
                if lost > 0 {
                    warn!(lost, "Packets lost to dispatch queue overflow.");

                    if telemetry_enabled {
                        telemetry.get_or_insert_with(Telemetry::new).apply_report(lost);
                    }
                }
            },
        }
    }
}
