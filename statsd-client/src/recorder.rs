use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use metrics_util::registry::{Registry, Storage};

use crate::{client::StatsdClient, tags::Tag};

/// A recorder that forwards metrics to a StatsD server.
///
/// Nothing is aggregated: every counter increment, gauge update and histogram sample becomes one line on the wire.
/// Counters map to StatsD counters, except for absolute updates, which are sent as gauges. Histograms are sent as
/// timings, in whatever unit the samples were recorded in. Metric labels become tags.
///
/// Handles are cached per key, so registering the same metric again is a lookup rather than an allocation.
pub struct StatsdRecorder {
    client: StatsdClient,
    registry: Registry<Key, HandleStorage>,
}

impl StatsdRecorder {
    /// Creates a new `StatsdRecorder` that emits metrics through `client`.
    pub fn new(client: StatsdClient) -> Self {
        let registry = Registry::new(HandleStorage { client: client.clone() });
        StatsdRecorder { client, registry }
    }

    /// Returns the client this recorder emits metrics through.
    pub fn client(&self) -> &StatsdClient {
        &self.client
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |existing| Counter::from_arc(Arc::clone(existing)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |existing| Gauge::from_arc(Arc::clone(existing)))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |existing| Histogram::from_arc(Arc::clone(existing)))
    }
}

/// Creates the handle for a key the first time it is registered.
struct HandleStorage {
    client: StatsdClient,
}

impl HandleStorage {
    fn handle(&self, key: &Key) -> Arc<MetricHandle> {
        Arc::new(MetricHandle {
            client: self.client.clone(),
            name: key.name().to_string(),
            tags: key.labels().map(Tag::from).collect(),
        })
    }
}

impl Storage<Key> for HandleStorage {
    type Counter = Arc<MetricHandle>;
    type Gauge = Arc<MetricHandle>;
    type Histogram = Arc<MetricHandle>;

    fn counter(&self, key: &Key) -> Self::Counter {
        self.handle(key)
    }

    fn gauge(&self, key: &Key) -> Self::Gauge {
        self.handle(key)
    }

    fn histogram(&self, key: &Key) -> Self::Histogram {
        self.handle(key)
    }
}

struct MetricHandle {
    client: StatsdClient,
    name: String,
    tags: Vec<Tag>,
}

impl CounterFn for MetricHandle {
    fn increment(&self, value: u64) {
        self.client.incr(&self.name, i64::try_from(value).unwrap_or(i64::MAX), &self.tags);
    }

    fn absolute(&self, value: u64) {
        self.client.gauge(&self.name, i64::try_from(value).unwrap_or(i64::MAX), &self.tags);
    }
}

impl GaugeFn for MetricHandle {
    fn increment(&self, value: f64) {
        self.client.fgauge_delta(&self.name, value, &self.tags);
    }

    fn decrement(&self, value: f64) {
        self.client.fgauge_delta(&self.name, -value, &self.tags);
    }

    fn set(&self, value: f64) {
        self.client.fgauge(&self.name, value, &self.tags);
    }
}

impl HistogramFn for MetricHandle {
    fn record(&self, value: f64) {
        self.client.ftiming(&self.name, value, &self.tags);
    }
}
