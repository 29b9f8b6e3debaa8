//! In-process metrics registry.
//!
//! Counters, gauges, and histogram summaries addressed by string name, plus
//! the two purpose-built observers the pipeline uses for request and origin
//! latency. The whole registry dumps to JSON for the metrics endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Running summary of one histogram series; observations are folded in
/// rather than buffered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }
}

#[derive(Default)]
struct Registry {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    histograms: HashMap<String, HistogramSummary>,
}

/// Shared metrics handle. Cheap to clone.
#[derive(Clone, Default)]
pub struct Metrics {
    registry: Arc<RwLock<Registry>>,
}

/// Snapshot of every series, as served by the metrics endpoint.
#[derive(Debug, Serialize)]
pub struct MetricsDump {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: &str) {
        self.inc_counter_by(name, 1);
    }

    pub fn inc_counter_by(&self, name: &str, value: u64) {
        let mut registry = self.registry.write();
        *registry.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.registry
            .write()
            .gauges
            .insert(name.to_string(), value);
    }

    pub fn inc_gauge(&self, name: &str) {
        let mut registry = self.registry.write();
        *registry.gauges.entry(name.to_string()).or_insert(0.0) += 1.0;
    }

    pub fn dec_gauge(&self, name: &str) {
        let mut registry = self.registry.write();
        *registry.gauges.entry(name.to_string()).or_insert(0.0) -= 1.0;
    }

    pub fn observe_histogram(&self, name: &str, value: f64) {
        let mut registry = self.registry.write();
        registry
            .histograms
            .entry(name.to_string())
            .or_default()
            .observe(value);
    }

    /// Latency of one proxied request, in milliseconds, keyed by path.
    pub fn observe_request_duration(&self, path: &str, duration: Duration) {
        self.observe_histogram(
            &format!("request_duration_{path}"),
            duration.as_secs_f64() * 1000.0,
        );
    }

    /// Latency of one origin fetch, in milliseconds, keyed by host.
    pub fn observe_origin_duration(&self, host: &str, duration: Duration) {
        self.observe_histogram(
            &format!("origin_duration_{host}"),
            duration.as_secs_f64() * 1000.0,
        );
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.registry
            .read()
            .counters
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn dump(&self) -> MetricsDump {
        let registry = self.registry.read();
        MetricsDump {
            counters: registry.counters.clone(),
            gauges: registry.gauges.clone(),
            histograms: registry.histograms.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.inc_counter("cache.hit");
        metrics.inc_counter("cache.hit");
        metrics.inc_counter_by("cache.miss", 3);

        assert_eq!(metrics.counter("cache.hit"), 2);
        assert_eq!(metrics.counter("cache.miss"), 3);
        assert_eq!(metrics.counter("unknown"), 0);
    }

    #[test]
    fn gauges_move_both_ways() {
        let metrics = Metrics::new();
        metrics.set_gauge("players.active", 10.0);
        metrics.inc_gauge("players.active");
        metrics.dec_gauge("players.active");
        metrics.dec_gauge("players.active");

        assert_eq!(metrics.dump().gauges["players.active"], 9.0);
    }

    #[test]
    fn histogram_summary_tracks_bounds() {
        let metrics = Metrics::new();
        metrics.observe_histogram("latency", 5.0);
        metrics.observe_histogram("latency", 1.0);
        metrics.observe_histogram("latency", 9.0);

        let dump = metrics.dump();
        let summary = &dump.histograms["latency"];
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 15.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 9.0);
    }

    #[test]
    fn duration_observers_record_milliseconds() {
        let metrics = Metrics::new();
        metrics.observe_request_duration("/live/master.m3u8", Duration::from_millis(25));
        metrics.observe_origin_duration("origin.example.com", Duration::from_millis(40));

        let dump = metrics.dump();
        assert_eq!(
            dump.histograms["request_duration_/live/master.m3u8"].count,
            1
        );
        assert!(
            (dump.histograms["origin_duration_origin.example.com"].sum - 40.0).abs() < 1.0
        );
    }

    #[test]
    fn shared_handle_sees_same_registry() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.inc_counter("requests");
        assert_eq!(metrics.counter("requests"), 1);
    }
}
