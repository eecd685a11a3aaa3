//! Bounded-ring metrics sink: counters and latency samples per series,
//! with on-demand percentile computation. No external export; read via
//! the admin HTTP surface.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SeriesSnapshot {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub mean: f64,
}

struct Series {
    samples: VecDeque<f64>,
    count: u64,
    sum: f64,
}

impl Series {
    fn new() -> Self {
        Self { samples: VecDeque::with_capacity(RING_CAPACITY), count: 0, sum: 0.0 }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if self.samples.len() >= RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn snapshot(&self) -> SeriesSnapshot {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        SeriesSnapshot {
            count: self.count,
            sum: self.sum,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            mean: if self.count == 0 { 0.0 } else { self.sum / self.count as f64 },
        }
    }
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// A single series key built from the `name` plus the label values the
/// rest of the system attaches (`bot`, `priority`, `chat_id`, `kind`,
/// `purpose`). Labels are folded into the key rather than kept as a
/// separate dimension table -- this sink has no export format to
/// preserve label structure for, only an admin snapshot read.
fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_owned();
    }
    let mut labels_sorted = labels.to_vec();
    labels_sorted.sort_by_key(|(k, _)| *k);
    let label_str: String = labels_sorted.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    format!("{name}{{{label_str}}}")
}

#[derive(Default)]
pub struct MetricsSink {
    series: Mutex<HashMap<String, Series>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        let mut series = self.series.lock().expect("metrics mutex poisoned");
        series.entry(key).or_insert_with(Series::new).observe(value);
    }

    /// Returns a full snapshot of every series for the admin read route.
    pub fn snapshot(&self) -> HashMap<String, SeriesSnapshot> {
        let series = self.series.lock().expect("metrics mutex poisoned");
        series.iter().map(|(k, v)| (k.clone(), v.snapshot())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_reflect_observed_distribution() {
        let sink = MetricsSink::new();
        for i in 1..=100 {
            sink.observe("queue_wait_ms", i as f64, &[("priority", "start")]);
        }
        let snapshot = sink.snapshot();
        let series = snapshot.get("queue_wait_ms{priority=start}").expect("series should exist");
        assert_eq!(series.count, 100);
        assert!(series.p50 >= 49.0 && series.p50 <= 51.0);
        assert!(series.p99 >= 98.0);
    }

    #[test]
    fn ring_is_bounded_at_1000_samples() {
        let sink = MetricsSink::new();
        for i in 0..2000 {
            sink.observe("x", i as f64, &[]);
        }
        let snapshot = sink.snapshot();
        // count keeps growing even though the ring itself is capped; the
        // bound only affects percentile accuracy on very long tails.
        assert_eq!(snapshot.get("x").unwrap().count, 2000);
    }

    #[test]
    fn distinct_label_sets_produce_distinct_series() {
        let sink = MetricsSink::new();
        sink.observe("send_latency_ms", 10.0, &[("bot", "a")]);
        sink.observe("send_latency_ms", 20.0, &[("bot", "b")]);
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.len(), 2);
    }
}
