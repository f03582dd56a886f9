//! Latency histograms for the match / translate pipeline.
//! Each named metric keeps the last N samples (microseconds) and reports
//! p50/p95/p99 on demand.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Measures elapsed time from creation until `finish`.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// Record the elapsed time and return it in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.elapsed_us();
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }

    pub fn elapsed_us(&self) -> f64 {
        self.start.elapsed().as_micros() as f64
    }
}

struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    total: u64,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            total: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
        self.total += 1;
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(ring_capacity: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: ring_capacity.max(1),
        }
    }

    /// Record a sample (microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        self.histograms
            .lock()
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Percentile (0-100) in microseconds; 0 for unknown metrics.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    /// Total samples ever recorded for `name`.
    pub fn count(&self, name: &str) -> u64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.total)
            .unwrap_or(0)
    }

    pub fn summary(&self) -> BTreeMap<String, MetricSummary> {
        self.histograms
            .lock()
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: ring.percentile(50.0),
                        p95_us: ring.percentile(95.0),
                        p99_us: ring.percentile(99.0),
                        count: ring.total,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: u64,
}

pub mod metric_names {
    pub const GLOSSARY_LOAD: &str = "t_glossary_load";
    pub const MATCH: &str = "t_match";
    pub const BRIDGE_WAIT: &str = "bridge_wait";
    pub const BRIDGE_TIMEOUT: &str = "bridge_timeout";
    pub const REMOTE_TRANSLATE: &str = "t_remote_translate";
    pub const TRANSLATE_DONE: &str = "t_translate_done";
    pub const OCR_DONE: &str = "t_ocr_done";
    pub const TTS_DONE: &str = "t_tts_done";
    pub const CAPTURE_CYCLE: &str = "t_capture_cycle";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_ring() {
        let registry = MetricsRegistry::with_capacity(4);
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            registry.record(metric_names::MATCH, v);
        }
        // Ring keeps 20..50.
        assert_eq!(registry.percentile(metric_names::MATCH, 0.0), 20.0);
        assert_eq!(registry.percentile(metric_names::MATCH, 100.0), 50.0);
        assert_eq!(registry.count(metric_names::MATCH), 5);
        assert_eq!(registry.percentile("unknown", 50.0), 0.0);
    }

    #[test]
    fn span_records_on_finish() {
        let registry = Arc::new(MetricsRegistry::new());
        let span = registry.span(metric_names::OCR_DONE);
        span.finish();
        let summary = registry.summary();
        assert_eq!(summary[metric_names::OCR_DONE].count, 1);
    }
}
