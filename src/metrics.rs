//! Request statistics for the classifier service.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Keep at most this many latency samples
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector for served predictions
pub struct InferenceMetrics {
    /// Total successful predictions
    pub predictions_served: AtomicU64,
    /// Total failed requests
    pub failures: AtomicU64,
    /// Failures by error kind
    failures_by_kind: RwLock<HashMap<String, u64>>,
    /// Predictions by winning label
    predictions_by_label: RwLock<HashMap<String, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Confidence distribution in 10% buckets
    confidence_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl InferenceMetrics {
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            predictions_by_label: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            confidence_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction; `confidence` is a percentage
    pub fn record_prediction(&self, processing_time: Duration, label: &str, confidence: f32) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        if let Ok(mut by_label) = self.predictions_by_label.write() {
            *by_label.entry(label.to_string()).or_insert(0) += 1;
        }

        let bucket = ((confidence / 10.0) as usize).min(9);
        if let Ok(mut buckets) = self.confidence_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a failed request
    pub fn record_failure(&self, kind: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let count = sorted.len();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Predictions per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_confidence_distribution(&self) -> [u64; 10] {
        self.confidence_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    pub fn get_predictions_by_label(&self) -> HashMap<String, u64> {
        self.predictions_by_label
            .read()
            .map(|by_label| by_label.clone())
            .unwrap_or_default()
    }

    pub fn get_failures_by_kind(&self) -> HashMap<String, u64> {
        self.failures_by_kind
            .read()
            .map(|by_kind| by_kind.clone())
            .unwrap_or_default()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            predictions_served: self.predictions_served.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            throughput_per_sec: self.get_throughput(),
            processing: self.get_processing_stats(),
            predictions_by_label: self.get_predictions_by_label(),
            failures_by_kind: self.get_failures_by_kind(),
            confidence_distribution: self.get_confidence_distribution(),
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let total = snapshot.predictions_served + snapshot.failures;
        let failure_rate = if total > 0 {
            (snapshot.failures as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let p = &snapshot.processing;

        info!("=== Plant disease detector: metrics summary ===");
        info!(
            "Predictions served: {}  |  Failures: {} ({:.1}%)  |  Uptime: {}s",
            snapshot.predictions_served, snapshot.failures, failure_rate, snapshot.uptime_seconds
        );
        info!(
            "Processing time (us): mean={} p50={} p95={} p99={} max={}",
            p.mean_us, p.p50_us, p.p95_us, p.p99_us, p.max_us
        );

        if !snapshot.predictions_by_label.is_empty() {
            info!("Predictions by label:");
            let mut labels: Vec<_> = snapshot.predictions_by_label.iter().collect();
            labels.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (label, count) in labels {
                info!("  {:<28} {:>6}", label, count);
            }
        }

        if !snapshot.failures_by_kind.is_empty() {
            info!("Failures by kind: {:?}", snapshot.failures_by_kind);
        }

        let served: u64 = snapshot.confidence_distribution.iter().sum();
        if served > 0 {
            info!("Confidence distribution:");
            for (i, &count) in snapshot.confidence_distribution.iter().enumerate() {
                let pct = (count as f64 / served as f64) * 100.0;
                let bar = "#".repeat(((pct / 5.0) as usize).min(20));
                info!(
                    "  {:>3}-{:<3}%: {:>6} ({:>5.1}%) {}",
                    i * 10,
                    (i + 1) * 10,
                    count,
                    pct,
                    bar
                );
            }
        }
    }
}

impl Default for InferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Serializable view of [`InferenceMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub predictions_served: u64,
    pub failures: u64,
    pub uptime_seconds: u64,
    pub throughput_per_sec: f64,
    pub processing: ProcessingStats,
    pub predictions_by_label: HashMap<String, u64>,
    pub failures_by_kind: HashMap<String, u64>,
    pub confidence_distribution: [u64; 10],
}

/// Periodically logs a metrics summary
pub struct MetricsReporter {
    metrics: Arc<InferenceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<InferenceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
