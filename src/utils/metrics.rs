use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of recent API latencies kept for percentiles
const LATENCY_WINDOW: usize = 1024;

/// Process-wide counters for the translation pipeline.
///
/// Cheap to clone; every clone records into the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct Counter(AtomicU64);

impl Counter {
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct StageTiming {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

struct MetricsInner {
    files_received: Counter,
    files_succeeded: Counter,
    files_failed: Counter,

    images_processed: Counter,
    images_unchanged: Counter,
    images_dropped: Counter,

    regions_detected: Counter,
    regions_filtered: Counter,
    detection_fallbacks: Counter,

    translations_ok: Counter,
    translations_fallback: Counter,
    cache_hits: Counter,
    cache_misses: Counter,

    api_calls_success: Counter,
    api_calls_failed: Counter,
    api_latency_ms: RwLock<Vec<u64>>,

    stage_timings: DashMap<&'static str, StageTiming>,
    failure_codes: DashMap<&'static str, u64>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                files_received: Counter::default(),
                files_succeeded: Counter::default(),
                files_failed: Counter::default(),
                images_processed: Counter::default(),
                images_unchanged: Counter::default(),
                images_dropped: Counter::default(),
                regions_detected: Counter::default(),
                regions_filtered: Counter::default(),
                detection_fallbacks: Counter::default(),
                translations_ok: Counter::default(),
                translations_fallback: Counter::default(),
                cache_hits: Counter::default(),
                cache_misses: Counter::default(),
                api_calls_success: Counter::default(),
                api_calls_failed: Counter::default(),
                api_latency_ms: RwLock::new(Vec::with_capacity(LATENCY_WINDOW)),
                stage_timings: DashMap::new(),
                failure_codes: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Files
    pub fn record_file_received(&self) {
        self.inner.files_received.add(1);
    }

    pub fn record_file_succeeded(&self) {
        self.inner.files_succeeded.add(1);
    }

    pub fn record_file_failed(&self, code: &'static str) {
        self.inner.files_failed.add(1);
        *self.inner.failure_codes.entry(code).or_insert(0) += 1;
    }

    // Images
    pub fn record_image_processed(&self) {
        self.inner.images_processed.add(1);
    }

    pub fn record_image_unchanged(&self) {
        self.inner.images_unchanged.add(1);
    }

    pub fn record_image_dropped(&self) {
        self.inner.images_dropped.add(1);
    }

    // Regions
    pub fn record_regions(&self, kept: usize, filtered: usize) {
        self.inner.regions_detected.add(kept as u64);
        self.inner.regions_filtered.add(filtered as u64);
    }

    /// Detection error or timeout that degraded an image to pass-through
    pub fn record_detection_fallback(&self) {
        self.inner.detection_fallbacks.add(1);
    }

    // Translation
    pub fn record_translation(&self, translated: bool) {
        if translated {
            self.inner.translations_ok.add(1);
        } else {
            self.inner.translations_fallback.add(1);
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.add(1);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.add(1);
    }

    // Remote API
    pub fn record_api_call(&self, success: bool, duration: Duration) {
        if success {
            self.inner.api_calls_success.add(1);
        } else {
            self.inner.api_calls_failed.add(1);
        }
        let mut latencies = self.inner.api_latency_ms.write();
        if latencies.len() == LATENCY_WINDOW {
            latencies.remove(0);
        }
        latencies.push(duration.as_millis() as u64);
    }

    // Stages
    pub fn record_stage_duration(&self, stage: &'static str, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let mut timing = self.inner.stage_timings.entry(stage).or_default();
        timing.count += 1;
        timing.total_ms += ms;
        timing.max_ms = timing.max_ms.max(ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;

        let (api_latency_avg_ms, api_latency_p50_ms, api_latency_p95_ms) = {
            let latencies = inner.api_latency_ms.read();
            (
                avg(&latencies),
                percentile(&latencies, 0.5),
                percentile(&latencies, 0.95),
            )
        };

        let cache_hits = inner.cache_hits.get();
        let cache_misses = inner.cache_misses.get();
        let cache_lookups = cache_hits + cache_misses;
        let cache_hit_rate = if cache_lookups > 0 {
            cache_hits as f64 / cache_lookups as f64
        } else {
            0.0
        };

        let stages = inner
            .stage_timings
            .iter()
            .map(|entry| {
                let timing = entry.value();
                let avg_ms = if timing.count > 0 {
                    timing.total_ms / timing.count
                } else {
                    0
                };
                (
                    entry.key().to_string(),
                    StageSnapshot {
                        count: timing.count,
                        avg_ms,
                        max_ms: timing.max_ms,
                    },
                )
            })
            .collect();

        let failures = inner
            .failure_codes
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();

        MetricsSnapshot {
            files_received: inner.files_received.get(),
            files_succeeded: inner.files_succeeded.get(),
            files_failed: inner.files_failed.get(),
            failures,
            images_processed: inner.images_processed.get(),
            images_unchanged: inner.images_unchanged.get(),
            images_dropped: inner.images_dropped.get(),
            regions_detected: inner.regions_detected.get(),
            regions_filtered: inner.regions_filtered.get(),
            detection_fallbacks: inner.detection_fallbacks.get(),
            translations_ok: inner.translations_ok.get(),
            translations_fallback: inner.translations_fallback.get(),
            cache_hits,
            cache_misses,
            cache_hit_rate,
            api_calls_success: inner.api_calls_success.get(),
            api_calls_failed: inner.api_calls_failed.get(),
            api_latency_avg_ms,
            api_latency_p50_ms,
            api_latency_p95_ms,
            stages,
            uptime_seconds: inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        let counters: [(&str, &str, u64); 15] = [
            ("files_received_total", "Files accepted for processing", s.files_received),
            ("files_succeeded_total", "Files that produced output", s.files_succeeded),
            ("files_failed_total", "Files that ended in the failed state", s.files_failed),
            ("images_processed_total", "Images with text re-rendered", s.images_processed),
            ("images_unchanged_total", "Images passed through without regions", s.images_unchanged),
            ("images_dropped_total", "Images dropped after a stage failure", s.images_dropped),
            ("regions_detected_total", "Regions kept after filtering", s.regions_detected),
            ("regions_filtered_total", "Regions discarded by the filter", s.regions_filtered),
            ("detection_fallbacks_total", "Images degraded to pass-through by detection errors", s.detection_fallbacks),
            ("translations_ok_total", "Regions translated", s.translations_ok),
            ("translations_fallback_total", "Regions rendered with their original text", s.translations_fallback),
            ("translation_cache_hits_total", "Translation cache hits", s.cache_hits),
            ("translation_cache_misses_total", "Translation cache misses", s.cache_misses),
            ("api_calls_success_total", "Successful remote API calls", s.api_calls_success),
            ("api_calls_failed_total", "Failed remote API calls", s.api_calls_failed),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let _ = writeln!(out, "# HELP file_failures_total Failed files by error code");
        let _ = writeln!(out, "# TYPE file_failures_total counter");
        for (code, count) in &s.failures {
            let _ = writeln!(out, "file_failures_total{{code=\"{}\"}} {}", code, count);
        }

        let _ = writeln!(out, "# HELP stage_avg_duration_ms Average stage duration in milliseconds");
        let _ = writeln!(out, "# TYPE stage_avg_duration_ms gauge");
        for (stage, timing) in &s.stages {
            let _ = writeln!(out, "stage_avg_duration_ms{{stage=\"{}\"}} {}", stage, timing.avg_ms);
        }

        let _ = writeln!(out, "# HELP api_latency_avg_ms Average remote API latency in milliseconds");
        let _ = writeln!(out, "# TYPE api_latency_avg_ms gauge");
        let _ = writeln!(out, "api_latency_avg_ms {}", s.api_latency_avg_ms);
        let _ = writeln!(out, "# HELP uptime_seconds Application uptime in seconds");
        let _ = writeln!(out, "# TYPE uptime_seconds counter");
        let _ = writeln!(out, "uptime_seconds {}", s.uptime_seconds);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub files_received: u64,
    pub files_succeeded: u64,
    pub files_failed: u64,
    pub failures: BTreeMap<String, u64>,
    pub images_processed: u64,
    pub images_unchanged: u64,
    pub images_dropped: u64,
    pub regions_detected: u64,
    pub regions_filtered: u64,
    pub detection_fallbacks: u64,
    pub translations_ok: u64,
    pub translations_fallback: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub api_calls_success: u64,
    pub api_calls_failed: u64,
    pub api_latency_avg_ms: u64,
    pub api_latency_p50_ms: u64,
    pub api_latency_p95_ms: u64,
    pub stages: BTreeMap<String, StageSnapshot>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
