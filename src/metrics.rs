//! In-memory record of recent request outcomes.
//!
//! A client-side debugging aid: bounded, lost on restart, and never a
//! replacement for server-side observability.

use http::Method;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Outcome of one logical request, retries included.
#[derive(Debug, Clone)]
pub struct RequestMetric {
    pub request_id: String,
    pub endpoint: String,
    pub method: Method,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration: Duration,
    /// Final HTTP status, if one was observed
    pub status_code: Option<u16>,
    /// Rendered error for failed requests
    pub error: Option<String>,
    /// Network attempts made (0 for cache hits and local denials)
    pub attempts: usize,
    pub from_cache: bool,
}

impl RequestMetric {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate view over the buffered metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsStats {
    pub count: usize,
    pub avg_duration_ms: f64,
    pub error_rate: f64,
}

/// Ring buffer of the most recent [`RequestMetric`]s.
///
/// # Examples
///
/// ```
/// use gridgate::metrics::MetricsRecorder;
///
/// let recorder = MetricsRecorder::new(100);
/// assert!(recorder.recent().is_empty());
/// assert_eq!(recorder.stats().count, 0);
/// ```
#[derive(Debug)]
pub struct MetricsRecorder {
    capacity: usize,
    buffer: Mutex<VecDeque<RequestMetric>>,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends a metric, evicting the oldest once the buffer is full.
    pub fn record(&self, metric: RequestMetric) {
        tracing::debug!(
            request_id = %metric.request_id,
            method = %metric.method,
            endpoint = %metric.endpoint,
            duration_ms = metric.duration.as_millis(),
            status = ?metric.status_code,
            from_cache = metric.from_cache,
            "Recorded request metric"
        );

        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(metric);
    }

    /// Buffered metrics in chronological order (newest last).
    pub fn recent(&self) -> Vec<RequestMetric> {
        self.buffer.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> MetricsStats {
        let buffer = self.buffer.lock();
        let count = buffer.len();
        if count == 0 {
            return MetricsStats {
                count: 0,
                avg_duration_ms: 0.0,
                error_rate: 0.0,
            };
        }

        let total_ms: f64 = buffer
            .iter()
            .map(|m| m.duration.as_secs_f64() * 1000.0)
            .sum();
        let errors = buffer.iter().filter(|m| m.is_error()).count();

        MetricsStats {
            count,
            avg_duration_ms: total_ms / count as f64,
            error_rate: errors as f64 / count as f64,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}
