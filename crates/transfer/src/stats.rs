use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Default throughput window.
const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Default retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Per-stream upload outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub acked: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub retried: u64,
    pub bytes_acked: u64,
    /// Highest part number the server acknowledged.
    pub last_acked_part: u64,
}

/// Upload outcome counters for a whole session.
#[derive(Debug, Clone, Default)]
pub struct UploadStats {
    streams: BTreeMap<String, StreamStats>,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&mut self, stream_id: &str) -> &mut StreamStats {
        self.streams.entry(stream_id.to_string()).or_default()
    }

    pub fn record_ack(&mut self, stream_id: &str, part_number: u64, bytes: u64) {
        let s = self.stream(stream_id);
        s.acked += 1;
        s.bytes_acked += bytes;
        s.last_acked_part = s.last_acked_part.max(part_number);
    }

    pub fn record_rejection(&mut self, stream_id: &str) {
        self.stream(stream_id).rejected += 1;
    }

    pub fn record_drop(&mut self, stream_id: &str) {
        self.stream(stream_id).dropped += 1;
    }

    pub fn record_retry(&mut self, stream_id: &str) {
        self.stream(stream_id).retried += 1;
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamStats> {
        self.streams.get(stream_id)
    }

    /// Snapshot of all streams, ordered by stream id.
    pub fn snapshot(&self) -> BTreeMap<String, StreamStats> {
        self.streams.clone()
    }

    pub fn total_acked(&self) -> u64 {
        self.streams.values().map(|s| s.acked).sum()
    }

    /// Segments that never reached the server's storage (rejected or dropped).
    pub fn total_lost(&self) -> u64 {
        self.streams.values().map(|s| s.dropped + s.rejected).sum()
    }
}

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Upload throughput over a sliding window of acknowledged segments.
pub struct ThroughputMeter {
    samples: VecDeque<Sample>,
    max_samples: usize,
    window: Duration,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ThroughputMeter {
    /// Creates a new meter.
    ///
    /// - `window`: time window for the rate (default 30 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES),
            window: window.unwrap_or(DEFAULT_WINDOW),
        }
    }

    /// Records `bytes` delivered at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back(Sample { bytes, at: now });

        // Prune samples outside the window.
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average rate in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }
}
