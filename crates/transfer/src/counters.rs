use std::collections::HashMap;

/// Per-stream part number allocation.
///
/// Every stream counts independently from its own checkpoint. A number is
/// handed out exactly once; rejected segments do not give it back.
#[derive(Debug, Clone, Default)]
pub struct PartCounters {
    last: HashMap<String, u64>,
}

impl PartCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the counters from a server resume checkpoint.
    ///
    /// A checkpoint never moves a counter backwards: numbers already handed
    /// out in this process stay consumed.
    pub fn seed(&mut self, checkpoint: &HashMap<String, u64>) {
        for (stream, &last) in checkpoint {
            let entry = self.last.entry(stream.clone()).or_insert(0);
            *entry = (*entry).max(last);
        }
    }

    /// Allocates the next part number for `stream_id`.
    pub fn next(&mut self, stream_id: &str) -> u64 {
        let entry = self.last.entry(stream_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Last number handed out for `stream_id` (0 if none).
    pub fn last(&self, stream_id: &str) -> u64 {
        self.last.get(stream_id).copied().unwrap_or(0)
    }
}
