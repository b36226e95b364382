//! In-flight byte counters for single-shot uploads.
//!
//! The tracker is explicit shared state handed to handlers through the
//! router, not a process global. Entries exist only while the owning
//! request is streaming its body; they are removed when the request
//! finishes, success or failure, so a poll after completion reads zero.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add observed bytes to an upload's counter, creating it on first use.
    pub fn add(&self, upload_id: &str, bytes: u64) {
        let mut map = self.inner.lock().expect("progress map poisoned");
        *map.entry(upload_id.to_string()).or_insert(0) += bytes;
    }

    /// Current byte count; zero for unknown or already-finished uploads.
    pub fn bytes_for(&self, upload_id: &str) -> u64 {
        let map = self.inner.lock().expect("progress map poisoned");
        map.get(upload_id).copied().unwrap_or(0)
    }

    /// Drop an upload's counter. Called unconditionally when the owning
    /// request completes.
    pub fn clear(&self, upload_id: &str) {
        let mut map = self.inner.lock().expect("progress map poisoned");
        map.remove(upload_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_upload_reads_zero() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.bytes_for("never-seen"), 0);
    }

    #[test]
    fn accumulates_and_clears() {
        let tracker = ProgressTracker::new();
        tracker.add("up-1", 1024);
        tracker.add("up-1", 512);
        tracker.add("up-2", 7);
        assert_eq!(tracker.bytes_for("up-1"), 1536);
        assert_eq!(tracker.bytes_for("up-2"), 7);

        tracker.clear("up-1");
        assert_eq!(tracker.bytes_for("up-1"), 0);
        assert_eq!(tracker.bytes_for("up-2"), 7);
    }
}
