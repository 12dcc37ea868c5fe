use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Spacing the gateway enforces between Identify payloads in one bucket.
pub const DEFAULT_IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Shared Identify slots for a group of shards.
///
/// Shards map to bucket `shard_id % max_concurrency`; each bucket hands out
/// one slot per interval. Reserving returns how long the caller must wait
/// before its slot opens.
#[derive(Debug)]
pub struct IdentifyQueue {
    interval: Duration,
    buckets: Vec<Mutex<Option<Instant>>>,
}

impl IdentifyQueue {
    pub fn new(interval: Duration, max_concurrency: u32) -> Self {
        let buckets = (0..max_concurrency.max(1)).map(|_| Mutex::new(None)).collect();
        Self { interval, buckets }
    }

    pub fn reserve(&self, shard_id: u32, now: Instant) -> Duration {
        let index = shard_id as usize % self.buckets.len();
        let mut next_open = self.buckets[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = match *next_open {
            Some(open) if open > now => open,
            _ => now,
        };
        *next_open = Some(slot + self.interval);
        slot - now
    }

    /// Give back a slot reserved for `slot_at` that will not be used. Only the
    /// newest reservation in a bucket can be returned; older ones stay taken.
    pub fn release(&self, shard_id: u32, slot_at: Instant) -> bool {
        let index = shard_id as usize % self.buckets.len();
        let mut next_open = self.buckets[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *next_open != Some(slot_at + self.interval) {
            return false;
        }
        *next_open = Some(slot_at);
        true
    }
}

impl Default for IdentifyQueue {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTIFY_INTERVAL, 1)
    }
}
