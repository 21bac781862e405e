use super::ring::RingBuffer;
use log::debug;
use std::time::{Duration, Instant};

/// How often the ring is considered for shrinking
pub const COMPACT_INTERVAL: Duration = Duration::from_secs(10);

/// Grows the ring on demand up to `max_size` slots and periodically
/// halves it again while it stays mostly empty.
#[derive(Debug)]
pub struct CapacityManager {
    max_size: usize,
    last_compact: Option<Instant>,
}

impl CapacityManager {
    /// A manager allowing growth up to `max_size` slots.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            last_compact: None,
        }
    }

    /// Upper bound on the ring size, in slots.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Changes the upper bound; the ring itself is not touched.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    /// Doubles the ring (bounded by `max_size`) until `count` packets fit.
    /// Returns `false` when they cannot fit even at the maximum size.
    pub fn ensure_room(&self, ring: &mut RingBuffer, count: usize, name: &str) -> bool {
        while ring.free() < count {
            if ring.size() >= self.max_size {
                return false;
            }
            let target = (ring.size() * 2).min(self.max_size);
            if !ring.resize(target) {
                return false;
            }
            debug!("[{}] buffer grown to {} packets", name, ring.size());
        }
        true
    }

    /// Halves the ring when less than a quarter of it is in use. Runs at
    /// most once per [`COMPACT_INTERVAL`]; returns whether it shrank.
    pub fn compact(&mut self, ring: &mut RingBuffer, now: Instant, name: &str) -> bool {
        let Some(last) = self.last_compact else {
            self.last_compact = Some(now);
            return false;
        };
        if now.saturating_duration_since(last) < COMPACT_INTERVAL {
            return false;
        }
        self.last_compact = Some(now);

        let size = ring.size();
        if ring.filled() < size / 4 && size > ring.min_size() && ring.resize(size / 2) {
            debug!("[{}] buffer shrunk to {} packets", name, ring.size());
            return true;
        }
        false
    }

    /// Forgets the compaction schedule.
    pub fn reset(&mut self) {
        self.last_compact = None;
    }
}
