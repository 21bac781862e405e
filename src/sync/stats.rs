use super::gate::GateState;
use parking_lot::RwLock;
use std::sync::Arc;

/// Point-in-time view of a sync buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Ring size in packets
    pub capacity: usize,
    /// Packets queued
    pub filled: usize,
    /// Complete blocks queued
    pub num_blocks: usize,
    /// Bitrate recovered from the reference clock, 0 when unknown
    pub bitrate_bps: u64,
    /// Blocks required to start output
    pub enough_blocks: usize,
    /// Blocks below which output stalls
    pub low_blocks: usize,
    /// Upper bound for `capacity`
    pub max_size: usize,
    /// Packets the source should push next to reach the target fill
    pub suggested_want: usize,
    /// Buffering state
    pub state: GateState,
    /// PID of the reference clock, once known
    pub reference_pid: Option<u16>,
    /// PCR ticks per packet
    pub quantum: f64,
}

/// Shared, cloneable slot holding the latest [`SyncStats`] of a buffer
/// driven elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<SyncStats>>,
}

impl StatsHandle {
    /// A handle holding default stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the shared snapshot.
    pub fn publish(&self, stats: SyncStats) {
        *self.inner.write() = stats;
    }

    /// Latest published stats.
    pub fn snapshot(&self) -> SyncStats {
        self.inner.read().clone()
    }
}
