use super::capacity::CapacityManager;
use super::gate::{BufferingGate, GateAction, GateState, MAX_IDLE_TIME, STALL_LOG_FLOOR};
use super::ring::{RingBuffer, MIN_BUFFER_SIZE};
use super::stats::SyncStats;
use super::tracker::PcrTracker;
use crate::config::{
    validate_max_size_mb, validate_pid, validate_thresholds, SyncConfig, DEFAULT_ENOUGH_BLOCKS, DEFAULT_LOW_BLOCKS,
};
use crate::error::{Result, SyncError};
use crate::format::ts::{TsPacket, PCR_HZ, TS_PACKET_SIZE};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Tick intervals above this mean the process was suspended or the clock moved
pub const CLOCK_JUMP_LIMIT: Duration = Duration::from_secs(1);

const PCR_TICKS_PER_US: f64 = PCR_HZ as f64 / 1_000_000.0;

type OutputFn = Box<dyn FnMut(&TsPacket) + Send>;
type ReadyFn = Box<dyn FnMut() + Send>;

/// PCR-paced transport stream buffer.
///
/// Packets arrive in bursts through [`push`](Self::push) and leave at the
/// rate recovered from the reference PCR through the output callback, one
/// [`tick`](Self::tick) at a time. Nothing here blocks or spawns: the owner
/// drives both sides from its own event loop.
///
/// ```rust
/// use std::time::{Duration, Instant};
/// use tssync::format::ts::PacketBuilder;
/// use tssync::sync::SyncBuffer;
///
/// let mut buffer = SyncBuffer::default();
/// buffer.on_output(|packet| assert_eq!(packet[0], 0x47));
///
/// let packets: Vec<_> = (0..50u64)
///     .map(|n| PacketBuilder::new(0x100).pcr(n * 27_000).build())
///     .collect();
/// assert!(buffer.push(&packets));
///
/// let start = Instant::now();
/// for ms in 0..100 {
///     buffer.tick(start + Duration::from_millis(ms));
/// }
/// ```
pub struct SyncBuffer {
    config: SyncConfig,
    ring: RingBuffer,
    tracker: PcrTracker,
    capacity: CapacityManager,
    gate: BufferingGate,
    last_tick: Option<Instant>,
    on_output: Option<OutputFn>,
    on_ready: Option<ReadyFn>,
}

impl fmt::Debug for SyncBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBuffer")
            .field("name", &self.config.name)
            .field("state", &self.gate.state())
            .field("ring", &self.ring)
            .field("num_blocks", &self.tracker.num_blocks())
            .field("quantum", &self.tracker.quantum())
            .finish()
    }
}

impl Default for SyncBuffer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl SyncBuffer {
    /// Creates an empty buffer of minimum size.
    pub fn new(mut config: SyncConfig) -> Self {
        if let Err(e) = validate_thresholds(config.enough_blocks, config.low_blocks) {
            warn!("[{}] {}; using default thresholds", config.name, e);
            config.enough_blocks = DEFAULT_ENOUGH_BLOCKS;
            config.low_blocks = DEFAULT_LOW_BLOCKS;
        }
        let max_size = config.max_size_packets().max(MIN_BUFFER_SIZE);

        Self {
            ring: RingBuffer::new(MIN_BUFFER_SIZE),
            tracker: PcrTracker::new(config.pcr_pid),
            capacity: CapacityManager::new(max_size),
            gate: BufferingGate::new(),
            last_tick: None,
            on_output: None,
            on_ready: None,
            config,
        }
    }

    /// Registers the callback receiving paced packets, in order.
    pub fn on_output<F>(&mut self, callback: F)
    where
        F: FnMut(&TsPacket) + Send + 'static,
    {
        self.on_output = Some(Box::new(callback));
    }

    /// Registers the callback asking the source for more input.
    pub fn on_ready<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_ready = Some(Box::new(callback));
    }

    /// Drops the ready callback.
    pub fn clear_ready(&mut self) {
        self.on_ready = None;
    }

    /// Current settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Buffering state.
    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    /// Queued packets.
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Clock recovery state.
    pub fn tracker(&self) -> &PcrTracker {
        &self.tracker
    }

    /// Queues a burst of packets. Returns `false` (after logging) when the
    /// burst was dropped because the buffer cannot grow any further.
    pub fn push(&mut self, packets: &[TsPacket]) -> bool {
        match self.try_push(packets) {
            Ok(()) => true,
            Err(e) => {
                error!("[{}] {}", self.config.name, e);
                false
            }
        }
    }

    /// Like [`push`](Self::push), reporting why a burst was dropped.
    pub fn try_push(&mut self, packets: &[TsPacket]) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        self.gate.on_push();

        if !self.capacity.ensure_room(&mut self.ring, packets.len(), &self.config.name) {
            let dropped = packets.len();
            return Err(if self.tracker.clock_locked() {
                SyncError::CapacityExceeded { dropped }
            } else {
                SyncError::NoReferenceClock { dropped }
            });
        }

        let pushed = self.ring.push(packets);
        debug_assert!(pushed);
        Ok(())
    }

    /// Queues a raw byte burst. A trailing partial packet is ignored.
    pub fn push_bytes(&mut self, data: &[u8]) -> bool {
        let chunks = data.chunks_exact(TS_PACKET_SIZE);
        let remainder = chunks.remainder().len();
        if remainder > 0 {
            debug!("[{}] ignoring {} trailing bytes", self.config.name, remainder);
        }
        let packets: Vec<TsPacket> = chunks.filter_map(|chunk| TsPacket::try_from(chunk).ok()).collect();
        self.push(&packets)
    }

    /// [`tick`](Self::tick) at the current instant.
    pub fn tick_now(&mut self) {
        self.tick(Instant::now());
    }

    /// Converts the wall time elapsed since the previous tick into emitted
    /// packets, and runs the buffering state machine.
    pub fn tick(&mut self, now: Instant) {
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return;
        };

        let elapsed = match now.checked_duration_since(last) {
            Some(elapsed) if elapsed <= CLOCK_JUMP_LIMIT => elapsed,
            other => {
                if self.gate.state() != GateState::Empty {
                    warn!("[{}] clock jump ({:?} since last tick); resetting", self.config.name, other);
                }
                self.full_reset();
                self.last_tick = Some(now);
                return;
            }
        };
        let elapsed_us = elapsed.as_micros();
        if elapsed_us == 0 {
            return;
        }
        self.last_tick = Some(now);

        if self.tracker.num_blocks() < self.config.enough_blocks {
            if let Some(ready) = self.on_ready.as_mut() {
                ready();
            }
        }

        if !self.gate.is_running() {
            self.bookkeeping(now);
            return;
        }

        let (enough, low) = (self.config.enough_blocks, self.config.low_blocks);
        if self.gate.poll(self.tracker.num_blocks(), enough, low, now) == GateAction::Stall {
            debug!(
                "[{}] underflow: {} blocks queued, {} packets",
                self.config.name,
                self.tracker.num_blocks(),
                self.ring.filled()
            );
            return;
        }

        self.tracker.pending += elapsed_us as f64 * PCR_TICKS_PER_US;
        self.pace(now);
    }

    fn pace(&mut self, now: Instant) {
        let enough = self.config.enough_blocks;
        if self.tracker.quantum() <= 0.0 {
            return;
        }

        while self.tracker.pending >= self.tracker.quantum() {
            self.tracker.pending -= self.tracker.quantum();

            if self.ring.send() == self.ring.lookahead() {
                if !self.tracker.seek_next_pcr(&mut self.ring, &self.config.name) {
                    info!("[{}] next PCR not buffered yet; rebuffering", self.config.name);
                    self.light_reset();
                    break;
                }
                self.tracker.refresh_blocks(&self.ring, enough);
                self.capacity.compact(&mut self.ring, now, &self.config.name);
            }

            let send = self.ring.send();
            if let Some(output) = self.on_output.as_mut() {
                output(self.ring.get(send));
            }
            self.ring.advance_send();
        }
    }

    fn bookkeeping(&mut self, now: Instant) {
        let (enough, low) = (self.config.enough_blocks, self.config.low_blocks);

        match self.gate.state() {
            GateState::Empty | GateState::Running => {}
            GateState::Buffering => {
                if !self.tracker.has_block() && !self.tracker.seek_next_pcr(&mut self.ring, &self.config.name) {
                    return;
                }
                let num_blocks = self.tracker.refresh_blocks(&self.ring, enough);
                if self.gate.poll(num_blocks, enough, low, now) == GateAction::Start {
                    info!(
                        "[{}] buffering complete: {} blocks, {} packets, {} bps",
                        self.config.name,
                        num_blocks,
                        self.ring.filled(),
                        self.tracker.bitrate()
                    );
                    self.tracker.rewind(&mut self.ring);
                }
            }
            GateState::Underflow => {
                let num_blocks = self.tracker.refresh_blocks(&self.ring, enough);
                match self.gate.poll(num_blocks, enough, low, now) {
                    GateAction::Reset => {
                        warn!(
                            "[{}] no input for more than {} ms; resetting",
                            self.config.name,
                            MAX_IDLE_TIME.as_millis()
                        );
                        self.full_reset();
                    }
                    GateAction::Resume(stalled) => {
                        if stalled >= STALL_LOG_FLOOR {
                            debug!("[{}] output stalled for {} ms", self.config.name, stalled.as_millis());
                        }
                        self.tracker.pending = 0.0;
                    }
                    _ => {}
                }
            }
        }
    }

    fn light_reset(&mut self) {
        self.tracker.light_reset(&mut self.ring);
        self.gate.rebuffer();
    }

    fn full_reset(&mut self) {
        self.ring.clear();
        self.ring.resize(self.ring.min_size());
        self.tracker.reset();
        self.capacity.reset();
        if self.gate.state() != GateState::Empty {
            self.gate.rebuffer();
        }
    }

    /// Drops all queued data and clock state, e.g. on stream restart.
    pub fn reset(&mut self) {
        info!("[{}] reset", self.config.name);
        self.full_reset();
    }

    /// Sets the start and underflow thresholds, in blocks. Requires
    /// `1 <= low <= enough`; otherwise nothing changes and `false` is returned.
    pub fn set_block_thresholds(&mut self, enough: usize, low: usize) -> bool {
        if let Err(e) = validate_thresholds(enough, low) {
            warn!("[{}] {}", self.config.name, e);
            return false;
        }
        self.config.enough_blocks = enough;
        self.config.low_blocks = low;
        true
    }

    /// Sets the maximum buffer size in megabytes (1..=1024).
    pub fn set_max_size(&mut self, megabytes: usize) -> bool {
        if let Err(e) = validate_max_size_mb(megabytes) {
            warn!("[{}] {}", self.config.name, e);
            return false;
        }
        let mut config = self.config.clone();
        config.max_size_bytes = megabytes * 1024 * 1024;
        self.apply_config(config);
        true
    }

    /// Name used as the log prefix.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.config.name = name.into();
    }

    /// Applies the compact `"enough,low,maxMB"` form; empty fields keep
    /// their value. Returns `false` and changes nothing on bad input.
    pub fn parse_options(&mut self, opts: &str) -> bool {
        let mut config = self.config.clone();
        match config.parse_options(opts) {
            Ok(()) => {
                self.apply_config(config);
                true
            }
            Err(e) => {
                warn!("[{}] {}", self.config.name, e);
                false
            }
        }
    }

    /// Forces the reference PID, or goes back to learning it with `None`.
    /// Returns `false` and changes nothing for the null PID or wider values.
    pub fn set_pcr_pid(&mut self, pid: Option<u16>) -> bool {
        if let Some(Err(e)) = pid.map(validate_pid) {
            warn!("[{}] {}", self.config.name, e);
            return false;
        }
        self.config.pcr_pid = pid;
        self.tracker.set_forced_pid(pid);
        if self.gate.state() != GateState::Empty {
            self.light_reset();
        }
        true
    }

    fn apply_config(&mut self, config: SyncConfig) {
        self.config = config;
        let max_size = self.config.max_size_packets().max(MIN_BUFFER_SIZE);
        self.capacity.set_max_size(max_size);
        if self.ring.size() > max_size && !self.ring.resize(max_size) {
            debug!(
                "[{}] {} packets queued; cannot shrink to {} yet",
                self.config.name,
                self.ring.filled(),
                max_size
            );
        }
    }

    /// Snapshot of occupancy, rate and state.
    pub fn query_stats(&self) -> SyncStats {
        SyncStats {
            capacity: self.ring.size(),
            filled: self.ring.filled(),
            num_blocks: self.tracker.num_blocks(),
            bitrate_bps: self.tracker.bitrate(),
            enough_blocks: self.config.enough_blocks,
            low_blocks: self.config.low_blocks,
            max_size: self.capacity.max_size(),
            suggested_want: self.suggested_want(),
            state: self.gate.state(),
            reference_pid: self.tracker.reference_pid(),
            quantum: self.tracker.quantum(),
        }
    }

    /// Packets still missing to hold `enough_blocks` blocks of the last
    /// seen length, bounded by the room left below the maximum size.
    fn suggested_want(&self) -> usize {
        let room = self.capacity.max_size().saturating_sub(self.ring.filled() + 1);
        let block = self.tracker.block_packets();
        if block == 0 {
            return self.ring.free();
        }
        let missing = self.config.enough_blocks.saturating_sub(self.tracker.num_blocks());
        (missing * block).min(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::PacketBuilder;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn plain(count: usize) -> Vec<TsPacket> {
        vec![PacketBuilder::new(0x100).build(); count]
    }

    #[test]
    fn test_drop_without_reference_clock() {
        let mut buffer = SyncBuffer::default();
        assert!(buffer.set_max_size(1));
        let max = buffer.query_stats().max_size;
        assert_eq!(max, 1024 * 1024 / TS_PACKET_SIZE);

        assert!(buffer.push(&plain(max - 1)));
        assert_eq!(buffer.query_stats().capacity, max);
        assert!(matches!(
            buffer.try_push(&plain(1)),
            Err(SyncError::NoReferenceClock { dropped: 1 })
        ));
        assert!(!buffer.push(&plain(3)));
        assert_eq!(buffer.ring().filled(), max - 1);
    }

    #[test]
    fn test_push_bytes_ignores_partial_packet() {
        let mut buffer = SyncBuffer::default();
        let mut data = Vec::new();
        for packet in plain(3) {
            data.extend_from_slice(&packet);
        }
        data.extend_from_slice(&[0x47, 0x00]);
        assert!(buffer.push_bytes(&data));
        assert_eq!(buffer.ring().filled(), 3);
        assert_eq!(buffer.state(), GateState::Buffering);
    }

    #[test]
    fn test_options_and_thresholds() {
        let mut buffer = SyncBuffer::default();
        assert!(buffer.parse_options("20,8,16"));
        let stats = buffer.query_stats();
        assert_eq!(stats.enough_blocks, 20);
        assert_eq!(stats.low_blocks, 8);
        assert_eq!(stats.max_size, 16 * 1024 * 1024 / TS_PACKET_SIZE);

        assert!(!buffer.parse_options("1,2"));
        assert!(!buffer.parse_options("x"));
        assert_eq!(buffer.query_stats().enough_blocks, 20);

        assert!(buffer.set_block_thresholds(4, 2));
        assert!(!buffer.set_block_thresholds(2, 4));
        assert!(!buffer.set_max_size(0));
        assert_eq!(buffer.config().low_blocks, 2);
    }

    #[test]
    fn test_set_max_size_bounds() {
        let mut buffer = SyncBuffer::default();
        assert!(buffer.set_max_size(1024));
        assert_eq!(buffer.query_stats().max_size, 1024 * 1024 * 1024 / TS_PACKET_SIZE);
        assert!(!buffer.set_max_size(1025));
        assert!(buffer.set_max_size(2));
        assert_eq!(buffer.config().max_size_bytes, 2 * 1024 * 1024);
        // thresholds are untouched
        assert_eq!(buffer.config().enough_blocks, DEFAULT_ENOUGH_BLOCKS);
    }

    #[test]
    fn test_set_pcr_pid_rejects_unusable_pids() {
        let mut buffer = SyncBuffer::default();
        assert!(buffer.set_pcr_pid(Some(0x100)));
        assert!(!buffer.set_pcr_pid(Some(crate::format::ts::NULL_PID)));
        assert!(!buffer.set_pcr_pid(Some(0x2000)));
        assert_eq!(buffer.config().pcr_pid, Some(0x100));
        assert_eq!(buffer.tracker().forced_pid(), Some(0x100));

        assert!(buffer.set_pcr_pid(None));
        assert_eq!(buffer.tracker().forced_pid(), None);
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let buffer = SyncBuffer::new(SyncConfig {
            enough_blocks: 2,
            low_blocks: 7,
            ..Default::default()
        });
        assert_eq!(buffer.config().enough_blocks, DEFAULT_ENOUGH_BLOCKS);
        assert_eq!(buffer.config().low_blocks, DEFAULT_LOW_BLOCKS);
    }

    #[test]
    fn test_ready_called_while_short_of_blocks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut buffer = SyncBuffer::default();
        buffer.on_ready(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let start = Instant::now();
        buffer.tick(start);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        // zero elapsed time is skipped
        buffer.tick(start);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        buffer.tick(start + Duration::from_millis(1));
        buffer.tick(start + Duration::from_millis(2));
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        buffer.clear_ready();
        buffer.tick(start + Duration::from_millis(3));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_explicit_reset() {
        let mut buffer = SyncBuffer::default();
        buffer.push(&plain(3000));
        assert!(buffer.ring().size() > MIN_BUFFER_SIZE);

        buffer.reset();
        assert_eq!(buffer.ring().filled(), 0);
        assert_eq!(buffer.ring().size(), MIN_BUFFER_SIZE);
        assert_eq!(buffer.state(), GateState::Buffering);
    }

    #[test]
    fn test_suggested_want_without_clock() {
        let mut buffer = SyncBuffer::default();
        buffer.push(&plain(100));
        assert_eq!(buffer.query_stats().suggested_want, MIN_BUFFER_SIZE - 101);
    }
}
