use super::ring::RingBuffer;
use crate::format::ts::types::pcr_to_time;
use crate::format::ts::{packet_pid, try_extract_pcr, NULL_PID, PCR_HZ, PCR_WRAP, TS_PACKET_BITS};
use log::{debug, info, warn};

/// Largest accepted gap between consecutive reference PCRs (150 ms)
pub const MAX_PCR_DELTA: u64 = PCR_HZ * 150 / 1000;

/// Clock recovery state: the reference PID, the last two PCR values and
/// the per-packet tick quantum derived from them.
#[derive(Debug, Default)]
pub struct PcrTracker {
    forced_pid: Option<u16>,
    reference_pid: Option<u16>,
    last_pcr: Option<u64>,
    current_pcr: Option<u64>,
    /// PCR ticks per packet at the current bitrate
    quantum: f64,
    /// Fractional packet budget carried between ticks, in PCR ticks
    pub(crate) pending: f64,
    /// Packets scanned since the most recent reference PCR
    scanned: usize,
    /// Length in packets of the most recent complete block
    block_packets: usize,
    /// Complete blocks queued, capped at the enough threshold
    pub(crate) num_blocks: usize,
    clock_locked: bool,
    discontinuities: u64,
}

impl PcrTracker {
    /// A tracker with no clock yet, latched to `forced_pid` if given.
    pub fn new(forced_pid: Option<u16>) -> Self {
        Self {
            forced_pid,
            reference_pid: forced_pid,
            ..Default::default()
        }
    }

    /// PID the reference clock is read from.
    pub fn reference_pid(&self) -> Option<u16> {
        self.reference_pid
    }

    /// PID pinned by configuration.
    pub fn forced_pid(&self) -> Option<u16> {
        self.forced_pid
    }

    /// PCR opening the current block.
    pub fn last_pcr(&self) -> Option<u64> {
        self.last_pcr
    }

    /// PCR closing the current block.
    pub fn current_pcr(&self) -> Option<u64> {
        self.current_pcr
    }

    /// PCR ticks per packet in the current block.
    pub fn quantum(&self) -> f64 {
        self.quantum
    }

    /// Complete blocks queued, capped at `enough_blocks`.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Packets in the last located block.
    pub fn block_packets(&self) -> usize {
        self.block_packets
    }

    /// PCR discontinuities seen so far.
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    /// Whether a valid PCR pair was seen since the last full reset.
    pub fn clock_locked(&self) -> bool {
        self.clock_locked
    }

    /// A block has been located and `quantum` describes it.
    pub fn has_block(&self) -> bool {
        self.last_pcr.is_some()
    }

    /// Bitrate implied by the current quantum, in bits per second.
    pub fn bitrate(&self) -> u64 {
        if self.quantum <= 0.0 {
            return 0;
        }
        (PCR_HZ as f64 / self.quantum * TS_PACKET_BITS as f64) as u64
    }

    /// Advances `lookahead` until the next valid PCR on the reference PID.
    ///
    /// The first PCR after a reset only anchors the clock and the scan goes
    /// on. Until the clock has locked once, everything queued before that
    /// anchor is discarded. A PCR whose distance to
    /// the previous one is zero or at least [`MAX_PCR_DELTA`] is a
    /// discontinuity: the block in front of it is discarded and it becomes
    /// the new anchor. Returns `false` once `lookahead` reaches `recv`.
    pub fn seek_next_pcr(&mut self, ring: &mut RingBuffer, name: &str) -> bool {
        while ring.lookahead() != ring.recv() {
            let pos = ring.lookahead();
            ring.advance_lookahead();
            self.scanned += 1;

            let packet = ring.get(pos);
            let pid = packet_pid(packet);
            if pid == NULL_PID {
                continue;
            }
            let Some(pcr) = try_extract_pcr(packet) else {
                continue;
            };

            if self.reference_pid.is_none() {
                info!("[{}] reference PID {:#06x}", name, pid);
                self.reference_pid = Some(pid);
            }
            if self.reference_pid != Some(pid) {
                continue;
            }

            let Some(prev) = self.current_pcr else {
                if !self.clock_locked {
                    ring.discard_until(pos);
                }
                self.anchor(pcr);
                continue;
            };

            let delta = (pcr + PCR_WRAP - prev) % PCR_WRAP;
            if delta == 0 || delta >= MAX_PCR_DELTA {
                warn!(
                    "[{}] PCR discontinuity on PID {:#06x}: {} -> {} ({:?})",
                    name,
                    pid,
                    prev,
                    pcr,
                    pcr_to_time(delta)
                );
                ring.discard_until(pos);
                self.anchor(pcr);
                self.last_pcr = None;
                self.num_blocks = 0;
                self.discontinuities += 1;
                continue;
            }

            self.quantum = delta as f64 / self.scanned as f64;
            self.block_packets = self.scanned;
            self.last_pcr = Some(prev);
            self.current_pcr = Some(pcr);
            self.scanned = 0;
            if !self.clock_locked {
                debug!("[{}] clock locked, {} bps", name, self.bitrate());
                self.clock_locked = true;
            }
            return true;
        }
        false
    }

    fn anchor(&mut self, pcr: u64) {
        self.current_pcr = Some(pcr);
        self.scanned = 0;
    }

    /// Counts reference PCRs between `lookahead` and `recv`, stopping at `cap`.
    pub fn count_blocks(&self, ring: &RingBuffer, cap: usize) -> usize {
        let Some(reference) = self.reference_pid else {
            return 0;
        };

        let mut count = 0;
        let mut pos = ring.lookahead();
        while pos != ring.recv() && count < cap {
            let packet = ring.get(pos);
            if packet_pid(packet) == reference && try_extract_pcr(packet).is_some() {
                count += 1;
            }
            pos = ring.next(pos);
        }
        count
    }

    /// Recomputes `num_blocks`: the block located last plus every further
    /// reference PCR already queued.
    pub fn refresh_blocks(&mut self, ring: &RingBuffer, enough: usize) -> usize {
        self.num_blocks = if self.has_block() {
            (1 + self.count_blocks(ring, enough)).min(enough)
        } else {
            0
        };
        self.num_blocks
    }

    /// Restarts the scan at `send` before output starts, keeping PID and quantum.
    pub fn rewind(&mut self, ring: &mut RingBuffer) {
        ring.rewind_lookahead();
        self.last_pcr = None;
        self.current_pcr = None;
        self.scanned = 0;
        self.pending = 0.0;
    }

    /// Forgets the located blocks and the learned PID; queued data stays.
    pub fn light_reset(&mut self, ring: &mut RingBuffer) {
        self.rewind(ring);
        self.reference_pid = self.forced_pid;
        self.quantum = 0.0;
        self.block_packets = 0;
        self.num_blocks = 0;
    }

    /// Back to the freshly created state (the forced PID survives).
    pub fn reset(&mut self) {
        *self = Self::new(self.forced_pid);
    }

    /// Pins the reference PID, or unpins it with `None`.
    pub fn set_forced_pid(&mut self, pid: Option<u16>) {
        self.forced_pid = pid;
        self.reference_pid = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::{null_packet, PacketBuilder, TsPacket};
    use pretty_assertions::assert_eq;

    const PID: u16 = 0x100;

    fn ring_with(packets: &[TsPacket]) -> RingBuffer {
        let mut ring = RingBuffer::with_min_size(packets.len() + 1, 16);
        assert!(ring.push(packets));
        ring
    }

    /// `blocks` blocks of `len` packets, each starting with a PCR `delta` ticks after the last.
    fn stream(blocks: usize, len: usize, start: u64, delta: u64) -> Vec<TsPacket> {
        let mut out = Vec::new();
        for b in 0..blocks {
            out.push(PacketBuilder::new(PID).pcr(start + b as u64 * delta).build());
            for _ in 1..len {
                out.push(PacketBuilder::new(PID).build());
            }
        }
        out
    }

    #[test]
    fn test_bitrate_law() {
        let delta = 1_080_000; // 40 ms
        let mut ring = ring_with(&stream(3, 100, 0, delta));
        let mut tracker = PcrTracker::new(None);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.reference_pid(), Some(PID));
        assert_eq!(tracker.last_pcr(), Some(0));
        assert_eq!(tracker.current_pcr(), Some(delta));
        assert!((tracker.quantum() - delta as f64 / 100.0).abs() < 1e-9);
        assert_eq!(tracker.block_packets(), 100);

        let expected = (PCR_HZ as f64 / (delta as f64 / 100.0) * 1504.0) as u64;
        assert_eq!(tracker.bitrate(), expected);
        assert_eq!(ring.lookahead(), 101);
    }

    #[test]
    fn test_first_pcr_discards_leading_packets() {
        let mut packets = vec![PacketBuilder::new(PID).build(); 7];
        packets.extend(stream(2, 10, 500, 27_000));
        let mut ring = ring_with(&packets);
        let mut tracker = PcrTracker::new(None);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(ring.send(), 7);
        assert_eq!(tracker.block_packets(), 10);
    }

    #[test]
    fn test_reference_pid_skips_null_and_pcr_less_packets() {
        let mut packets = vec![null_packet(), PacketBuilder::new(0x200).build()];
        packets.extend(stream(2, 4, 0, 27_000));
        let mut ring = ring_with(&packets);
        let mut tracker = PcrTracker::new(None);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.reference_pid(), Some(PID));
    }

    #[test]
    fn test_forced_pid_ignores_other_clocks() {
        let mut packets = Vec::new();
        for n in 0..4u64 {
            packets.push(PacketBuilder::new(0x300).pcr(n * 999).build());
            packets.push(PacketBuilder::new(PID).pcr(n * 27_000).build());
            packets.push(PacketBuilder::new(PID).build());
        }
        let mut ring = ring_with(&packets);
        let mut tracker = PcrTracker::new(Some(PID));

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.reference_pid(), Some(PID));
        assert_eq!(tracker.block_packets(), 3);
        assert!((tracker.quantum() - 9_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_discontinuity_discards_only_affected_block() {
        let delta = 270_000;
        let mut packets = stream(2, 10, 0, delta);
        // a jump of a few seconds starts the third block
        packets.extend(stream(3, 10, 100 * PCR_HZ, delta));
        let mut ring = ring_with(&packets);
        let mut tracker = PcrTracker::new(None);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(ring.send(), 0);

        // send catches up with the boundary, then the jump is met
        while ring.send() != ring.lookahead() {
            ring.advance_send();
        }
        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.discontinuities(), 1);
        // packets 11..19, the block ending at the jump, are gone
        assert_eq!(ring.send(), 20);
        assert_eq!(tracker.last_pcr(), Some(100 * PCR_HZ));
        assert_eq!(tracker.current_pcr(), Some(100 * PCR_HZ + delta));
        assert!((tracker.quantum() - delta as f64 / 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_delta_is_discontinuity() {
        let mut packets = stream(1, 5, 1000, 0);
        packets.extend(stream(2, 5, 1000, 27_000));
        let mut ring = ring_with(&packets);
        let mut tracker = PcrTracker::new(None);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.discontinuities(), 1);
        assert_eq!(ring.send(), 5);
    }

    #[test]
    fn test_pcr_wrap_is_continuous() {
        let delta = 270_000;
        let mut ring = ring_with(&stream(2, 10, PCR_WRAP - delta / 2, delta));
        let mut tracker = PcrTracker::new(None);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.discontinuities(), 0);
        assert_eq!(tracker.current_pcr(), Some(delta / 2));
    }

    #[test]
    fn test_seek_needs_more_data() {
        let mut ring = ring_with(&stream(1, 10, 0, 0));
        let mut tracker = PcrTracker::new(None);
        assert!(!tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(ring.lookahead(), ring.recv());
        assert!(!tracker.has_block());

        // the scan resumes where it stopped
        let more = stream(1, 10, 27_000, 0);
        assert!(ring.resize(64));
        assert!(ring.push(&more));
        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.block_packets(), 10);
    }

    #[test]
    fn test_count_and_refresh_blocks() {
        let mut ring = ring_with(&stream(8, 5, 0, 27_000));
        let mut tracker = PcrTracker::new(None);
        assert_eq!(tracker.count_blocks(&ring, 100), 0);

        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(tracker.count_blocks(&ring, 100), 6);
        assert_eq!(tracker.count_blocks(&ring, 4), 4);
        assert_eq!(tracker.refresh_blocks(&ring, 100), 7);
        assert_eq!(tracker.refresh_blocks(&ring, 5), 5);
    }

    #[test]
    fn test_light_reset_keeps_forced_pid() {
        let mut ring = ring_with(&stream(3, 5, 0, 27_000));
        let mut tracker = PcrTracker::new(Some(PID));
        assert!(tracker.seek_next_pcr(&mut ring, "test"));

        tracker.light_reset(&mut ring);
        assert_eq!(tracker.reference_pid(), Some(PID));
        assert_eq!(tracker.quantum(), 0.0);
        assert!(!tracker.has_block());
        assert_eq!(ring.lookahead(), ring.send());
        assert!(tracker.clock_locked());

        tracker.reset();
        assert!(!tracker.clock_locked());
        assert_eq!(tracker.reference_pid(), Some(PID));
    }

    #[test]
    fn test_light_reset_keeps_leading_packets() {
        let mut ring = ring_with(&stream(4, 5, 0, 27_000));
        let mut tracker = PcrTracker::new(None);
        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        for _ in 0..3 {
            ring.advance_send();
        }

        tracker.light_reset(&mut ring);
        assert!(tracker.seek_next_pcr(&mut ring, "test"));
        assert_eq!(ring.send(), 3);
        assert_eq!(tracker.block_packets(), 5);
    }
}
