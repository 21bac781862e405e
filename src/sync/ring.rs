use crate::format::ts::{TsPacket, TS_PACKET_SIZE};
use std::fmt;

/// Smallest ring the buffer ever shrinks to (about 256 KB of packets)
pub const MIN_BUFFER_SIZE: usize = 1365;

/// Fixed-capacity circular array of transport packets with three cursors.
///
/// `send` is the next packet to emit, `lookahead` is where the PCR scan
/// resumes and `recv` is where the next pushed packet lands. In logical
/// order `send <= lookahead <= recv`, all taken modulo the size. One slot
/// always stays unused so that a full ring differs from an empty one.
pub struct RingBuffer {
    slots: Vec<TsPacket>,
    send: usize,
    lookahead: usize,
    recv: usize,
    min_size: usize,
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("size", &self.size())
            .field("send", &self.send)
            .field("lookahead", &self.lookahead)
            .field("recv", &self.recv)
            .finish()
    }
}

impl RingBuffer {
    /// Creates a ring with `size` slots, clamped up to [`MIN_BUFFER_SIZE`].
    pub fn new(size: usize) -> Self {
        Self::with_min_size(size, MIN_BUFFER_SIZE)
    }

    /// Creates a ring with a custom lower bound on its size.
    pub fn with_min_size(size: usize, min_size: usize) -> Self {
        let min_size = min_size.max(2);
        Self {
            slots: vec![[0u8; TS_PACKET_SIZE]; size.max(min_size)],
            send: 0,
            lookahead: 0,
            recv: 0,
            min_size,
        }
    }

    /// Slots in the ring, including the spare one.
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Lower bound for [`resize`](Self::resize).
    #[inline]
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Packets queued between `send` and `recv`.
    #[inline]
    pub fn filled(&self) -> usize {
        (self.recv + self.size() - self.send) % self.size()
    }

    /// Packets already scanned for PCR but not yet sent.
    #[inline]
    pub fn lookahead_filled(&self) -> usize {
        (self.lookahead + self.size() - self.send) % self.size()
    }

    /// Packets that can still be pushed.
    #[inline]
    pub fn free(&self) -> usize {
        self.size() - self.filled() - 1
    }

    /// Nothing queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.send == self.recv
    }

    /// Next slot to emit.
    #[inline]
    pub fn send(&self) -> usize {
        self.send
    }

    /// Next slot to scan for a PCR.
    #[inline]
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Next slot to write.
    #[inline]
    pub fn recv(&self) -> usize {
        self.recv
    }

    /// Packet stored at slot `index`.
    #[inline]
    pub fn get(&self, index: usize) -> &TsPacket {
        &self.slots[index]
    }

    /// Slot index following `index`.
    #[inline]
    pub fn next(&self, index: usize) -> usize {
        if index + 1 == self.size() {
            0
        } else {
            index + 1
        }
    }

    /// Copies `packets` in at `recv`. Refuses (and copies nothing) unless
    /// all of them fit without touching unread data.
    pub fn push(&mut self, packets: &[TsPacket]) -> bool {
        let count = packets.len();
        if count > self.free() {
            return false;
        }

        let head = count.min(self.size() - self.recv);
        self.slots[self.recv..self.recv + head].copy_from_slice(&packets[..head]);
        if head < count {
            self.slots[..count - head].copy_from_slice(&packets[head..]);
        }
        self.recv = (self.recv + count) % self.size();
        true
    }

    /// Moves `send` one packet forward.
    pub fn advance_send(&mut self) {
        debug_assert!(self.send != self.recv);
        if self.send == self.lookahead {
            self.lookahead = self.next(self.lookahead);
        }
        self.send = self.next(self.send);
    }

    /// Moves `lookahead` one packet forward.
    pub fn advance_lookahead(&mut self) {
        debug_assert!(self.lookahead != self.recv);
        self.lookahead = self.next(self.lookahead);
    }

    /// Drops everything before `index`, which must lie in `[send, lookahead]`.
    pub fn discard_until(&mut self, index: usize) {
        debug_assert!((index + self.size() - self.send) % self.size() <= self.lookahead_filled());
        self.send = index;
    }

    /// Restarts the PCR scan from `send`.
    pub fn rewind_lookahead(&mut self) {
        self.lookahead = self.send;
    }

    /// Drops all queued packets. The size is kept.
    pub fn clear(&mut self) {
        self.send = 0;
        self.lookahead = 0;
        self.recv = 0;
    }

    /// Reallocates the ring with `new_size` slots, clamped up to the
    /// minimum size, and linearizes the queued packets to start at slot 0.
    ///
    /// Returns `true` without touching anything when the clamped size is
    /// the current one, and `false` when the queued packets would not fit.
    pub fn resize(&mut self, new_size: usize) -> bool {
        let new_size = new_size.max(self.min_size);
        if new_size == self.size() {
            return true;
        }

        let filled = self.filled();
        if new_size <= filled {
            return false;
        }
        let lookahead_filled = self.lookahead_filled();

        let mut slots = vec![[0u8; TS_PACKET_SIZE]; new_size];
        let head = filled.min(self.size() - self.send);
        slots[..head].copy_from_slice(&self.slots[self.send..self.send + head]);
        if head < filled {
            slots[head..filled].copy_from_slice(&self.slots[..filled - head]);
        }

        self.slots = slots;
        self.send = 0;
        self.lookahead = lookahead_filled;
        self.recv = filled;
        true
    }
}
