use bytes::{BufMut, BytesMut};
use std::time::Duration;

/// Bytes in one transport packet
pub const TS_PACKET_SIZE: usize = 188;
/// Bytes in the fixed packet header
pub const TS_HEADER_SIZE: usize = 4;
/// First byte of every packet
pub const TS_SYNC_BYTE: u8 = 0x47;
/// Bits in one transport packet
pub const TS_PACKET_BITS: u64 = (TS_PACKET_SIZE * 8) as u64;

/// Stuffing PID, never a reference clock
pub const NULL_PID: u16 = 0x1fff;

/// PCR clock rate
pub const PCR_HZ: u64 = 27_000_000;
/// PCR values wrap at 2^33 * 300 ticks (about 26.5 hours)
pub const PCR_WRAP: u64 = (1u64 << 33) * 300;

/// One raw transport packet.
pub type TsPacket = [u8; TS_PACKET_SIZE];

/// The 4-byte transport packet header.
#[derive(Debug)]
pub struct TSHeader {
    /// Always 0x47
    pub sync_byte: u8,
    /// Transport error indicator
    pub transport_error: bool,
    /// Payload unit start indicator
    pub payload_unit_start: bool,
    /// Transport priority
    pub transport_priority: bool,
    /// 13-bit packet identifier
    pub pid: u16,
    /// Transport scrambling control
    pub scrambling_control: u8,
    /// An adaptation field follows the header
    pub adaptation_field_exists: bool,
    /// The packet carries payload
    pub contains_payload: bool,
    /// 4-bit continuity counter
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: TS_SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    /// Appends the header bytes to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);
    }
}

/// Packs a 27 MHz tick count into the 6-byte adaptation field layout
/// (33-bit base, 6 reserved bits, 9-bit extension).
pub fn encode_pcr(ticks: u64) -> [u8; 6] {
    let ticks = ticks % PCR_WRAP;
    let base = ticks / 300;
    let ext = ticks % 300;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        ((base & 0x01) << 7) as u8 | 0x7e | ((ext >> 8) & 0x01) as u8,
        (ext & 0xff) as u8,
    ]
}

/// Wall-clock span covered by `ticks` of the 27 MHz clock.
pub fn pcr_to_time(ticks: u64) -> Duration {
    Duration::from_nanos(((ticks as u128 * 1_000_000_000) / PCR_HZ as u128) as u64)
}
