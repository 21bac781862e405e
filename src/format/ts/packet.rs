use super::types::*;
use bytes::{BufMut, BytesMut};

/// Builds single transport packets, optionally carrying a PCR.
///
/// Used to synthesise reference clocks and null stuffing; the payload is
/// copied verbatim after the header and the rest is padded with `0xFF`.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    pid: u16,
    pcr: Option<u64>,
    continuity_counter: u8,
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// A payload-only packet on `pid`.
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            pcr: None,
            continuity_counter: 0,
            payload: Vec::new(),
        }
    }

    /// Sets the PCR, in 27 MHz ticks.
    pub fn pcr(mut self, ticks: u64) -> Self {
        self.pcr = Some(ticks);
        self
    }

    /// Sets the 4-bit continuity counter.
    pub fn continuity_counter(mut self, cc: u8) -> Self {
        self.continuity_counter = cc & 0x0f;
        self
    }

    /// Payload bytes, truncated to what fits.
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Renders the packet.
    pub fn build(&self) -> TsPacket {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        let adaptation = self.pcr.is_some();

        let header = TSHeader {
            pid: self.pid & NULL_PID,
            adaptation_field_exists: adaptation,
            contains_payload: true,
            continuity_counter: self.continuity_counter,
            ..Default::default()
        };
        header.write_to(&mut buf);

        if let Some(ticks) = self.pcr {
            buf.put_u8(7); // adaptation field length
            buf.put_u8(0x10); // PCR flag
            buf.put_slice(&encode_pcr(ticks));
        }

        let room = TS_PACKET_SIZE - buf.len();
        buf.put_slice(&self.payload[..self.payload.len().min(room)]);

        // Fill remainder with stuffing bytes
        while buf.len() < TS_PACKET_SIZE {
            buf.put_u8(0xFF);
        }

        let mut packet = [0u8; TS_PACKET_SIZE];
        packet.copy_from_slice(&buf);
        packet
    }
}

/// A stuffing packet on the null PID.
pub fn null_packet() -> TsPacket {
    PacketBuilder::new(NULL_PID).build()
}
