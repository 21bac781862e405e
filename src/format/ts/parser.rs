use super::types::*;
use crate::error::{Result, SyncError};

/// Decodes the 4-byte header, checking length and sync byte.
pub fn parse_header(data: &[u8]) -> Result<TSHeader> {
    if data.len() < TS_HEADER_SIZE {
        return Err(SyncError::InvalidData("TS packet too short".into()));
    }

    if data[0] != TS_SYNC_BYTE {
        return Err(SyncError::InvalidData("Invalid sync byte".into()));
    }

    Ok(TSHeader {
        sync_byte: data[0],
        transport_error: (data[1] & 0x80) != 0,
        payload_unit_start: (data[1] & 0x40) != 0,
        transport_priority: (data[1] & 0x20) != 0,
        pid: packet_pid(data),
        scrambling_control: (data[3] >> 6) & 0x03,
        adaptation_field_exists: (data[3] & 0x20) != 0,
        contains_payload: (data[3] & 0x10) != 0,
        continuity_counter: data[3] & 0x0F,
    })
}

/// 13-bit PID of a packet. `data` must hold at least the 4-byte header.
#[inline]
pub fn packet_pid(data: &[u8]) -> u16 {
    (((data[1] & 0x1F) as u16) << 8) | data[2] as u16
}

/// Reads the PCR from the adaptation field, as a 27 MHz tick count.
///
/// Returns `None` for packets without a sync byte, without an adaptation
/// field, with an adaptation field too short to hold a PCR, or with the
/// PCR flag cleared.
pub fn try_extract_pcr(packet: &TsPacket) -> Option<u64> {
    if packet[0] != TS_SYNC_BYTE || (packet[3] & 0x20) == 0 {
        return None;
    }

    let adaptation_field_length = packet[4] as usize;
    if adaptation_field_length < 7 {
        return None;
    }

    let flags = packet[5];
    if flags & 0x10 == 0 {
        return None;
    }

    let p = &packet[6..12];
    let pcr_base = ((p[0] as u64) << 25)
        | ((p[1] as u64) << 17)
        | ((p[2] as u64) << 9)
        | ((p[3] as u64) << 1)
        | ((p[4] & 0x80) as u64 >> 7);
    let pcr_ext = (((p[4] & 0x01) as u64) << 8) | (p[5] as u64);
    Some(pcr_base * 300 + pcr_ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::PacketBuilder;

    #[test]
    fn test_parse_ts_header() {
        let data = [
            0x47, // Sync byte
            0x40, // Payload unit start indicator set
            0x00, // PID (high bits)
            0x10, // Continuity counter
        ];

        let header = parse_header(&data).unwrap();
        assert_eq!(header.sync_byte, 0x47);
        assert!(header.payload_unit_start);
        assert_eq!(header.pid, 0);
        assert_eq!(header.continuity_counter, 0x10 & 0x0F);
    }

    #[test]
    fn test_parse_header_bad_sync() {
        assert!(parse_header(&[0x00, 0x00, 0x00, 0x10]).is_err());
        assert!(parse_header(&[0x47, 0x00]).is_err());
    }

    #[test]
    fn test_extract_pcr_known_bytes() {
        let mut packet = [0xffu8; TS_PACKET_SIZE];
        packet[..4].copy_from_slice(&[0x47, 0x01, 0x00, 0x30]);
        packet[4] = 7; // adaptation field length
        packet[5] = 0x10; // PCR flag
        // base = 1, ext = 2
        packet[6..12].copy_from_slice(&[0x00, 0x00, 0x00, 0x00, 0xfe, 0x02]);
        assert_eq!(try_extract_pcr(&packet), Some(302));
    }

    #[test]
    fn test_extract_pcr_absent() {
        let plain = PacketBuilder::new(0x100).build();
        assert_eq!(try_extract_pcr(&plain), None);

        // adaptation field present, PCR flag cleared
        let mut packet = PacketBuilder::new(0x100).pcr(1234).build();
        packet[5] &= !0x10;
        assert_eq!(try_extract_pcr(&packet), None);

        // adaptation field too short
        let mut packet = PacketBuilder::new(0x100).pcr(1234).build();
        packet[4] = 1;
        assert_eq!(try_extract_pcr(&packet), None);

        // lost sync
        let mut packet = PacketBuilder::new(0x100).pcr(1234).build();
        packet[0] = 0;
        assert_eq!(try_extract_pcr(&packet), None);
    }

    #[test]
    fn test_extract_pcr_matches_builder() {
        for ticks in [0, 1, 299, 300, 27_000_000, PCR_WRAP - 1] {
            let packet = PacketBuilder::new(0x1ff).pcr(ticks).build();
            assert_eq!(try_extract_pcr(&packet), Some(ticks));
            assert_eq!(packet_pid(&packet), 0x1ff);
        }
    }
}
