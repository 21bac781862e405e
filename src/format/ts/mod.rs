//! # MPEG Transport Stream (TS) Wire Format
//!
//! The small slice of TS knowledge the sync buffer needs:
//!
//! - Packet constants, the 27 MHz PCR clock and its wrap-around
//! - TS header parsing and writing
//! - PID and PCR extraction from raw packets
//! - A packet builder for synthesising PCR-bearing and null packets
//!
//! ## Example Usage
//!
//! ```rust
//! use tssync::format::ts::{try_extract_pcr, PacketBuilder, TS_PACKET_SIZE};
//!
//! let packet = PacketBuilder::new(0x100).pcr(27_000_000).build();
//! assert_eq!(packet.len(), TS_PACKET_SIZE);
//! assert_eq!(try_extract_pcr(&packet), Some(27_000_000));
//! ```

/// Packet construction helpers
pub mod packet;

/// Low-level TS packet parsing utilities
pub mod parser;

/// Core TS types and constants
pub mod types;

pub use packet::{null_packet, PacketBuilder};
pub use parser::{packet_pid, parse_header, try_extract_pcr};
pub use types::{
    TSHeader,
    TsPacket,
    NULL_PID,
    PCR_HZ,
    PCR_WRAP,
    TS_PACKET_BITS,
    TS_PACKET_SIZE,
};
