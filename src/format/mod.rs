/// MPEG Transport Stream wire format
pub mod ts;

pub use self::ts::{try_extract_pcr, PacketBuilder, TsPacket};
