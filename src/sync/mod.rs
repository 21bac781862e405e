//! # PCR-paced sync buffer
//!
//! Absorbs bursty transport stream input and re-emits it at the rate the
//! stream's own Program Clock Reference dictates.
//!
//! The stream is cut into *blocks*: the packets between two consecutive
//! PCRs of the reference PID. Each block's duration divided by its packet
//! count gives the *quantum*, the number of 27 MHz ticks one packet takes
//! on the wire. Every [`SyncBuffer::tick`] turns the wall time elapsed
//! since the previous tick into a packet budget at that quantum.
//!
//! Output only starts once `enough_blocks` blocks are queued and stops
//! again below `low_blocks`; an underflow lasting longer than
//! [`MAX_IDLE_TIME`](gate::MAX_IDLE_TIME) drops everything.
//!
//! - [`ring`]: three-cursor packet ring
//! - [`tracker`]: PCR scanning and rate recovery
//! - [`capacity`]: growth and compaction of the ring
//! - [`gate`]: buffering / running / underflow state machine
//! - [`pacer`]: [`SyncBuffer`], the public entry point
//! - [`driver`]: tokio task running a buffer between two channels

/// Ring growth and compaction
pub mod capacity;
/// Tokio host loop
pub mod driver;
/// Buffering state machine
pub mod gate;
/// The sync buffer itself
pub mod pacer;
/// Packet ring
pub mod ring;
/// Shared statistics
pub mod stats;
/// Reference clock recovery
pub mod tracker;

pub use driver::{ChannelSink, PacketSink, SyncDriver};
pub use gate::GateState;
pub use pacer::SyncBuffer;
pub use ring::{RingBuffer, MIN_BUFFER_SIZE};
pub use stats::{StatsHandle, SyncStats};
pub use tracker::PcrTracker;
