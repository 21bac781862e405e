#![doc(html_root_url = "https://docs.rs/tssync/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tssync - PCR-paced Transport Stream buffer
//!
//! `tssync` turns bursty MPEG Transport Stream input (file reads, network
//! bursts, demultiplexer output) into a steady packet stream whose rate
//! follows the stream's own Program Clock Reference.
//!
//! ## Features
//!
//! - Bitrate recovery from the 27 MHz PCR of a learned or forced PID
//! - Buffering with start and underflow thresholds counted in PCR blocks
//! - PCR discontinuity containment: only the affected block is dropped
//! - Ring buffer growing on demand and shrinking back when idle
//! - A tokio driver pacing a byte channel into any [`PacketSink`](sync::PacketSink)
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tssync = "0.1.0"
//! ```
//!
//! ### Driving the buffer yourself
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use tssync::format::ts::PacketBuilder;
//! use tssync::{SyncBuffer, SyncConfig};
//!
//! let mut buffer = SyncBuffer::new(SyncConfig::default());
//! buffer.on_output(|packet| {
//!     // hand the packet to the network, a file, a muxer...
//!     let _ = packet;
//! });
//!
//! // 40 ms worth of a stream carrying a PCR every 10 packets
//! let packets: Vec<_> = (0..40u64)
//!     .map(|n| {
//!         let builder = PacketBuilder::new(0x100);
//!         if n % 10 == 0 { builder.pcr(n / 10 * 270_000).build() } else { builder.build() }
//!     })
//!     .collect();
//! buffer.push(&packets);
//!
//! let start = Instant::now();
//! buffer.tick(start + Duration::from_millis(1));
//! println!("{:?}", buffer.query_stats());
//! ```
//!
//! ### Channel to channel
//!
//! ```rust,no_run
//! use tokio::sync::mpsc;
//! use tssync::sync::{ChannelSink, SyncDriver};
//! use tssync::SyncConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (input_tx, input_rx) = mpsc::channel(64);
//!     let (output_tx, mut output_rx) = mpsc::channel(64);
//!
//!     let driver = SyncDriver::new(SyncConfig::load());
//!     let stats = driver.stats();
//!     tokio::spawn(driver.run(input_rx, ChannelSink::new(output_tx)));
//!
//!     // feed `input_tx` with raw TS bytes, read paced chunks here
//!     drop(input_tx);
//!     while let Some(chunk) = output_rx.recv().await {
//!         println!("{} bytes, {:?}", chunk.len(), stats.snapshot().state);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `sync`: the pacing engine
//!   - Packet ring, PCR tracker, capacity manager and buffering gate
//!   - [`SyncBuffer`] and its tokio driver
//!
//! - `format`: the slice of the TS wire format the engine needs
//!   - Header and PCR parsing
//!   - Packet builder for PCR-bearing and null packets
//!
//! - `config`: thresholds, size limit, forced PID and name
//!   - Compact `"enough,low,maxMB"` option strings
//!   - Config file and `TSSYNC_*` environment overrides
//!
//! - `error`: Error handling types and utilities

/// Error types and utilities
pub mod error;

/// Configuration module
pub mod config;

/// Transport stream wire format
pub mod format;

/// PCR-paced sync buffer
pub mod sync;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use sync::SyncBuffer;
