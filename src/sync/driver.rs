use super::gate::GateState;
use super::pacer::SyncBuffer;
use super::stats::StatsHandle;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::format::ts::{TsPacket, TS_PACKET_SIZE};
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Default period between two pacing ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Destination of paced packets
#[async_trait::async_trait]
pub trait PacketSink: Send {
    /// Write the packets emitted during one tick, in order
    async fn write_packets(&mut self, packets: &[TsPacket]) -> Result<()>;

    /// Flush anything still buffered downstream
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Forwards each tick's packets as one contiguous chunk on a channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Wraps the sending half of a byte channel.
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl PacketSink for ChannelSink {
    async fn write_packets(&mut self, packets: &[TsPacket]) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        let mut chunk = BytesMut::with_capacity(packets.len() * TS_PACKET_SIZE);
        for packet in packets {
            chunk.extend_from_slice(packet);
        }
        self.tx
            .send(chunk.freeze())
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// Runs a [`SyncBuffer`] on a tokio interval.
///
/// Input is pulled from a byte channel only while the buffer asks for more,
/// so a fast producer is held back by channel back-pressure instead of
/// filling the ring up to its maximum size.
pub struct SyncDriver {
    buffer: SyncBuffer,
    queue: Arc<Mutex<Vec<TsPacket>>>,
    wants_input: Arc<AtomicBool>,
    stats: StatsHandle,
    tick_interval: Duration,
}

impl SyncDriver {
    /// A driver around a fresh buffer built from `config`.
    pub fn new(config: SyncConfig) -> Self {
        let mut buffer = SyncBuffer::new(config);

        let queue = Arc::new(Mutex::new(Vec::new()));
        let output = queue.clone();
        buffer.on_output(move |packet| output.lock().push(*packet));

        let wants_input = Arc::new(AtomicBool::new(true));
        let ready = wants_input.clone();
        buffer.on_ready(move || ready.store(true, Ordering::Release));

        Self {
            buffer,
            queue,
            wants_input,
            stats: StatsHandle::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Overrides [`DEFAULT_TICK_INTERVAL`].
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Handle following the stats published after every tick.
    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// The hosted buffer, for settings changes before [`run`](Self::run).
    pub fn buffer_mut(&mut self) -> &mut SyncBuffer {
        &mut self.buffer
    }

    /// Paces `input` into `sink` until the input channel closes and the
    /// queued packets have played out.
    ///
    /// Chunks may split packets anywhere; partial packets are carried over
    /// to the next chunk. Once the input closes the block thresholds drop to
    /// one, so everything up to the last reference PCR is emitted at the
    /// recovered rate. Packets after that PCR have no rate and are dropped.
    pub async fn run<S: PacketSink>(mut self, mut input: mpsc::Receiver<Bytes>, mut sink: S) -> Result<()> {
        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut carry = BytesMut::new();

        info!(
            "[{}] driver started, tick every {:?}",
            self.buffer.config().name,
            self.tick_interval
        );

        loop {
            tokio::select! {
                chunk = input.recv(), if self.wants_input.load(Ordering::Acquire) => {
                    let Some(chunk) = chunk else {
                        break;
                    };
                    carry.extend_from_slice(&chunk);
                    let whole = carry.len() - carry.len() % TS_PACKET_SIZE;
                    if whole > 0 {
                        let data = carry.split_to(whole);
                        self.buffer.push_bytes(&data);
                    }
                }
                _ = interval.tick() => {
                    self.tick_once(&mut sink).await?;
                }
            }
        }

        if !carry.is_empty() {
            debug!("[{}] input closed mid-packet, {} bytes lost", self.buffer.config().name, carry.len());
        }

        if !self.buffer.ring().is_empty() {
            info!(
                "[{}] input closed, draining {} packets",
                self.buffer.config().name,
                self.buffer.ring().filled()
            );
            self.buffer.set_block_thresholds(1, 1);

            // two ticks without progress means the rest cannot be timed
            let mut idle = 0;
            while !self.buffer.ring().is_empty() && idle < 2 {
                interval.tick().await;
                let emitted = self.tick_once(&mut sink).await?;
                if emitted > 0 || self.buffer.state() == GateState::Running {
                    idle = 0;
                } else {
                    idle += 1;
                }
            }
            if !self.buffer.ring().is_empty() {
                debug!(
                    "[{}] {} packets after the last PCR dropped",
                    self.buffer.config().name,
                    self.buffer.ring().filled()
                );
            }
        }

        info!("[{}] driver stopping", self.buffer.config().name);
        sink.flush().await
    }

    /// One pacing tick: emitted packets go to `sink`, stats are published.
    async fn tick_once<S: PacketSink>(&mut self, sink: &mut S) -> Result<usize> {
        self.wants_input.store(false, Ordering::Release);
        self.buffer.tick(Instant::now().into_std());

        let packets = std::mem::take(&mut *self.queue.lock());
        sink.write_packets(&packets).await?;
        self.stats.publish(self.buffer.query_stats());
        Ok(packets.len())
    }
}
