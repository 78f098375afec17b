#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! Real-time audio distribution and framing core of a broadcast backend.
//!
//! A [`StreamSession`] receives fixed-size stereo blocks from the audio server
//! callback and fans them out into per-consumer byte rings
//! ([`ring::SharedRingBuffer`]) under a per-consumer
//! [`DataflowControl`](dataflow::DataflowControl) state. Encoder and recorder
//! workers drain those rings on their own threads. Level automation lives in
//! [`fade`] and [`smoothing`], and the encoded output side is served by the
//! [`adts`] resynchroniser and the [`id3`] tag compiler.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::dataflow::{ConsumerId, ConsumerKind, ConsumerPort, DataflowControl};
use crate::fanout::FanOut;
use crate::id3::Id3Tag;

pub mod adts;
pub mod config;
/// Developer-facing control and TUI support.
pub mod control;
pub mod dataflow;
pub mod fade;
pub mod fanout;
pub mod ffi;
pub mod id3;
pub mod latency;
pub mod ring;
pub mod smoothing;
pub mod strip;

#[cfg(test)]
mod tests;

pub use config::PipelineConfig;

const EVENT_LOG_CAPACITY: usize = 256;

static TRACING_INIT: Once = Once::new();

/// Install the fmt subscriber once per process. Later calls are no-ops, and an
/// already installed global subscriber is left alone.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Errors surfaced by the session and fan-out.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// Configuration rejected by [`PipelineConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Left and right inputs carried different frame counts.
    #[error("channel length mismatch: left {left} frames, right {right} frames")]
    ChannelMismatch {
        /// Frames on the left input.
        left: usize,
        /// Frames on the right input.
        right: usize,
    },
    /// A block larger than the consumer rings can ever hold.
    #[error("block of {frames} frames exceeds ring capacity of {capacity} frames")]
    BlockTooLarge {
        /// Frames in the block.
        frames: usize,
        /// Ring capacity in frames.
        capacity: usize,
    },
    /// Consumer identifier not registered with the session.
    #[error("unknown consumer id: {0}")]
    UnknownConsumer(u32),
    /// Ring storage could not be allocated.
    #[error("ring allocation failed: {0}")]
    Allocation(#[source] std::io::Error),
}

/// Per-consumer diagnostics exposed to control surfaces.
#[derive(Clone, Debug)]
pub struct ConsumerStatus {
    /// Consumer identifier.
    pub id: u32,
    /// Encoder or recorder.
    pub kind: ConsumerKind,
    /// Name given at registration.
    pub name: String,
    /// Dataflow state, `None` if an unknown raw value is stored.
    pub state: Option<DataflowControl>,
    /// Left ring fill (0-1).
    pub fill_left: f32,
    /// Right ring fill (0-1).
    pub fill_right: f32,
    /// Frames written since registration.
    pub frames_written: u64,
    /// Frames discarded by flushes.
    pub frames_flushed: u64,
    /// Blocks in which the fan-out waited for space.
    pub backpressure_waits: u64,
}

/// Aggregated session snapshot.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    /// Sample rate in Hertz.
    pub sample_rate: u32,
    /// Frames per audio block.
    pub block_frames: usize,
    /// Duration of one block in milliseconds.
    pub latency_ms: f32,
    /// Blocks distributed since creation.
    pub blocks_processed: u64,
    /// Whether the session still accepts audio.
    pub running: bool,
    /// Per-consumer diagnostics in service order.
    pub consumers: Vec<ConsumerStatus>,
}

/// Explicitly owned pipeline context: configuration, consumer registry and
/// run state. Shared between the audio callback and control threads by
/// reference or `Arc`.
pub struct StreamSession {
    config: PipelineConfig,
    fanout: FanOut,
    running: AtomicBool,
    blocks: AtomicU64,
    events: Mutex<VecDeque<String>>,
}

impl StreamSession {
    /// Validate `config` and create an empty session.
    pub fn new(config: PipelineConfig) -> Result<Self, StreamError> {
        init_tracing();
        config.validate()?;
        info!(
            sample_rate = config.sample_rate,
            block_frames = config.block_frames,
            "stream session created"
        );
        Ok(Self {
            fanout: FanOut::new(config.backpressure_quantum),
            config,
            running: AtomicBool::new(true),
            blocks: AtomicU64::new(0),
            events: Mutex::new(VecDeque::with_capacity(64)),
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Empty ID3 tag carrying the configured padding.
    pub fn id3_tag(&self) -> Id3Tag {
        Id3Tag::new(self.config.id3_padding)
    }

    /// Register a network encoder. Its rings start in the `Off` state.
    pub fn add_encoder(&self, name: &str) -> Result<Arc<ConsumerPort>, StreamError> {
        self.add_consumer(ConsumerKind::Encoder, name)
    }

    /// Register a file recorder. Its rings start in the `Off` state.
    pub fn add_recorder(&self, name: &str) -> Result<Arc<ConsumerPort>, StreamError> {
        self.add_consumer(ConsumerKind::Recorder, name)
    }

    fn add_consumer(
        &self,
        kind: ConsumerKind,
        name: &str,
    ) -> Result<Arc<ConsumerPort>, StreamError> {
        let port = self.fanout.register(
            kind,
            name,
            self.config.ring_capacity_frames,
            self.config.shared_rings,
        )?;
        info!(consumer = port.id().get(), %kind, name, "consumer registered");
        self.push_event(format!("{kind} {} registered as {}", name, port.id()));
        Ok(port)
    }

    /// Unregister a consumer.
    pub fn remove_consumer(&self, id: ConsumerId) -> Result<Arc<ConsumerPort>, StreamError> {
        let port = self
            .fanout
            .unregister(id)
            .ok_or(StreamError::UnknownConsumer(id.get()))?;
        self.push_event(format!("{} {} removed", port.kind(), port.name()));
        Ok(port)
    }

    /// Look up a consumer by identifier.
    pub fn consumer(&self, id: u32) -> Option<Arc<ConsumerPort>> {
        self.fanout.consumer(ConsumerId(id))
    }

    /// Change a consumer's dataflow state from a control thread.
    pub fn set_dataflow(&self, id: u32, state: DataflowControl) -> Result<(), StreamError> {
        let port = self.consumer(id).ok_or(StreamError::UnknownConsumer(id))?;
        port.set_state(state);
        self.push_event(format!("{} {} -> {state}", port.kind(), port.name()));
        Ok(())
    }

    /// Distribute one block of de-interleaved input. Returns frames handled.
    pub fn process(&self, left: &[f32], right: &[f32]) -> Result<usize, StreamError> {
        let capacity = self.config.ring_capacity_frames;
        if left.len() > capacity {
            return Err(StreamError::BlockTooLarge {
                frames: left.len(),
                capacity,
            });
        }
        let frames = self
            .fanout
            .process(left, right, || self.running.load(Ordering::Acquire))?;
        self.blocks.fetch_add(1, Ordering::Relaxed);
        Ok(frames)
    }

    /// Audio server entry point: 0 to continue, non-zero on error.
    pub fn audio_callback(&self, left: &[f32], right: &[f32]) -> i32 {
        match self.process(left, right) {
            Ok(_) => 0,
            Err(err) => {
                error!(%err, "audio callback failed");
                1
            }
        }
    }

    /// Whether the session still accepts audio.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop waiting on full rings and mark the session stopped.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            for port in self.fanout.snapshot().iter() {
                port.notify_space();
            }
            info!("stream session shut down");
            self.push_event("session shut down");
        }
    }

    /// Snapshot for control surfaces.
    pub fn status(&self) -> SessionStatus {
        let consumers = self
            .fanout
            .snapshot()
            .iter()
            .map(|port| ConsumerStatus {
                id: port.id().get(),
                kind: port.kind(),
                name: port.name().to_string(),
                state: port.state(),
                fill_left: port.left().fill_ratio(),
                fill_right: port.right().fill_ratio(),
                frames_written: port.frames_written(),
                frames_flushed: port.frames_flushed(),
                backpressure_waits: port.backpressure_waits(),
            })
            .collect();
        SessionStatus {
            sample_rate: self.config.sample_rate,
            block_frames: self.config.block_frames,
            latency_ms: self.config.block_period().as_secs_f32() * 1_000.0,
            blocks_processed: self.blocks.load(Ordering::Relaxed),
            running: self.is_running(),
            consumers,
        }
    }

    /// Record a control-path event for the console.
    pub fn push_event(&self, line: impl Into<String>) {
        let mut guard = self.events.lock();
        guard.push_back(line.into());
        while guard.len() > EVENT_LOG_CAPACITY {
            guard.pop_front();
        }
    }

    /// Most recent control-path events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<String> {
        let guard = self.events.lock();
        let skip = guard.len().saturating_sub(limit);
        guard.iter().skip(skip).cloned().collect()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
