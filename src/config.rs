//! Pipeline configuration.

use std::time::Duration;

use crate::StreamError;

/// Settings fixed for the lifetime of a [`StreamSession`](crate::StreamSession).
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Audio server sample rate in Hertz.
    pub sample_rate: u32,
    /// Frames delivered per audio callback.
    pub block_frames: usize,
    /// Per-channel ring capacity of every consumer, in frames.
    pub ring_capacity_frames: usize,
    /// Longest single sleep while the fan-out waits for ring space.
    pub backpressure_quantum: Duration,
    /// Level at which fades start and against which ramp rates are computed.
    pub fade_floor: f32,
    /// Fade duration used until a caller supplies one.
    pub fade_default_seconds: f32,
    /// Zero bytes appended after the frames of a compiled ID3 tag.
    pub id3_padding: usize,
    /// Back consumer rings with anonymous shared memory instead of the heap.
    pub shared_rings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_frames: 256,
            ring_capacity_frames: 16_384,
            backpressure_quantum: Duration::from_millis(10),
            fade_floor: 0.001,
            fade_default_seconds: 1.0,
            id3_padding: 0,
            shared_rings: false,
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.sample_rate == 0 {
            return Err(StreamError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.block_frames == 0 {
            return Err(StreamError::InvalidConfig("block size must be non-zero".into()));
        }
        if self.ring_capacity_frames < self.block_frames {
            return Err(StreamError::InvalidConfig(format!(
                "ring capacity {} frames is smaller than one block of {} frames",
                self.ring_capacity_frames, self.block_frames
            )));
        }
        if !(self.fade_floor > 0.0 && self.fade_floor < 1.0) {
            return Err(StreamError::InvalidConfig(format!(
                "fade floor {} outside (0, 1)",
                self.fade_floor
            )));
        }
        if self.backpressure_quantum.is_zero() {
            return Err(StreamError::InvalidConfig(
                "backpressure quantum must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Duration of one audio block.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }
}
