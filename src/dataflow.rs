//! Per-consumer dataflow state and the ring pair the fan-out writes into.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::ring::SharedRingBuffer;

/// Size of one sample as stored in the rings.
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Controls whether the fan-out feeds a consumer.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataflowControl {
    /// No audio accepted.
    Off = 0,
    /// Audio is written into the consumer's rings every block.
    On = 1,
    /// Buffered audio is discarded on the next block, then the state becomes `Off`.
    Flush = 2,
}

impl DataflowControl {
    /// Decode a raw state value. Unknown values yield `None`.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            2 => Some(Self::Flush),
            _ => None,
        }
    }
}

impl fmt::Display for DataflowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Flush => "flush",
        };
        f.write_str(label)
    }
}

/// Which side of the application a consumer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerKind {
    /// Network stream encoder.
    Encoder,
    /// File recorder.
    Recorder,
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoder => f.write_str("encoder"),
            Self::Recorder => f.write_str("recorder"),
        }
    }
}

/// Identifier of a registered consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub(crate) u32);

impl ConsumerId {
    /// Numeric value of the identifier.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Encoder or recorder endpoint: a dataflow flag plus one ring per channel.
///
/// The fan-out is the only producer. Exactly one worker thread may call
/// [`read_frames`](Self::read_frames).
pub struct ConsumerPort {
    id: ConsumerId,
    kind: ConsumerKind,
    name: String,
    state: AtomicU8,
    left: SharedRingBuffer,
    right: SharedRingBuffer,
    space_lock: Mutex<()>,
    space_freed: Condvar,
    frames_written: AtomicU64,
    frames_flushed: AtomicU64,
    backpressure_waits: AtomicU64,
}

impl ConsumerPort {
    pub(crate) fn new(
        id: ConsumerId,
        kind: ConsumerKind,
        name: String,
        left: SharedRingBuffer,
        right: SharedRingBuffer,
    ) -> Self {
        Self {
            id,
            kind,
            name,
            state: AtomicU8::new(DataflowControl::Off as u8),
            left,
            right,
            space_lock: Mutex::new(()),
            space_freed: Condvar::new(),
            frames_written: AtomicU64::new(0),
            frames_flushed: AtomicU64::new(0),
            backpressure_waits: AtomicU64::new(0),
        }
    }

    /// Consumer identifier.
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Encoder or recorder.
    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }

    /// Name given at registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, or `None` if the stored value is not a known state.
    pub fn state(&self) -> Option<DataflowControl> {
        DataflowControl::from_raw(self.raw_state())
    }

    pub(crate) fn raw_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Change the dataflow state. Wakes a producer blocked on backpressure.
    pub fn set_state(&self, state: DataflowControl) {
        self.state.store(state as u8, Ordering::Release);
        self.notify_space();
    }

    /// Store an unchecked state value, as a foreign controller would.
    pub fn set_raw_state(&self, raw: u8) {
        self.state.store(raw, Ordering::Release);
    }

    pub(crate) fn force_off(&self) {
        self.state
            .store(DataflowControl::Off as u8, Ordering::Release);
    }

    /// Left channel ring.
    pub fn left(&self) -> &SharedRingBuffer {
        &self.left
    }

    /// Right channel ring.
    pub fn right(&self) -> &SharedRingBuffer {
        &self.right
    }

    /// Whole frames currently readable on both channels.
    pub fn frames_available(&self) -> usize {
        self.left.available_read().min(self.right.available_read()) / SAMPLE_BYTES
    }

    /// Drain up to `left.len().min(right.len())` frames from both rings.
    ///
    /// Returns the number of frames copied into each slice.
    pub fn read_frames(&self, left: &mut [f32], right: &mut [f32]) -> usize {
        let frames = left.len().min(right.len()).min(self.frames_available());
        if frames == 0 {
            return 0;
        }
        let got_left = self
            .left
            .pop(bytemuck::cast_slice_mut(&mut left[..frames]));
        let got_right = self
            .right
            .pop(bytemuck::cast_slice_mut(&mut right[..frames]));
        self.notify_space();
        // A flush racing the two pops leaves the channels unequal; only the
        // common prefix is reported.
        got_left.min(got_right) / SAMPLE_BYTES
    }

    /// Wake a producer waiting for ring space.
    pub fn notify_space(&self) {
        let _guard = self.space_lock.lock();
        self.space_freed.notify_all();
    }

    /// Block until the right ring has room for `bytes`, the state leaves
    /// `On`, or `keep_waiting` returns false. Each wait lasts at most `quantum`.
    pub(crate) fn wait_for_space(
        &self,
        bytes: usize,
        quantum: Duration,
        keep_waiting: impl Fn() -> bool,
    ) -> bool {
        let mut waited = false;
        loop {
            if self.right.write_space() >= bytes {
                return true;
            }
            if self.raw_state() != DataflowControl::On as u8 || !keep_waiting() {
                return false;
            }
            if !waited {
                self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
                waited = true;
            }
            let mut guard = self.space_lock.lock();
            if self.right.write_space() >= bytes {
                return true;
            }
            self.space_freed.wait_for(&mut guard, quantum);
        }
    }

    pub(crate) fn record_written(&self, frames: usize) {
        self.frames_written
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_flushed(&self, frames: usize) {
        self.frames_flushed
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Frames written by the fan-out since registration.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Frames discarded by flushes since registration.
    pub fn frames_flushed(&self) -> u64 {
        self.frames_flushed.load(Ordering::Relaxed)
    }

    /// Number of blocks in which the fan-out had to wait for space.
    pub fn backpressure_waits(&self) -> u64 {
        self.backpressure_waits.load(Ordering::Relaxed)
    }
}
