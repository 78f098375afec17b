//! Exponential fade ramps driven once per audio block.
//!
//! A [`FadeController`] lives on the audio path and is advanced by
//! [`FadeController::get`]. Control threads schedule ramps through a
//! [`FadeHandle`]; the scheduled parameters are picked up on the next `get`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

/// Below this level a fade-out snaps to silence and stops.
pub const FADE_OUT_SNAP: f32 = 0.00002;

/// Level to jump to before a new ramp starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeStart {
    /// Jump to the floor level.
    Low,
    /// Continue from the current level.
    Same,
    /// Jump to full level.
    High,
}

/// Ramp direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeDirection {
    /// Toward full level.
    In,
    /// Toward silence.
    Out,
    /// Keep the previously scheduled direction.
    Unchanged,
}

#[derive(Clone, Copy, Debug)]
struct PendingFade {
    start: FadeStart,
    samples: u32,
    direction: FadeDirection,
}

struct FadeShared {
    sample_rate: u32,
    pending: Mutex<PendingFade>,
    has_pending: AtomicBool,
    level_bits: AtomicU32,
}

/// Control-side handle for scheduling fades. Cheap to clone.
#[derive(Clone)]
pub struct FadeHandle {
    shared: Arc<FadeShared>,
}

impl FadeHandle {
    /// Schedule a new ramp. A negative `seconds` keeps the current duration.
    ///
    /// Parameters overwrite any ramp scheduled but not yet picked up.
    pub fn set(&self, start: FadeStart, seconds: f32, direction: FadeDirection) {
        let mut pending = self.shared.pending.lock();
        pending.start = start;
        if seconds >= 0.0 {
            pending.samples = (seconds * self.shared.sample_rate as f32).round() as u32;
        }
        if direction != FadeDirection::Unchanged {
            pending.direction = direction;
        }
        self.shared.has_pending.store(true, Ordering::Release);
    }

    /// Level returned by the most recent `get`.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.shared.level_bits.load(Ordering::Relaxed))
    }
}

/// Audio-path fade state.
pub struct FadeController {
    shared: Arc<FadeShared>,
    floor: f32,
    level: f32,
    rate: f32,
    direction: FadeDirection,
    steps_left: u32,
    moving: bool,
}

impl FadeController {
    /// Start at full level with a fade-in from the floor already scheduled.
    pub fn new(sample_rate: u32, floor: f32, default_seconds: f32) -> Self {
        let samples = (default_seconds.max(0.0) * sample_rate as f32).round() as u32;
        let shared = Arc::new(FadeShared {
            sample_rate,
            pending: Mutex::new(PendingFade {
                start: FadeStart::Low,
                samples,
                direction: FadeDirection::In,
            }),
            has_pending: AtomicBool::new(true),
            level_bits: AtomicU32::new(1.0f32.to_bits()),
        });
        Self {
            shared,
            floor,
            level: 1.0,
            rate: 1.0,
            direction: FadeDirection::In,
            steps_left: 0,
            moving: false,
        }
    }

    /// Handle for scheduling ramps from other threads.
    pub fn handle(&self) -> FadeHandle {
        FadeHandle {
            shared: self.shared.clone(),
        }
    }

    /// Schedule a ramp from the owning thread.
    pub fn set(&self, start: FadeStart, seconds: f32, direction: FadeDirection) {
        self.handle().set(start, seconds, direction);
    }

    /// Whether a ramp is in progress.
    pub fn is_moving(&self) -> bool {
        self.moving
    }

    /// Current per-call multiplier.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Advance by one step and return the new level. Call once per block.
    pub fn get(&mut self) -> f32 {
        if self.shared.has_pending.load(Ordering::Acquire) {
            self.apply_pending();
        }
        if self.moving {
            self.level *= self.rate;
            self.steps_left = self.steps_left.saturating_sub(1);
            match self.direction {
                FadeDirection::Out => {
                    if self.level < FADE_OUT_SNAP {
                        self.level = 0.0;
                        self.moving = false;
                    }
                }
                _ => {
                    if self.level >= 1.0 || self.steps_left == 0 {
                        self.level = 1.0;
                        self.moving = false;
                    }
                }
            }
        }
        self.shared
            .level_bits
            .store(self.level.to_bits(), Ordering::Relaxed);
        self.level
    }

    fn apply_pending(&mut self) {
        let pending = {
            let guard = self.shared.pending.lock();
            self.shared.has_pending.store(false, Ordering::Release);
            *guard
        };
        match pending.start {
            FadeStart::Low => self.level = self.floor,
            FadeStart::High => self.level = 1.0,
            FadeStart::Same => {}
        }
        self.direction = pending.direction;
        if self.direction != FadeDirection::Out && self.level < self.floor {
            // A multiplicative ramp cannot leave true silence.
            self.level = self.floor;
        }
        let exponent = match self.direction {
            FadeDirection::Out => 1.0 / pending.samples as f32,
            _ => -1.0 / pending.samples as f32,
        };
        self.rate = self.floor.powf(exponent);
        self.steps_left = pending.samples;
        self.moving = true;
    }
}
