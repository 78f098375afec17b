//! Block-rate smoothing of discrete mute and volume controls.
//!
//! Neither smoother locks. The control values are written by one external
//! owner and read racily here; a stale read only delays a ramp by a step.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

const REFERENCE_RATE: f32 = 44_100.0;
const MUTE_RISE: f32 = 0.0015;
const MUTE_FALL: f32 = 0.0005;
const MUTE_SNAP_HIGH: f32 = 0.01;
const MUTE_SNAP_LOW: f32 = 0.00002;

/// Tracking position that maps to unity gain.
pub const VOLUME_UNITY: u8 = 127;

/// Smooths an on/off control into a gain between 0 and 1.
pub struct MuteSmoother {
    level: f32,
    rate_factor: f32,
    control: Option<Arc<AtomicBool>>,
}

impl MuteSmoother {
    /// `control == None` means always on. The level starts at the control's
    /// current value.
    pub fn new(sample_rate: u32, control: Option<Arc<AtomicBool>>) -> Self {
        let on = control
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(true);
        Self {
            level: if on { 1.0 } else { 0.0 },
            rate_factor: REFERENCE_RATE / sample_rate.max(1) as f32,
            control,
        }
    }

    /// Current gain.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Advance one step. Called once per audio block.
    pub fn process(&mut self) -> f32 {
        let on = self
            .control
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(true);
        if on {
            if self.level < 1.0 - MUTE_SNAP_HIGH {
                let step = (MUTE_RISE * self.rate_factor).min(1.0);
                self.level += (1.0 - self.level) * step;
            } else {
                self.level = 1.0;
            }
        } else if self.level > MUTE_SNAP_LOW {
            let curve = (2.0 - self.level) * (2.0 - self.level);
            let step = (MUTE_FALL * self.rate_factor * curve).min(1.0);
            self.level -= self.level * step;
        } else {
            self.level = 0.0;
        }
        self.level
    }
}

/// Chases an integer volume control one step at a time on a log gain curve.
pub struct VolumeSmoother {
    level: f32,
    tracking: u8,
    scale: f32,
    control: Arc<AtomicU8>,
}

impl VolumeSmoother {
    /// `scale` is the base-10 exponent per step; `0.05 / 2.0` gives ~0.5 dB steps.
    pub fn new(control: Arc<AtomicU8>, scale: f32) -> Self {
        let tracking = control.load(Ordering::Relaxed);
        Self {
            level: volume_gain(tracking, scale),
            tracking,
            scale,
            control,
        }
    }

    /// Current linear gain.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Position currently applied.
    pub fn tracking(&self) -> u8 {
        self.tracking
    }

    /// Move one step toward the control value, recomputing the gain only on a
    /// step. Called once per audio block.
    pub fn process(&mut self) -> f32 {
        let target = self.control.load(Ordering::Relaxed);
        if self.tracking != target {
            if self.tracking < target {
                self.tracking += 1;
            } else {
                self.tracking -= 1;
            }
            self.level = volume_gain(self.tracking, self.scale);
        }
        self.level
    }
}

/// Gain for a tracking position: `10^((tracking - 127) * scale)`.
pub fn volume_gain(tracking: u8, scale: f32) -> f32 {
    10f32.powf((tracking as f32 - VOLUME_UNITY as f32) * scale)
}
