//! Gain stage combining fade, mute and volume ahead of the fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8};

use dasp_frame::{Frame, Stereo};

use crate::fade::{FadeController, FadeHandle};
use crate::smoothing::{MuteSmoother, VolumeSmoother};

/// Default step scale for the volume smoother, about 0.5 dB per position.
pub const DEFAULT_VOLUME_SCALE: f32 = 0.025;

/// Stereo channel strip. Fade, mute and volume each advance one step per
/// block, and the combined gain is applied to every frame of that block.
pub struct ChannelStrip {
    fade: FadeController,
    mute: MuteSmoother,
    volume: VolumeSmoother,
}

impl ChannelStrip {
    /// Assemble a strip from its controllers.
    pub fn new(fade: FadeController, mute: MuteSmoother, volume: VolumeSmoother) -> Self {
        Self { fade, mute, volume }
    }

    /// Strip with fresh controllers bound to the given control values.
    pub fn with_controls(
        sample_rate: u32,
        fade_floor: f32,
        fade_seconds: f32,
        mute_control: Option<Arc<AtomicBool>>,
        volume_control: Arc<AtomicU8>,
    ) -> Self {
        Self::new(
            FadeController::new(sample_rate, fade_floor, fade_seconds),
            MuteSmoother::new(sample_rate, mute_control),
            VolumeSmoother::new(volume_control, DEFAULT_VOLUME_SCALE),
        )
    }

    /// Handle for scheduling fades on this strip.
    pub fn fade_handle(&self) -> FadeHandle {
        self.fade.handle()
    }

    /// Scale a block in place. Returns the fade level used for the block.
    pub fn apply(&mut self, left: &mut [f32], right: &mut [f32]) -> f32 {
        let fade = self.fade.get();
        let gain = fade * self.mute.process() * self.volume.process();
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let frame: Stereo<f32> = [*l, *r];
            let [out_l, out_r] = frame.scale_amp(gain);
            *l = out_l;
            *r = out_r;
        }
        fade
    }

    /// Mute smoother level used for the last block.
    pub fn mute_level(&self) -> f32 {
        self.mute.level()
    }

    /// Volume smoother gain used for the last block.
    pub fn volume_level(&self) -> f32 {
        self.volume.level()
    }

    /// Volume tracking position used for the last block.
    pub fn volume_tracking(&self) -> u8 {
        self.volume.tracking()
    }
}
