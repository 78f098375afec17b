use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::dataflow::DataflowControl;
use crate::fade::{FadeDirection, FadeHandle, FadeStart};
use crate::{SessionStatus, StreamSession};

/// Fetch a status snapshot of the session.
pub fn get_status(session: &StreamSession) -> SessionStatus {
    session.status()
}

/// Switch a consumer between `On` and `Off`. Returns the new state.
pub fn toggle_dataflow(session: &StreamSession, consumer_id: u32) -> Option<DataflowControl> {
    let port = session.consumer(consumer_id)?;
    let next = match port.state() {
        Some(DataflowControl::On) => DataflowControl::Off,
        _ => DataflowControl::On,
    };
    session.set_dataflow(consumer_id, next).ok()?;
    Some(next)
}

/// Request a flush of a consumer's buffered audio.
pub fn flush(session: &StreamSession, consumer_id: u32) -> bool {
    session
        .set_dataflow(consumer_id, DataflowControl::Flush)
        .is_ok()
}

/// Snapshot of the level controls.
#[derive(Clone, Copy, Debug)]
pub struct LevelStatus {
    /// Fade level reported by the last block.
    pub fade: f32,
    /// Whether the strip is audible.
    pub audible: bool,
    /// Volume control position, 127 is unity.
    pub volume: u8,
}

/// Control-thread side of a channel strip.
#[derive(Clone)]
pub struct LevelControls {
    fade: FadeHandle,
    audible: Arc<AtomicBool>,
    volume: Arc<AtomicU8>,
}

impl LevelControls {
    /// Bundle the controls that feed a strip.
    pub fn new(fade: FadeHandle, audible: Arc<AtomicBool>, volume: Arc<AtomicU8>) -> Self {
        Self {
            fade,
            audible,
            volume,
        }
    }

    /// Fade in from the floor over `seconds`.
    pub fn fade_in(&self, seconds: f32) {
        self.fade.set(FadeStart::Low, seconds, FadeDirection::In);
    }

    /// Fade out from the current level over `seconds`.
    pub fn fade_out(&self, seconds: f32) {
        self.fade.set(FadeStart::Same, seconds, FadeDirection::Out);
    }

    /// Flip the audible flag. Returns the new value.
    pub fn toggle_audible(&self) -> bool {
        !self.audible.fetch_xor(true, Ordering::Relaxed)
    }

    /// Move the volume position by `delta`, saturating. Returns the new position.
    pub fn nudge_volume(&self, delta: i16) -> u8 {
        let current = self.volume.load(Ordering::Relaxed) as i16;
        let next = (current + delta).clamp(0, u8::MAX as i16) as u8;
        self.volume.store(next, Ordering::Relaxed);
        next
    }

    /// Current control values.
    pub fn status(&self) -> LevelStatus {
        LevelStatus {
            fade: self.fade.level(),
            audible: self.audible.load(Ordering::Relaxed),
            volume: self.volume.load(Ordering::Relaxed),
        }
    }
}
