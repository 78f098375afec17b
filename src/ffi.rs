//! C ABI for audio servers that drive the session from a native callback.

use std::os::raw::c_int;
use std::ptr;
use std::slice;

use tracing::warn;

use crate::{PipelineConfig, StreamSession, init_tracing};

/// Returned by [`broadcast_session_process`] when the handle or buffers are null.
pub const STATUS_INVALID_ARGUMENT: c_int = -1;

/// Create a session with default settings for the given rate and block size.
/// Returns null if the settings are rejected.
#[unsafe(no_mangle)]
pub extern "C" fn broadcast_session_new(sample_rate: u32, block_frames: u32) -> *mut StreamSession {
    init_tracing();
    let config = PipelineConfig {
        sample_rate,
        block_frames: block_frames as usize,
        ring_capacity_frames: PipelineConfig::default()
            .ring_capacity_frames
            .max(block_frames as usize * 4),
        ..PipelineConfig::default()
    };
    match StreamSession::new(config) {
        Ok(session) => Box::into_raw(Box::new(session)),
        Err(err) => {
            warn!(%err, "broadcast_session_new rejected settings");
            ptr::null_mut()
        }
    }
}

/// Destroy a session created by [`broadcast_session_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn broadcast_session_free(handle: *mut StreamSession) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Register a consumer. `kind` 0 is an encoder, anything else a recorder.
/// Returns the consumer id, or 0 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn broadcast_session_add_consumer(
    handle: *const StreamSession,
    kind: u8,
) -> u32 {
    let Some(session) = (unsafe { handle.as_ref() }) else {
        return 0;
    };
    let result = if kind == 0 {
        session.add_encoder("ffi encoder")
    } else {
        session.add_recorder("ffi recorder")
    };
    match result {
        Ok(port) => port.id().get(),
        Err(err) => {
            warn!(%err, "broadcast_session_add_consumer failed");
            0
        }
    }
}

/// Store a raw dataflow value (0 off, 1 on, 2 flush) for a consumer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn broadcast_session_set_dataflow(
    handle: *const StreamSession,
    consumer_id: u32,
    state: u8,
) -> bool {
    let Some(session) = (unsafe { handle.as_ref() }) else {
        return false;
    };
    match session.consumer(consumer_id) {
        Some(port) => {
            port.set_raw_state(state);
            port.notify_space();
            true
        }
        None => false,
    }
}

/// Per-block callback: `n_frames` samples on each of `left` and `right`.
/// Returns 0 to continue.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn broadcast_session_process(
    handle: *const StreamSession,
    left: *const f32,
    right: *const f32,
    n_frames: u32,
) -> c_int {
    let Some(session) = (unsafe { handle.as_ref() }) else {
        return STATUS_INVALID_ARGUMENT;
    };
    if n_frames == 0 {
        return 0;
    }
    if left.is_null() || right.is_null() {
        return STATUS_INVALID_ARGUMENT;
    }
    let (left, right) = unsafe {
        (
            slice::from_raw_parts(left, n_frames as usize),
            slice::from_raw_parts(right, n_frames as usize),
        )
    };
    session.audio_callback(left, right)
}
