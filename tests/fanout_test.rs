use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use broadcast_kit::dataflow::{ConsumerKind, DataflowControl};
use broadcast_kit::ffi::{
    STATUS_INVALID_ARGUMENT, broadcast_session_add_consumer, broadcast_session_free,
    broadcast_session_new, broadcast_session_process, broadcast_session_set_dataflow,
};
use broadcast_kit::{PipelineConfig, StreamError, StreamSession};

const BLOCK: usize = 4;

fn small_config() -> PipelineConfig {
    PipelineConfig {
        sample_rate: 8_000,
        block_frames: BLOCK,
        ring_capacity_frames: 2 * BLOCK,
        backpressure_quantum: Duration::from_millis(5),
        ..PipelineConfig::default()
    }
}

fn block(start: usize) -> (Vec<f32>, Vec<f32>) {
    let left = (start..start + BLOCK).map(|i| i as f32).collect();
    let right = (start..start + BLOCK).map(|i| -(i as f32)).collect();
    (left, right)
}

#[test]
fn on_consumer_receives_blocks_in_order() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("icecast").unwrap();
    session.set_dataflow(port.id().get(), DataflowControl::On).unwrap();

    for n in 0..2 {
        let (left, right) = block(n * BLOCK);
        assert_eq!(session.process(&left, &right).unwrap(), BLOCK);
    }

    let mut left = [0.0f32; 2 * BLOCK];
    let mut right = [0.0f32; 2 * BLOCK];
    assert_eq!(port.read_frames(&mut left, &mut right), 2 * BLOCK);
    for i in 0..2 * BLOCK {
        assert_eq!(left[i], i as f32);
        assert_eq!(right[i], -(i as f32));
    }
    assert_eq!(port.frames_written(), 2 * BLOCK as u64);
    assert_eq!(port.left().last_timestamp_ns(), port.right().last_timestamp_ns());
    assert_eq!(session.status().blocks_processed, 2);
}

#[test]
fn off_consumer_is_untouched() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_recorder("archive").unwrap();
    assert_eq!(port.state(), Some(DataflowControl::Off));

    let (left, right) = block(0);
    session.process(&left, &right).unwrap();
    assert_eq!(port.frames_available(), 0);
    assert_eq!(port.frames_written(), 0);
}

#[test]
fn flush_discards_buffered_audio_then_turns_off() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("stream").unwrap();
    let id = port.id().get();
    session.set_dataflow(id, DataflowControl::On).unwrap();

    let (left, right) = block(0);
    session.process(&left, &right).unwrap();
    assert_eq!(port.frames_available(), BLOCK);

    session.set_dataflow(id, DataflowControl::Flush).unwrap();
    let (left, right) = block(BLOCK);
    session.process(&left, &right).unwrap();
    assert_eq!(port.frames_available(), 0);
    assert_eq!(port.frames_flushed(), BLOCK as u64);
    assert_eq!(port.state(), Some(DataflowControl::Off));

    session.process(&left, &right).unwrap();
    assert_eq!(port.frames_available(), 0);
    assert_eq!(port.frames_written(), BLOCK as u64);
}

#[test]
fn unknown_raw_state_is_a_no_op() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("odd").unwrap();
    port.set_raw_state(7);
    assert_eq!(port.state(), None);

    let (left, right) = block(0);
    assert_eq!(session.audio_callback(&left, &right), 0);
    assert_eq!(port.frames_available(), 0);
    assert_eq!(session.status().consumers[0].state, None);
}

#[test]
fn consumers_are_serviced_in_registration_order() {
    let session = StreamSession::new(small_config()).unwrap();
    let recorder = session.add_recorder("disk").unwrap();
    let first = session.add_encoder("first").unwrap();
    let second = session.add_encoder("second").unwrap();

    let order: Vec<u32> = session.status().consumers.iter().map(|c| c.id).collect();
    assert_eq!(order, vec![recorder.id().get(), first.id().get(), second.id().get()]);
    assert_eq!(session.status().consumers[0].kind, ConsumerKind::Recorder);
}

#[test]
fn full_ring_blocks_until_the_consumer_drains() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("slow").unwrap();
    port.set_state(DataflowControl::On);

    for n in 0..2 {
        let (left, right) = block(n * BLOCK);
        session.process(&left, &right).unwrap();
    }
    assert_eq!(port.right().write_space(), 0);

    let reader = {
        let port = Arc::clone(&port);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut left = [0.0f32; BLOCK];
            let mut right = [0.0f32; BLOCK];
            assert_eq!(port.read_frames(&mut left, &mut right), BLOCK);
            left
        })
    };

    let (left, right) = block(2 * BLOCK);
    session.process(&left, &right).unwrap();
    let drained = reader.join().unwrap();
    assert_eq!(drained, [0.0, 1.0, 2.0, 3.0]);
    assert!(port.backpressure_waits() >= 1);

    let mut left = [0.0f32; 2 * BLOCK];
    let mut right = [0.0f32; 2 * BLOCK];
    assert_eq!(port.read_frames(&mut left, &mut right), 2 * BLOCK);
    let expected: Vec<f32> = (BLOCK..3 * BLOCK).map(|i| i as f32).collect();
    assert_eq!(left.to_vec(), expected);
}

#[test]
fn state_change_releases_a_blocked_producer() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("stalled").unwrap();
    port.set_state(DataflowControl::On);
    for n in 0..2 {
        let (left, right) = block(n * BLOCK);
        session.process(&left, &right).unwrap();
    }

    let controller = {
        let port = Arc::clone(&port);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            port.set_state(DataflowControl::Off);
        })
    };

    let (left, right) = block(2 * BLOCK);
    assert_eq!(session.process(&left, &right).unwrap(), BLOCK);
    controller.join().unwrap();
    assert_eq!(port.frames_written(), 2 * BLOCK as u64);
    assert_eq!(port.frames_available(), 2 * BLOCK);
}

#[test]
fn shutdown_releases_a_blocked_producer() {
    let session = Arc::new(StreamSession::new(small_config()).unwrap());
    let port = session.add_encoder("stalled").unwrap();
    port.set_state(DataflowControl::On);
    for n in 0..2 {
        let (left, right) = block(n * BLOCK);
        session.process(&left, &right).unwrap();
    }

    let stopper = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            session.shutdown();
        })
    };

    let (left, right) = block(2 * BLOCK);
    session.process(&left, &right).unwrap();
    stopper.join().unwrap();
    assert!(!session.is_running());
    assert_eq!(port.frames_written(), 2 * BLOCK as u64);
}

#[test]
fn control_calls_do_not_wait_on_a_blocked_producer() {
    let session = Arc::new(StreamSession::new(small_config()).unwrap());
    let port = session.add_encoder("stalled").unwrap();
    let id = port.id().get();
    port.set_state(DataflowControl::On);
    for n in 0..2 {
        let (left, right) = block(n * BLOCK);
        session.process(&left, &right).unwrap();
    }

    let (done_tx, done_rx) = crossbeam_channel::unbounded();
    let producer = {
        let session = Arc::clone(&session);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let (left, right) = block(2 * BLOCK);
            session.process(&left, &right).unwrap();
            done_tx.send("producer").unwrap();
        })
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while port.backpressure_waits() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(port.backpressure_waits(), 1);

    let registrar = {
        let session = Arc::clone(&session);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            session.add_recorder("late").unwrap();
            done_tx.send("registrar").unwrap();
        })
    };
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok("registrar"));

    let controller = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            session.set_dataflow(id, DataflowControl::Flush).unwrap();
            done_tx.send("controller").unwrap();
        })
    };
    let mut finished = vec![
        done_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        done_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
    ];
    finished.sort_unstable();
    assert_eq!(finished, vec!["controller", "producer"]);

    producer.join().unwrap();
    registrar.join().unwrap();
    controller.join().unwrap();
    assert_eq!(session.status().consumers.len(), 2);
    assert_eq!(port.frames_written(), 2 * BLOCK as u64);

    let (left, right) = block(3 * BLOCK);
    session.process(&left, &right).unwrap();
    assert_eq!(port.frames_available(), 0);
    assert_eq!(port.state(), Some(DataflowControl::Off));
}

#[test]
fn short_ring_write_is_not_counted() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("lopsided").unwrap();
    port.set_state(DataflowControl::On);
    for n in 0..2 {
        let (left, right) = block(n * BLOCK);
        session.process(&left, &right).unwrap();
    }

    // Drain only the right channel so the left ring stays full.
    let mut scratch = [0u8; BLOCK * 4];
    assert_eq!(port.right().pop(&mut scratch), BLOCK * 4);

    let (left, right) = block(2 * BLOCK);
    assert_eq!(session.audio_callback(&left, &right), 0);
    assert_eq!(port.frames_written(), 2 * BLOCK as u64);
    assert_eq!(port.left().available_read(), 2 * BLOCK * 4);
    assert_eq!(port.right().available_read(), 2 * BLOCK * 4);
}

#[test]
fn malformed_blocks_are_rejected() {
    let session = StreamSession::new(small_config()).unwrap();
    assert!(matches!(
        session.process(&[0.0; 4], &[0.0; 3]),
        Err(StreamError::ChannelMismatch { left: 4, right: 3 })
    ));
    let oversized = vec![0.0f32; 2 * BLOCK + 1];
    assert!(matches!(
        session.process(&oversized, &oversized),
        Err(StreamError::BlockTooLarge { frames: 9, capacity: 8 })
    ));
    assert_ne!(session.audio_callback(&[0.0; 4], &[0.0; 3]), 0);
    assert_eq!(session.process(&[], &[]).unwrap(), 0);
}

#[test]
fn consumers_can_be_removed() {
    let session = StreamSession::new(small_config()).unwrap();
    let port = session.add_encoder("gone").unwrap();
    let id = port.id();
    session.remove_consumer(id).unwrap();
    assert!(session.consumer(id.get()).is_none());
    assert!(matches!(
        session.set_dataflow(id.get(), DataflowControl::On),
        Err(StreamError::UnknownConsumer(_))
    ));
    assert!(session.remove_consumer(id).is_err());
}

#[test]
fn invalid_configurations_are_rejected() {
    let cases = [
        PipelineConfig {
            sample_rate: 0,
            ..PipelineConfig::default()
        },
        PipelineConfig {
            block_frames: 0,
            ..PipelineConfig::default()
        },
        PipelineConfig {
            ring_capacity_frames: 128,
            block_frames: 256,
            ..PipelineConfig::default()
        },
        PipelineConfig {
            fade_floor: 1.0,
            ..PipelineConfig::default()
        },
        PipelineConfig {
            backpressure_quantum: Duration::ZERO,
            ..PipelineConfig::default()
        },
    ];
    for config in cases {
        assert!(matches!(
            StreamSession::new(config),
            Err(StreamError::InvalidConfig(_))
        ));
    }
}

#[test]
fn shared_memory_rings_carry_audio() {
    let config = PipelineConfig {
        shared_rings: true,
        ..small_config()
    };
    let session = StreamSession::new(config).unwrap();
    let port = session.add_recorder("mmap").unwrap();
    assert!(port.left().is_shared());
    port.set_state(DataflowControl::On);

    let (left, right) = block(0);
    session.process(&left, &right).unwrap();
    let mut out_left = [0.0f32; BLOCK];
    let mut out_right = [0.0f32; BLOCK];
    assert_eq!(port.read_frames(&mut out_left, &mut out_right), BLOCK);
    assert_eq!(out_left.to_vec(), left);
    assert_eq!(out_right.to_vec(), right);
}

#[test]
fn session_tags_use_configured_padding() {
    let config = PipelineConfig {
        id3_padding: 16,
        ..small_config()
    };
    let session = StreamSession::new(config).unwrap();
    let tag = session.id3_tag();
    assert_eq!(tag.compile().unwrap().len(), 10 + 16);
}

#[test]
fn c_abi_drives_a_session() {
    let handle = broadcast_session_new(48_000, 64);
    assert!(!handle.is_null());
    assert!(broadcast_session_new(0, 64).is_null());

    unsafe {
        let id = broadcast_session_add_consumer(handle, 0);
        assert_ne!(id, 0);
        assert!(broadcast_session_set_dataflow(handle, id, 1));
        assert!(!broadcast_session_set_dataflow(handle, id + 100, 1));

        let left = vec![0.25f32; 64];
        let right = vec![-0.25f32; 64];
        assert_eq!(
            broadcast_session_process(handle, left.as_ptr(), right.as_ptr(), 64),
            0
        );
        assert_eq!(
            broadcast_session_process(handle, std::ptr::null(), right.as_ptr(), 64),
            STATUS_INVALID_ARGUMENT
        );
        assert_eq!(
            broadcast_session_process(std::ptr::null(), left.as_ptr(), right.as_ptr(), 64),
            STATUS_INVALID_ARGUMENT
        );

        let port = (*handle).consumer(id).unwrap();
        assert_eq!(port.frames_available(), 64);
        drop(port);

        broadcast_session_free(handle);
    }
}
