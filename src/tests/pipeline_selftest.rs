use std::sync::Arc;
use std::sync::atomic::AtomicU8;

use crate::dataflow::DataflowControl;
use crate::latency::LatencyProbe;
use crate::smoothing::VOLUME_UNITY;
use crate::strip::ChannelStrip;
use crate::{PipelineConfig, StreamSession};

#[test]
fn sine_reaches_consumer_without_delay_or_loss() {
    let config = PipelineConfig {
        sample_rate: 48_000,
        block_frames: 128,
        ring_capacity_frames: 4_096,
        ..PipelineConfig::default()
    };
    let session = StreamSession::new(config.clone()).expect("session");
    let encoder = session.add_encoder("selftest").expect("encoder");
    encoder.set_state(DataflowControl::On);

    let mut strip = ChannelStrip::with_controls(
        config.sample_rate,
        config.fade_floor,
        0.0,
        None,
        Arc::new(AtomicU8::new(VOLUME_UNITY)),
    );

    let mut source = LatencyProbe::new(config.sample_rate, 440.0, 0);
    let analyser = LatencyProbe::new(config.sample_rate, 440.0, 1_024);

    let total_frames = 1_536;
    let mut input = Vec::with_capacity(total_frames);
    let mut recorded_left = Vec::with_capacity(total_frames);
    let mut recorded_right = Vec::with_capacity(total_frames);
    let mut left = vec![0.0f32; config.block_frames];
    let mut right = vec![0.0f32; config.block_frames];
    let mut drain_l = vec![0.0f32; config.block_frames];
    let mut drain_r = vec![0.0f32; config.block_frames];

    while input.len() < total_frames {
        source.emit(&mut left);
        right.copy_from_slice(&left);
        input.extend_from_slice(&left);
        strip.apply(&mut left, &mut right);
        assert_eq!(session.audio_callback(&left, &right), 0);

        let got = encoder.read_frames(&mut drain_l, &mut drain_r);
        assert_eq!(got, config.block_frames);
        recorded_left.extend_from_slice(&drain_l[..got]);
        recorded_right.extend_from_slice(&drain_r[..got]);
    }

    assert_eq!(recorded_left, input);
    assert_eq!(recorded_right, input);

    let report = analyser.measure(&recorded_left);
    assert_eq!(report.offset_frames, 0);
    assert!(report.correlation > 0.999, "correlation {}", report.correlation);
}

#[test]
fn probe_finds_inserted_delay() {
    let probe = LatencyProbe::new(48_000, 440.0, 512);
    let mut recorded = vec![0.0f32; 64];
    recorded.extend_from_slice(probe.reference());
    recorded.extend(std::iter::repeat(0.0).take(256));

    let report = probe.measure(&recorded);
    assert_eq!(report.offset_frames, 64);
    assert!(report.correlation > 0.999);
    assert!((report.offset_seconds - 64.0 / 48_000.0).abs() < 1e-6);
}
