//! Sine generator and correlation probe for measuring the delay between what
//! enters the fan-out and what a consumer drains.

use dasp_signal::{ConstHz, Signal, Sine};

use crate::ring::monotonic_timestamp_ns;

/// Best-fit offset between a reference and a recording.
#[derive(Debug, Clone, Copy)]
pub struct LatencyReport {
    /// Offset in frames of the reference within the recording.
    pub offset_frames: usize,
    /// Offset converted to seconds.
    pub offset_seconds: f32,
    /// Normalized cross-correlation score (0.0 - 1.0).
    pub correlation: f32,
    /// Timestamp captured when the report was generated.
    pub measured_at_ns: u64,
}

/// Deterministic sine generator and latency estimator for one channel.
pub struct LatencyProbe {
    sample_rate: u32,
    signal: Sine<ConstHz>,
    reference: Vec<f32>,
}

impl LatencyProbe {
    /// Probe whose reference holds `window_frames` of a sine at `frequency`.
    pub fn new(sample_rate: u32, frequency: f32, window_frames: usize) -> Self {
        let mut reference = vec![0.0f32; window_frames];
        write_sine(&mut sine(sample_rate, frequency), &mut reference);
        Self {
            sample_rate,
            signal: sine(sample_rate, frequency),
            reference,
        }
    }

    /// Continue the sine into `out`, picking up where the previous call ended.
    pub fn emit(&mut self, out: &mut [f32]) {
        write_sine(&mut self.signal, out);
    }

    /// Reference waveform.
    pub fn reference(&self) -> &[f32] {
        &self.reference
    }

    /// Locate the reference inside `recorded`.
    pub fn measure(&self, recorded: &[f32]) -> LatencyReport {
        let window = self.reference.len();
        if recorded.len() < window || window == 0 {
            return LatencyReport {
                offset_frames: 0,
                offset_seconds: 0.0,
                correlation: 0.0,
                measured_at_ns: monotonic_timestamp_ns(),
            };
        }

        let reference_norm = energy(&self.reference);
        let mut best = (0usize, 0.0f32);
        for offset in 0..=(recorded.len() - window) {
            let corr = correlation(&self.reference, &recorded[offset..offset + window], reference_norm);
            if corr > best.1 {
                best = (offset, corr);
            }
        }

        LatencyReport {
            offset_frames: best.0,
            offset_seconds: best.0 as f32 / self.sample_rate as f32,
            correlation: best.1,
            measured_at_ns: monotonic_timestamp_ns(),
        }
    }
}

fn sine(sample_rate: u32, frequency: f32) -> Sine<ConstHz> {
    dasp_signal::rate(sample_rate as f64)
        .const_hz(frequency as f64)
        .sine()
}

fn write_sine(signal: &mut Sine<ConstHz>, out: &mut [f32]) {
    for sample in out.iter_mut() {
        *sample = (signal.next() * 0.5) as f32;
    }
}

fn correlation(reference: &[f32], recorded: &[f32], reference_norm: f64) -> f32 {
    let recorded_norm = energy(recorded);
    if reference_norm == 0.0 || recorded_norm == 0.0 {
        return 0.0;
    }
    (dot(reference, recorded) / (reference_norm * recorded_norm)) as f32
}

// Accumulate in f64 so neighbouring periods of a pure tone still rank correctly.
fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum()
}

fn energy(buf: &[f32]) -> f64 {
    buf.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt()
}
