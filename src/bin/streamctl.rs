use std::env;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use broadcast_kit::control::api::LevelControls;
use broadcast_kit::dataflow::{ConsumerPort, DataflowControl};
use broadcast_kit::latency::LatencyProbe;
use broadcast_kit::smoothing::VOLUME_UNITY;
use broadcast_kit::strip::ChannelStrip;
use broadcast_kit::{PipelineConfig, StreamSession};

const PROBE_FREQUENCY: f32 = 440.0;
const DRAIN_INTERVAL: Duration = Duration::from_millis(5);

struct Options {
    status_only: bool,
    sample_rate: u32,
    encoders: usize,
    recorders: usize,
}

fn usage() -> &'static str {
    "Usage: streamctl [--status] [--sample-rate N] [--encoders N] [--recorders N]\n\n\
     Drives a synthetic sine source through the fan-out. Without --status the\n\
     interactive console launches."
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        status_only: false,
        sample_rate: PipelineConfig::default().sample_rate,
        encoders: 2,
        recorders: 1,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--status" | "-s" => options.status_only = true,
            "--sample-rate" => options.sample_rate = numeric(&arg, args.next())?,
            "--encoders" => options.encoders = numeric(&arg, args.next())?,
            "--recorders" => options.recorders = numeric(&arg, args.next())?,
            "--help" | "-h" => {
                println!("{}", usage());
                process::exit(0);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(options)
}

fn numeric<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, String> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| format!("{flag} expects a number"))
}

/// Synthetic audio server: one block per period through the strip and fan-out.
fn spawn_source(
    session: Arc<StreamSession>,
    mut strip: ChannelStrip,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let config = session.config().clone();
        let mut probe = LatencyProbe::new(config.sample_rate, PROBE_FREQUENCY, 0);
        let mut left = vec![0.0f32; config.block_frames];
        let mut right = vec![0.0f32; config.block_frames];
        let period = config.block_period();
        while session.is_running() {
            probe.emit(&mut left);
            right.copy_from_slice(&left);
            strip.apply(&mut left, &mut right);
            if session.audio_callback(&left, &right) != 0 {
                break;
            }
            thread::sleep(period);
        }
    })
}

/// Stand-in for an encoder or recorder worker that discards what it reads.
fn spawn_drain(session: Arc<StreamSession>, port: Arc<ConsumerPort>) -> JoinHandle<()> {
    thread::spawn(move || {
        let frames = session.config().block_frames * 4;
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        while session.is_running() {
            while port.read_frames(&mut left, &mut right) > 0 {}
            thread::sleep(DRAIN_INTERVAL);
        }
    })
}

fn print_status(session: &StreamSession) {
    let status = session.status();
    println!("Sample Rate : {} Hz", status.sample_rate);
    println!("Block Size  : {} frames", status.block_frames);
    println!("Block Time  : {:.2} ms", status.latency_ms);
    println!("Blocks      : {}", status.blocks_processed);
    println!("Consumers:");
    for consumer in status.consumers {
        println!(
            "  [{}] {} {} | state={} | fill={:.1}%/{:.1}% | written={} | flushed={} | waits={}",
            consumer.id,
            consumer.kind,
            consumer.name,
            consumer
                .state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "invalid".to_string()),
            consumer.fill_left * 100.0,
            consumer.fill_right * 100.0,
            consumer.frames_written,
            consumer.frames_flushed,
            consumer.backpressure_waits,
        );
    }
}

fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig {
        sample_rate: options.sample_rate,
        ..PipelineConfig::default()
    };
    let session = Arc::new(StreamSession::new(config.clone())?);

    let mut ports = Vec::new();
    for n in 0..options.encoders {
        ports.push(session.add_encoder(&format!("encoder {}", n + 1))?);
    }
    for n in 0..options.recorders {
        ports.push(session.add_recorder(&format!("recorder {}", n + 1))?);
    }

    let audible = Arc::new(AtomicBool::new(true));
    let volume = Arc::new(AtomicU8::new(VOLUME_UNITY));
    let strip = ChannelStrip::with_controls(
        config.sample_rate,
        config.fade_floor,
        config.fade_default_seconds,
        Some(audible.clone()),
        volume.clone(),
    );
    let levels = LevelControls::new(strip.fade_handle(), audible, volume);

    let mut workers = vec![spawn_source(session.clone(), strip)];
    for port in &ports {
        workers.push(spawn_drain(session.clone(), port.clone()));
    }

    let result = if options.status_only {
        for port in &ports {
            port.set_state(DataflowControl::On);
        }
        thread::sleep(Duration::from_millis(500));
        print_status(&session);
        Ok(())
    } else {
        broadcast_kit::control::ui::run(session.clone(), levels)
    };

    session.shutdown();
    for worker in workers {
        let _ = worker.join();
    }
    result
}

fn main() {
    let options = match parse_args() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("streamctl: {err}\n\n{}", usage());
            process::exit(1);
        }
    };
    if let Err(err) = run(options) {
        eprintln!("streamctl: {err}");
        process::exit(1);
    }
}
