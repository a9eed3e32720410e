use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Result;

use speechpipe::audio::convert::read_wav;
use speechpipe::audio::vad::{VadProcessor, VoiceActivityDetector};
use speechpipe::config::Config;
use speechpipe::speech::models::ModelLoader;
use speechpipe::speech::EventType;
use speechpipe::worker::messages::{WorkerEvent, WorkerMessage};
use speechpipe::worker::spawn_worker;
use speechpipe::{SpeechEvent, SpeechPipeline};

/// Samples handed to the pipeline per push, roughly a capture callback's worth.
const FEED_CHUNK: usize = 4096;

/// Runs the configured pipeline over a WAV file, printing events to stdout.
pub fn run_file(config: Config, input: &Path, loader: Arc<dyn ModelLoader>) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        shutdown_ctrlc.store(true, Ordering::Relaxed);
    })?;

    let stdout = std::io::stdout();
    let events = run_pipeline(config, input, loader, &mut stdout.lock(), &shutdown)?;
    tracing::info!(events = events.len(), "done");
    Ok(())
}

/// Feeds `input` through a pipeline, writing each event as a JSON line.
/// Stops early once `shutdown` is set.
pub fn run_pipeline(
    config: Config,
    input: &Path,
    loader: Arc<dyn ModelLoader>,
    out: &mut impl Write,
    shutdown: &AtomicBool,
) -> Result<Vec<SpeechEvent>> {
    let (samples, sample_rate) = read_wav(input)?;
    let pipeline = SpeechPipeline::new(config, sample_rate)?;
    tracing::info!(stages = ?pipeline.stages(), input = %input.display(), "running pipeline");
    let mut handle = pipeline.start(loader)?;

    let mut events = Vec::new();
    for chunk in samples.chunks(FEED_CHUNK) {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("stopping early");
            break;
        }
        handle.push_samples(chunk)?;
        for event in handle.try_events() {
            write_event(out, &event)?;
            events.push(event);
        }
        if handle.is_halted() {
            break;
        }
    }
    if !handle.is_halted() {
        handle.flush()?;
    }

    for event in handle.stop()? {
        write_event(out, &event)?;
        events.push(event);
    }
    Ok(events)
}

fn write_event(out: &mut impl Write, event: &SpeechEvent) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(event)?)?;
    Ok(())
}

/// A VAD state change at a point in the input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadChange {
    pub seconds: f32,
    pub active: bool,
}

/// Runs calibration and the VAD over a WAV file, printing each change.
pub fn vad_file(config: &Config, input: &Path, out: &mut impl Write) -> Result<Vec<VadChange>> {
    let (samples, sample_rate) = read_wav(input)?;
    if sample_rate != config.speech.sample_rate {
        return Err(speechpipe::SpeechError::UnsupportedSampleRate {
            requested: config.speech.sample_rate,
            actual: sample_rate,
        }
        .into());
    }

    let frame_size = config.speech.frame_size;
    let mut vad = VoiceActivityDetector::new(&config.vad, config.speech.fft_width, sample_rate);
    vad.connect(frame_size);
    let calibration = vad.calibration_frames();

    let mut changes = Vec::new();
    for (index, frame) in samples.chunks_exact(frame_size).enumerate() {
        if index < calibration {
            vad.observe_noise(frame)?;
            if index + 1 == calibration {
                vad.finish_calibration();
                writeln!(out, "calibrated: noise floor {:.3}", vad.base_level())?;
            }
            continue;
        }
        let status = vad.process(frame)?;
        if status.changed {
            let change = VadChange {
                seconds: (index * frame_size) as f32 / sample_rate as f32,
                active: status.active,
            };
            writeln!(
                out,
                "{:>8.3}s  {}  level {:.2}",
                change.seconds,
                if change.active { "active  " } else { "inactive" },
                vad.level()
            )?;
            changes.push(change);
        }
    }
    Ok(changes)
}

/// Bridges the JSON worker protocol to a worker thread, one message per line.
/// At end of input, waits for a pending initialization to settle and for the
/// worker to drain its queue before returning.
pub fn run_worker_stdio(
    input: impl BufRead,
    out: &mut impl Write,
    loader: Arc<dyn ModelLoader>,
) -> Result<()> {
    let (events_tx, events) = mpsc::channel();
    let worker = spawn_worker(loader, events_tx)?;
    let mut config_sent = false;
    let mut awaiting_init = false;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerMessage>(&line) {
            Ok(message) => {
                // the worker answers only the first config
                if !config_sent && matches!(message, WorkerMessage::Config { .. }) {
                    config_sent = true;
                    awaiting_init = true;
                }
                worker.post(message)?;
            }
            Err(e) => tracing::warn!("skipping malformed message: {}", e),
        }
        for event in events.try_iter() {
            awaiting_init &= !settles_init(&event);
            write_worker_event(out, &event)?;
        }
    }

    while awaiting_init {
        let event = events.recv()?;
        awaiting_init = !settles_init(&event);
        write_worker_event(out, &event)?;
    }
    worker.terminate()?;
    for event in events.try_iter() {
        write_worker_event(out, &event)?;
    }
    out.flush()?;
    Ok(())
}

fn settles_init(event: &WorkerEvent) -> bool {
    match event {
        WorkerEvent::Initialized { .. } => true,
        WorkerEvent::Event(e) => e.event_type == EventType::Error,
    }
}

fn write_worker_event(out: &mut impl Write, event: &WorkerEvent) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(event)?)?;
    Ok(())
}

/// Writes the commented default config, refusing to overwrite an existing file.
pub fn init_config(output: Option<PathBuf>) -> Result<PathBuf> {
    let path = match output {
        Some(path) => path,
        None => dirs::config_dir()
            .map(|d| d.join("speechpipe").join("config.toml"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?,
    };
    if path.exists() {
        anyhow::bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, Config::generate_default_commented())?;
    println!("Wrote default config to {}", path.display());
    Ok(path)
}

/// Print the effective configuration and where it came from.
pub fn show_config(config: &Config, source: Option<&Path>) -> Result<()> {
    match source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# built-in defaults"),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
