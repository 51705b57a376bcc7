//! avsession - headless driver
//!
//! Probes the codec libraries, opens a session on the symphonia backend and
//! drives decode steps, draining the audio ring like a sink would.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use avsession_core::audio::RingStats;
use avsession_core::gl::{GlBinding, GlLibrary};
use avsession_core::probe::LibraryVersions;
use avsession_core::{
    probe_shared_libraries, Capabilities, MediaType, Session, SessionConfig, SessionMetrics,
    StepEvent, StreamCatalog, SymphoniaBackend,
};

struct Options {
    input: Option<PathBuf>,
    steps: u64,
    config: Option<PathBuf>,
    probe: bool,
}

#[derive(Serialize)]
struct ProbeReport {
    version: &'static str,
    shared_libraries: LibraryVersions,
    gl_library: Option<&'static str>,
    gl_missing: Vec<&'static str>,
    capabilities: Capabilities,
}

#[derive(Serialize)]
struct RunSummary {
    input: String,
    steps: u64,
    end_of_stream: bool,
    video_frames: u64,
    audio_buffers: u64,
    audio_samples: u64,
    subtitles: u64,
    skipped_packets: u64,
    /// Wire encoding, sentinels included.
    audio_position_ms: i32,
    catalog: StreamCatalog,
    metrics: SessionMetrics,
    ring: Option<RingStats>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("avsession=info,avsession_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    if options.probe {
        return run_probe();
    }

    let input = options.input.clone().ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing required --input")
    })?;
    run_decode(&input, &options)
}

fn run_probe() -> Result<()> {
    let shared_libraries = probe_shared_libraries();

    // SAFETY: the probe only reads which entry points resolved; nothing is
    // called without a current context. NPOT support needs a context too.
    let gl_library = match unsafe { GlLibrary::open(false) } {
        Ok(library) => Some(library),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    };
    let binding = gl_library.as_ref().map(|l| l.functions() as &dyn GlBinding);
    let capabilities = Capabilities::probe(shared_libraries, binding);

    let report = ProbeReport {
        version: avsession_core::VERSION,
        shared_libraries,
        gl_library: gl_library.as_ref().map(|l| l.name()),
        gl_missing: capabilities.gl_entry_points.missing(),
        capabilities,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_decode(input: &Path, options: &Options) -> Result<()> {
    let config = match &options.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let url = input
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Input path is not valid UTF-8: {:?}", input))?;

    tracing::info!("avsession v{}: input={}, steps={}", avsession_core::VERSION, url, options.steps);

    let mut session = Session::open(Arc::new(SymphoniaBackend::new()), url, config, None, None)?;
    let ring = session.audio_ring();

    let mut summary_steps = 0;
    let mut end_of_stream = false;
    let (mut video_frames, mut audio_buffers, mut audio_samples) = (0u64, 0u64, 0u64);
    let (mut subtitles, mut skipped_packets) = (0u64, 0u64);

    while summary_steps < options.steps {
        summary_steps += 1;
        match session.step() {
            Ok(StepEvent::EndOfStream) => {
                end_of_stream = true;
                break;
            }
            Ok(StepEvent::Video(_)) => video_frames += 1,
            Ok(StepEvent::Subtitle { .. }) => subtitles += 1,
            Ok(StepEvent::Skipped { .. }) => skipped_packets += 1,
            Ok(StepEvent::Audio(_)) | Ok(StepEvent::Pending(_)) => {}
            Err(e) if !e.is_fatal() => {
                tracing::warn!("Step {} failed: {}", summary_steps, e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(ring) = &ring {
            while let Some(mirror) = ring.pop() {
                audio_buffers += 1;
                audio_samples += mirror.samples_per_channel() as u64;
                ring.recycle(mirror);
            }
        }
    }

    let summary = RunSummary {
        input: url.to_string(),
        steps: summary_steps,
        end_of_stream,
        video_frames,
        audio_buffers,
        audio_samples,
        subtitles,
        skipped_packets,
        audio_position_ms: session.position_msec(MediaType::Audio).to_wire(),
        catalog: session.catalog().clone(),
        metrics: session.metrics(),
        ring: ring.as_ref().map(|r| r.stats()),
    };
    session.close();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        input: None,
        steps: 1000,
        config: None,
        probe: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --input"))?;
                options.input = Some(PathBuf::from(value));
                i += 2;
            }
            "--steps" | "-n" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --steps"))?;
                options.steps = value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid step count {}: {}", value, e))?;
                i += 2;
            }
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                options.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--probe" => {
                options.probe = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    Ok(options)
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  avsession --input <file> [--steps <n>] [--config <cfg.json>]\n  avsession --probe\n"
    );
}
