// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/main.rs
// Version: 1.0.0
//
// kawpow-bench: drives one KawPow runner per selected OpenCL device against a
// fixed job and reports hashrate and candidates until the duration elapses or
// Ctrl-C is pressed. All runners share one light cache.

use anyhow::{Context, anyhow};
use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use kawpow_runner::core::difficulty::{boundary_difficulty, target_from_difficulty, target_from_hex};
use kawpow_runner::core::types::{BLOB_SIZE, Job, RunnerSettings};
use kawpow_runner::miner::gpu::{FileKernelSource, KawPowRunner, OpenClBackend, OpenClDevice};
use kawpow_runner::miner::light_cache::{LightCache, SharedLightCache};
use kawpow_runner::utils::format::FormatUtils;
use log::{LevelFilter, error, info, warn};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "kawpow::runner::bench";

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Command-line arguments for kawpow-bench
#[derive(Parser, Debug, Clone)]
#[command(name = "kawpow-bench", version, about = "KawPow GPU runner benchmark")]
struct Args {
    /// Device indices to run on (comma-separated); all detected devices when omitted
    #[arg(short = 'd', long = "devices", value_delimiter = ',')]
    devices: Vec<u32>,

    /// Block height; selects the epoch and the search program period
    #[arg(long, default_value_t = 0)]
    height: u64,

    /// Header blob as 80 hex characters; random when omitted
    #[arg(long)]
    blob: Option<String>,

    /// Share target as big-endian hex
    #[arg(long, conflicts_with = "difficulty")]
    target: Option<String>,

    /// Share difficulty, used when no target is given
    #[arg(long, default_value_t = 1_000_000)]
    difficulty: u64,

    /// Parallel search lanes per dispatch (overrides the settings file)
    #[arg(short = 'i', long)]
    intensity: Option<u32>,

    /// Benchmark duration in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Directory holding kawpow_dag.cl and kawpow_search[_<period>].cl
    #[arg(long, default_value = "kernels")]
    kernels: PathBuf,

    /// Runner settings JSON file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// log4rs YAML configuration; console logging when omitted
    #[arg(long)]
    log_config: Option<PathBuf>,

    /// Console log level when no log configuration is given
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

impl Args {
    fn validate(&self) -> Result<(), String> {
        if self.duration == 0 {
            return Err("--duration must be at least 1 second".to_string());
        }
        if let Some(blob) = &self.blob {
            if blob.trim_start_matches("0x").len() != BLOB_SIZE * 2 {
                return Err(format!("--blob must be {} hex characters", BLOB_SIZE * 2));
            }
        }
        if !self.kernels.is_dir() {
            return Err(format!(
                "kernel directory {} does not exist",
                self.kernels.display()
            ));
        }
        Ok(())
    }
}

enum WorkerEvent {
    Ready { device: usize, dag_ms: u128 },
    Progress { device: usize, hashes: u64 },
    Candidates { device: usize, nonce: u64, words: Vec<u32>, dropped: u32 },
    Failed { device: usize, error: String },
    Stopped { device: usize },
}

#[derive(Debug, Default)]
struct BenchSummary {
    hashes: Vec<u64>,
    candidates: u64,
    dropped: u64,
    failures: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(err) = args.validate() {
        eprintln!("❌ Error: {}", err);
        std::process::exit(1);
    }

    init_logging(&args)?;

    let settings = load_settings(&args)?;
    let job = build_job(&args)?;
    let devices = select_devices(&args)?;

    info!(target: LOG_TARGET,
        "🚀 kawpow-bench: {} device(s), height {} (epoch {}, period {}), {}s",
        devices.len(),
        job.height,
        job.epoch(),
        job.period(),
        args.duration
    );
    info!(target: LOG_TARGET,
        "🎯 Boundary {:#018x} (difficulty ~{})",
        job.boundary(),
        FormatUtils::format_number(boundary_difficulty(job.boundary()))
    );

    let cache = LightCache::new().shared();
    let stop = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = channel::unbounded();
    let base_nonce: u64 = rand::thread_rng().r#gen();

    let started = Instant::now();
    let mut handles = Vec::with_capacity(devices.len());
    for (index, device) in devices.into_iter().enumerate() {
        handles.push(spawn_worker(
            index,
            device,
            Arc::clone(&cache),
            settings.clone(),
            args.kernels.clone(),
            job.clone(),
            base_nonce.wrapping_add((index as u64) << 48),
            Arc::clone(&stop),
            events_tx.clone(),
        )?);
    }
    drop(events_tx);

    let worker_count = handles.len();
    let mut collector =
        tokio::task::spawn_blocking(move || collect_events(events_rx, worker_count));

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(target: LOG_TARGET, "🛑 Ctrl-C received, stopping runners");
            None
        }
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {
            info!(target: LOG_TARGET, "⏱️ Benchmark duration reached");
            None
        }
        summary = &mut collector => Some(summary),
    };

    stop.store(true, Ordering::Relaxed);
    let elapsed = started.elapsed();
    for handle in handles {
        if handle.join().is_err() {
            error!(target: LOG_TARGET, "A runner thread panicked");
        }
    }

    let summary = match finished {
        Some(summary) => summary,
        None => collector.await,
    }
    .context("event collector failed")?;

    report_summary(&summary, elapsed);
    if summary.failures == worker_count {
        return Err(anyhow!("every runner failed"));
    }
    Ok(())
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    if let Some(path) = &args.log_config {
        log4rs::init_file(path, Default::default())
            .with_context(|| format!("cannot load log configuration {}", path.display()))?;
        return Ok(());
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l:5})} {t} - {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(args.log_level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn load_settings(args: &Args) -> anyhow::Result<RunnerSettings> {
    let mut settings = match &args.settings {
        Some(path) => RunnerSettings::from_json_file(path)?,
        None => RunnerSettings::default(),
    };
    if let Some(intensity) = args.intensity {
        settings.intensity = intensity;
    }
    settings.validate()?;
    Ok(settings)
}

fn build_job(args: &Args) -> anyhow::Result<Job> {
    let blob = match &args.blob {
        Some(hex_blob) => hex::decode(hex_blob.trim_start_matches("0x"))
            .with_context(|| format!("invalid --blob {}", hex_blob))?,
        None => {
            let mut blob = vec![0u8; BLOB_SIZE];
            rand::thread_rng().fill(&mut blob[..]);
            blob
        }
    };

    let target = match &args.target {
        Some(target) => target_from_hex(target)?,
        None => target_from_difficulty(args.difficulty),
    };

    Ok(Job::new("bench", args.height, &blob, target)?)
}

fn select_devices(args: &Args) -> anyhow::Result<Vec<OpenClDevice>> {
    let detected = OpenClDevice::detect_devices()?;
    if detected.is_empty() {
        return Err(anyhow!("no OpenCL GPU devices found"));
    }

    let selected: Vec<OpenClDevice> = if args.devices.is_empty() {
        detected
    } else {
        detected
            .into_iter()
            .filter(|device| args.devices.contains(&device.device_id))
            .collect()
    };

    if selected.is_empty() {
        return Err(anyhow!("none of the requested devices {:?} exist", args.devices));
    }

    for device in &selected {
        if !device.can_hold_epoch(epoch_for(args.height)) {
            warn!(target: LOG_TARGET,
                "⚠️ {} may not hold the dataset for epoch {}",
                device.name(),
                epoch_for(args.height)
            );
        }
    }
    Ok(selected)
}

fn epoch_for(height: u64) -> u32 {
    kawpow_runner::core::epoch::epoch_of(height)
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    index: usize,
    device: OpenClDevice,
    cache: SharedLightCache,
    settings: RunnerSettings,
    kernels: PathBuf,
    job: Job,
    start_nonce: u64,
    stop: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
) -> anyhow::Result<JoinHandle<()>> {
    // One OS thread per device, each owning its own context and queue
    let handle = std::thread::Builder::new()
        .name(format!("kawpow-gpu-{}", index))
        .spawn(move || {
            let event = match run_worker(
                index, device, cache, settings, kernels, &job, start_nonce, &stop, &events,
            ) {
                Ok(()) => WorkerEvent::Stopped { device: index },
                Err(e) => WorkerEvent::Failed {
                    device: index,
                    error: e.to_string(),
                },
            };
            let _ = events.send(event);
        })
        .with_context(|| format!("cannot spawn runner thread {}", index))?;
    Ok(handle)
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    index: usize,
    device: OpenClDevice,
    cache: SharedLightCache,
    settings: RunnerSettings,
    kernels: PathBuf,
    job: &Job,
    start_nonce: u64,
    stop: &AtomicBool,
    events: &Sender<WorkerEvent>,
) -> kawpow_runner::Result<()> {
    let backend = OpenClBackend::new(device, Box::new(FileKernelSource::new(kernels)))?;
    let mut runner = KawPowRunner::new(index, backend, cache, settings)?;
    runner.build()?;
    runner.set(job)?;

    let dag_ms = runner
        .last_dag_duration()
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    let _ = events.send(WorkerEvent::Ready {
        device: index,
        dag_ms,
    });

    let step = runner.nonces_per_dispatch();
    let mut nonce = start_nonce;
    while !stop.load(Ordering::Relaxed) {
        let results = runner.run(nonce)?;
        if !results.is_empty() {
            let _ = events.send(WorkerEvent::Candidates {
                device: index,
                nonce,
                words: results.words().to_vec(),
                dropped: results.dropped(),
            });
        }
        let _ = events.send(WorkerEvent::Progress {
            device: index,
            hashes: step,
        });
        nonce = nonce.wrapping_add(step);
    }

    runner.release();
    Ok(())
}

fn collect_events(events: Receiver<WorkerEvent>, workers: usize) -> BenchSummary {
    let mut summary = BenchSummary {
        hashes: vec![0; workers],
        ..Default::default()
    };
    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut window = vec![0u64; workers];

    loop {
        match events.recv_timeout(REPORT_INTERVAL) {
            Ok(WorkerEvent::Ready { device, dag_ms }) => {
                info!(target: LOG_TARGET, "✅ GPU #{} ready, DAG built in {} ms", device, dag_ms);
            }
            Ok(WorkerEvent::Progress { device, hashes }) => {
                summary.hashes[device] += hashes;
                window[device] += hashes;
            }
            Ok(WorkerEvent::Candidates {
                device,
                nonce,
                words,
                dropped,
            }) => {
                summary.candidates += words.len() as u64;
                summary.dropped += dropped as u64;
                info!(target: LOG_TARGET,
                    "💎 GPU #{}: {} candidate(s) in dispatch at nonce {:#018x}: {:?}",
                    device,
                    words.len(),
                    nonce,
                    words
                );
            }
            Ok(WorkerEvent::Failed { device, error }) => {
                summary.failures += 1;
                error!(target: LOG_TARGET, "❌ GPU #{} stopped: {}", device, error);
            }
            Ok(WorkerEvent::Stopped { device }) => {
                info!(target: LOG_TARGET, "GPU #{} stopped", device);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let elapsed = last_report.elapsed();
        if elapsed >= REPORT_INTERVAL {
            let secs = elapsed.as_secs_f64();
            let per_device: Vec<String> = window
                .iter()
                .enumerate()
                .map(|(device, hashes)| {
                    format!("#{} {}", device, FormatUtils::format_hashrate(*hashes as f64 / secs))
                })
                .collect();
            let total: u64 = window.iter().sum();
            info!(target: LOG_TARGET,
                "📊 {} total | {} | {}s elapsed",
                FormatUtils::format_hashrate(total as f64 / secs),
                per_device.join(" | "),
                started.elapsed().as_secs()
            );
            window.iter_mut().for_each(|hashes| *hashes = 0);
            last_report = Instant::now();
        }
    }

    summary
}

/// Hashes per second over the measured run time; zero for an empty run
fn hashrate(hashes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { hashes as f64 / secs } else { 0.0 }
}

fn report_summary(summary: &BenchSummary, elapsed: Duration) {
    let total: u64 = summary.hashes.iter().sum();
    info!(target: LOG_TARGET, "🏁 Benchmark complete after {:.1}s", elapsed.as_secs_f64());
    for (device, hashes) in summary.hashes.iter().enumerate() {
        info!(target: LOG_TARGET,
            "   GPU #{}: {} nonces, {}",
            device,
            FormatUtils::format_number(*hashes),
            FormatUtils::format_hashrate(hashrate(*hashes, elapsed))
        );
    }
    info!(target: LOG_TARGET,
        "   Total: {} nonces, {}, {} candidate(s), {} dropped",
        FormatUtils::format_number(total),
        FormatUtils::format_hashrate(hashrate(total, elapsed)),
        summary.candidates,
        summary.dropped
    );
}
