//! Control client: submit jobs, query or kill running jobs, manage the queue.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use transcoder_models::{JobId, JobParams, PresetStore, FFMPEG_DEFAULTS_ID};
use transcoder_queue::{MemoryPubSub, MemoryQueue, QueueConfig};
use transcoder_worker::{init_tracing, Director, Submitter, WorkerConfig};

/// Transcoder control client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with presets and preset groups (built-in presets if unset)
    #[arg(long, global = true)]
    presets: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one job for a preset
    Submit {
        preset_id: Uuid,
        /// Job parameters as key=value
        #[arg(value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Submit one job per preset of a group
    SubmitGroup {
        group_id: Uuid,
        #[arg(value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Show live progress of a running job
    Info { job_id: JobId },
    /// Kill a running job
    Kill { job_id: JobId },
    /// Discard every ready delivery
    PurgeReady,
    /// Discard ready and rejected deliveries
    Destroy,
    /// List available presets and groups
    Presets,
    /// Transcode every file in a directory with local workers
    Batch {
        /// Input directory
        #[arg(short, long)]
        input: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Number of local workers
        #[arg(short, long, default_value_t = 2)]
        workers: usize,
        /// Preset to run for each file
        #[arg(long, default_value_t = FFMPEG_DEFAULTS_ID)]
        preset: Uuid,
    },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_presets(path: Option<&Path>) -> Result<Arc<PresetStore>> {
    let store = match path {
        Some(path) => PresetStore::from_json_file(path)
            .with_context(|| format!("Failed to load presets from {}", path.display()))?,
        None => PresetStore::with_defaults(),
    };
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let presets = load_presets(cli.presets.as_deref())?;

    match cli.command {
        Command::Batch {
            input,
            output,
            workers,
            preset,
        } => run_batch(presets, &input, &output, workers, &preset).await,
        Command::Presets => {
            print_presets(&presets);
            Ok(())
        }
        command => run_control(presets, command).await,
    }
}

fn print_presets(presets: &PresetStore) {
    for preset in presets.presets() {
        let id = preset.id.map(|id| id.to_string()).unwrap_or_default();
        println!("{}  {}  {} {}", id, preset.description, preset.path, preset.args.join(" "));
    }
    for group in presets.groups() {
        println!("{}  {} (group of {})", group.id, group.description, group.preset_ids.len());
    }
}

/// Run a command against the shared Redis queue without local consumers.
async fn run_control(presets: Arc<PresetStore>, command: Command) -> Result<()> {
    let config = WorkerConfig {
        worker_count: 0,
        ..WorkerConfig::from_env()?
    };
    let (director, _updates) = Director::from_redis(QueueConfig::from_env(), &config)?;
    let director = Arc::new(director);
    let submitter = Submitter::new(presets, Arc::clone(&director));

    match command {
        Command::Submit { preset_id, params } => {
            let job = submitter
                .submit_preset(&preset_id, params.into_iter().collect())
                .await?;
            println!("{}", job.id);
        }
        Command::SubmitGroup { group_id, params } => {
            let jobs = submitter
                .submit_preset_group(&group_id, params.into_iter().collect())
                .await?;
            for job in jobs {
                println!("{}", job.id);
            }
        }
        Command::Info { job_id } => {
            let info = director.job_info(&job_id).await?;
            println!(
                "{:.1}% ({:.1}s / {:.1}s)",
                info.percentage(),
                info.current_time,
                info.total_duration
            );
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Kill { job_id } => {
            let reply = director.kill_job(&job_id).await?;
            println!("{}", serde_json::to_string(&reply)?);
        }
        Command::PurgeReady => {
            let purged = director.purge_ready().await?;
            println!("purged {} ready deliveries", purged);
        }
        Command::Destroy => {
            let (ready, rejected) = director.destroy().await?;
            println!("purged {} ready and {} rejected deliveries", ready, rejected);
        }
        other => anyhow::bail!("{:?} does not run against the shared queue", other),
    }

    director.shutdown().await;
    Ok(())
}

/// Transcode every regular file in `input` into `output` with in-process
/// workers, printing status updates until all jobs have finished.
async fn run_batch(
    presets: Arc<PresetStore>,
    input: &Path,
    output: &Path,
    workers: usize,
    preset: &Uuid,
) -> Result<()> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input)
        .with_context(|| format!("Failed to read input directory {}", input.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            files.push(entry);
        }
    }
    files.sort_by_key(|entry| entry.file_name());

    // Each job emits submitted, inProgress and a terminal update
    let defaults = WorkerConfig::default();
    let config = WorkerConfig {
        worker_count: workers.max(1),
        update_buffer: defaults.update_buffer.max(files.len() * 3 + 1),
        ..defaults
    };
    let (director, mut updates) = Director::start(
        Arc::new(MemoryQueue::new("batch")),
        Arc::new(MemoryPubSub::new()),
        &config,
        QueueConfig::default().heartbeat_ttl,
    );
    let director = Arc::new(director);
    let submitter = Submitter::new(presets, Arc::clone(&director));

    let mut pending = HashSet::new();
    for entry in files {
        let mut params = JobParams::new();
        params.insert("input".to_string(), entry.path().display().to_string());
        params.insert(
            "output".to_string(),
            output.join(entry.file_name()).display().to_string(),
        );
        let job = submitter.submit_preset(preset, params).await?;
        info!(job_id = %job.id, "Submitted {}", entry.path().display());
        pending.insert(job.id);
    }

    while !pending.is_empty() {
        let Some(update) = updates.recv().await else {
            break;
        };
        let Some(job) = update.job.as_ref() else {
            continue;
        };
        println!(
            "{} {:?} Status: {} {}",
            job.id, job.params, update.status, update.message
        );
        if job.status.is_terminal() {
            pending.remove(&job.id);
        }
    }

    director.shutdown().await;
    Ok(())
}
