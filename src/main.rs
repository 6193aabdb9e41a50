use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediascribe::cli::{Cli, Commands};
use mediascribe::config::Config;
use mediascribe::pipeline::{JobOrchestrator, UploadedFile};
use mediascribe::progress::{JobStatus, ProgressTracker};
use mediascribe::transcribe::{Transcriber, WhisperEngine};
use mediascribe::{acquire::YtDlpSource, storage, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mediascribe=debug"
    } else {
        "mediascribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().await?;

    match cli.command {
        Commands::Upload { files } => {
            warn_missing_dependencies().await;
            let orchestrator = build_orchestrator(&config, true).await?;
            let uploads = read_uploads(files).await?;

            let spinner = spawn_spinner(orchestrator.tracker(), cli.quiet);
            let result = orchestrator.run_upload_batch(uploads).await;
            finish_spinner(spinner).await;

            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Video { url } => {
            warn_missing_dependencies().await;
            let url = utils::validate_and_normalize_url(&url)?;
            let orchestrator = build_orchestrator(&config, true).await?;

            let spinner = spawn_spinner(orchestrator.tracker(), cli.quiet);
            let result = orchestrator.run_single_video(&url).await;
            finish_spinner(spinner).await;

            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Playlist { url } => {
            warn_missing_dependencies().await;
            let url = utils::validate_and_normalize_url(&url)?;
            let orchestrator = build_orchestrator(&config, true).await?;

            let spinner = spawn_spinner(orchestrator.tracker(), cli.quiet);
            let result = orchestrator.run_playlist(&url).await;
            finish_spinner(spinner).await;

            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Fetch { filename, output } => {
            // No folder flush here: fetching must not disturb stored transcripts
            let orchestrator = build_orchestrator(&config, false).await?;

            match orchestrator.fetch_transcript(&filename).await? {
                Some(bytes) => match output {
                    Some(path) => {
                        tokio::fs::write(&path, &bytes).await?;
                        println!("Transcript saved to: {}", path.display());
                    }
                    None => {
                        print!("{}", String::from_utf8_lossy(&bytes));
                    }
                },
                None => {
                    anyhow::bail!("Transcript not found: {}", filename);
                }
            }
        }
        Commands::Cancel => {
            let orchestrator = build_orchestrator(&config, false).await?;
            let purged = orchestrator.cancel().await;
            println!("Job state reset; {} stored transcripts purged", purged);
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration written; edit the config.yaml to adjust settings");
                config.display();
            }
        }
    }

    Ok(())
}

/// External tools are checked up front but their absence is not fatal; a
/// container image may expose them under paths the probe misses.
async fn warn_missing_dependencies() {
    let missing = utils::check_dependencies().await;
    if !missing.is_empty() {
        eprintln!("Dependency check warnings:");
        for dep in missing {
            eprintln!("  - {}", dep);
        }
        eprintln!("  (Continuing anyway - tools may still be available)");
    }
}

async fn build_orchestrator(config: &Config, flush_local: bool) -> Result<JobOrchestrator> {
    let storage = storage::from_config(config, flush_local).await?;
    tracing::info!("Using {} storage backend", storage.backend_name());

    let progress = Arc::new(ProgressTracker::new());

    let source = Arc::new(YtDlpSource::new(
        config.storage.temp_folder.clone(),
        config.acquisition.clone(),
        Arc::clone(&progress),
    ));

    let engine = Arc::new(WhisperEngine::new(
        config.app.whisper_model.clone(),
        config.app.language.clone(),
    ));
    let transcriber = Transcriber::new(engine, Arc::clone(&progress), storage.transcript_staging());

    Ok(JobOrchestrator::new(
        storage,
        source,
        transcriber,
        progress,
        config.app.allowed_extensions.clone(),
        config.storage.temp_folder.clone(),
    ))
}

/// Load upload batch contents into memory, keeping command-line order.
async fn read_uploads(files: Vec<PathBuf>) -> Result<Vec<UploadedFile>> {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        utils::check_file_accessible(&path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(&path).await?;
        uploads.push(UploadedFile { filename, bytes });
    }
    Ok(uploads)
}

/// Poll the tracker and mirror it into a terminal spinner until the job
/// reaches a terminal state.
fn spawn_spinner(
    tracker: Arc<ProgressTracker>,
    quiet: bool,
) -> Option<tokio::task::JoinHandle<()>> {
    if quiet {
        return None;
    }

    Some(tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        loop {
            let snap = tracker.snapshot();
            bar.set_position(snap.progress as u64);
            bar.set_message(snap.message.clone());

            match snap.status {
                JobStatus::Complete => {
                    bar.finish_with_message(snap.message);
                    break;
                }
                JobStatus::Error => {
                    bar.abandon_with_message(snap.message);
                    break;
                }
                JobStatus::Idle | JobStatus::Processing => {}
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }))
}

async fn finish_spinner(handle: Option<tokio::task::JoinHandle<()>>) {
    if let Some(handle) = handle {
        // Give the poller one last tick to observe the terminal state
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
