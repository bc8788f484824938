//! Subqueue - Batch Subtitle Generation Pipeline
//!
//! Command line front end: expands inputs into a work queue, runs the
//! pipeline on a background task and renders its events as a progress bar.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

use subqueue::cancel::CancellationToken;
use subqueue::cli::{Args, Commands};
use subqueue::config::{Config, MediaConfig};
use subqueue::events::PipelineEvent;
use subqueue::orchestrator::Orchestrator;
use subqueue::progress::Eta;
use subqueue::queue::{Settings, SubtitleMode, WorkQueue, WorkStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Config { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Run { input, language, model, translate_to, hard_sub, output_dir } => {
            let files = collect_media_files(&input, &config.media);
            if files.is_empty() {
                anyhow::bail!("No media files found in the given inputs");
            }
            info!("Queueing {} file(s)", files.len());

            let settings = Settings {
                language,
                model_name: model.unwrap_or_else(|| config.transcriber.default_model.clone()),
                enable_translation: translate_to.is_some(),
                target_language: translate_to.unwrap_or_else(|| "en".to_string()),
                subtitle_mode: if hard_sub { SubtitleMode::HardSubtitle } else { SubtitleMode::SoftSubtitle },
                output_dir,
            };

            let queue = WorkQueue::new();
            for file in &files {
                queue.enqueue(file, settings.clone());
            }

            let failed = run_queue(config, queue).await?;
            if failed > 0 {
                anyhow::bail!("{} file(s) failed", failed);
            }
        }
    }

    Ok(())
}

/// Run the queue to completion and print a summary. Returns the number of
/// failed files.
async fn run_queue(config: Config, queue: WorkQueue) -> Result<usize> {
    let orchestrator = Arc::new(Orchestrator::from_config(config, queue.clone())?);
    let (handle, mut events) = orchestrator.spawn(CancellationToken::new());

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling after the current step");
            token.signal();
        }
    });

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Progress { percent, message } => {
                let snapshot = orchestrator.progress_snapshot();
                pb.set_position(percent.round() as u64);
                match snapshot.eta_remaining_files {
                    Eta::Known(_) => pb.set_message(format!("{} (ETA {})", message, snapshot.eta_remaining_files)),
                    Eta::Unknown => pb.set_message(message),
                }
            }
            PipelineEvent::Status(message) => pb.println(message),
            PipelineEvent::Error(message) => pb.println(format!("error: {}", message)),
            PipelineEvent::FileCompleted { output_path, .. } => {
                pb.println(format!("wrote {}", output_path.display()));
            }
            PipelineEvent::Finished => break,
        }
    }
    pb.finish_and_clear();

    let summary = handle.wait().await?;

    println!("\n{:<12} {:<40} {:<40}", "Status", "File", "Message");
    println!("{}", "-".repeat(92));
    for item in queue.list() {
        println!(
            "{:<12} {:<40} {:<40}",
            item.status.to_string(),
            item.display_name(),
            item.message.unwrap_or_default()
        );
    }
    println!(
        "\n{} completed, {} failed, {} cancelled, {} still pending",
        summary.completed,
        summary.failed,
        summary.cancelled,
        queue.count(WorkStatus::Pending)
    );

    Ok(summary.failed)
}

/// Expand directories into the recognized media files they contain.
/// Explicit file paths are kept as given.
fn collect_media_files(inputs: &[PathBuf], media: &MediaConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && media.is_supported(e.path()))
                .map(|e| e.path().to_path_buf())
                .collect();
            found.sort();
            info!("Found {} media files in {}", found.len(), input.display());
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }

    files
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subqueue").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subqueue.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subqueue.log").display()
    );

    Ok(())
}
