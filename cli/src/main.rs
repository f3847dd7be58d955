use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use steadyscan_core::{
    pipeline::{DetectionFrame, FramePipeline, PipelineConfig},
    trigger::ConditionSet,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "steadyscan",
    version,
    about = "Stabilise recorded detection streams and report auto-capture decisions",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded detection stream through the pipeline.
    Replay {
        /// Recording file (pipeline config + frames, JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Condition-set file overriding the one embedded in the recording
        #[arg(short, long)]
        conditions: Option<PathBuf>,
    },

    /// Validate a condition-set file without running the pipeline.
    LintConditions {
        /// Condition-set file (JSON array)
        #[arg(short, long)]
        conditions: PathBuf,
    },
}

/// On-disk replay format: the pipeline configuration followed by one entry
/// per frame, exactly as the session recorder wrote them.
#[derive(Deserialize)]
struct Recording {
    #[serde(default)]
    config: PipelineConfig,
    frames: Vec<DetectionFrame>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { input, conditions } => cmd_replay(input, conditions),
        Commands::LintConditions { conditions } => cmd_lint_conditions(conditions),
    }
}

// ── Replay ────────────────────────────────────────────────────────────────────

fn cmd_replay(input: PathBuf, conditions: Option<PathBuf>) -> Result<()> {
    info!("replay");
    info!("  input : {}", input.display());

    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("failed to read recording: {}", input.display()))?;
    let mut recording: Recording =
        serde_json::from_str(&raw).context("recording is not valid JSON")?;

    if let Some(path) = conditions {
        info!("  conditions : {}", path.display());
        recording.config.conditions = ConditionSet::load(&path)?;
    }

    let total = recording.frames.len();
    let pb = progress_bar(total as u64);
    let mut pipeline = FramePipeline::new(recording.config);

    let mut capture_frames: Vec<usize> = Vec::new();
    let mut peak_tracked = 0usize;
    for (index, frame) in recording.frames.iter().enumerate() {
        let outcome = pipeline.process_frame(frame);
        peak_tracked = peak_tracked.max(outcome.overlays.len());
        if outcome.should_capture {
            capture_frames.push(index);
        }
        tracing::debug!(
            frame = index,
            detections = frame.detections.len(),
            accepted = outcome.accepted.len(),
            overlays = outcome.overlays.len(),
            capture = outcome.should_capture,
            "frame replayed"
        );
        pb.inc(1);
    }
    pb.finish_with_message("Replay complete.");

    info!("replayed {total} frames, peak of {peak_tracked} concurrent overlays");
    if capture_frames.is_empty() {
        info!("no frame satisfied the capture conditions");
    } else {
        info!(
            "capture triggered on {} frame(s): {:?}",
            capture_frames.len(),
            capture_frames
        );
    }

    Ok(())
}

// ── Condition lint ────────────────────────────────────────────────────────────

fn cmd_lint_conditions(conditions: PathBuf) -> Result<()> {
    let set = ConditionSet::load(&conditions)?;
    let problems = set.lint();

    if problems.is_empty() {
        info!(
            "condition set OK ({} condition(s)): {}",
            set.len(),
            conditions.display()
        );
        return Ok(());
    }

    for problem in &problems {
        warn!("{problem}");
    }
    bail!(
        "{} problem(s) found in {}",
        problems.len(),
        conditions.display()
    );
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} frames [{elapsed_precise}]")
            .unwrap(),
    );
    pb
}
