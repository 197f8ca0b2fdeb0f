//! jobq entry point.
//!
//! All stdout is JSON only. Tracing logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobq::config::Settings;
use jobq::event::Event;
use jobq::expand::{self, ExpandOptions};
use jobq::job::Priority;
use jobq::preset::{Preset, PresetInvalid};
use jobq::queue::Queue;
use jobq::report::{
    CheckData, ErrorResponse, JobReport, PresetSummary, PresetsData, Response, RunData,
};

#[derive(Debug, Parser)]
#[command(name = "jobq")]
#[command(about = "Dependency-aware job queue driven by preset files", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Override the settings file path.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Expand a preset over input files, run every job, print a summary.
    Run {
        /// Preset file to expand.
        preset: PathBuf,

        /// Input files to process.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output directory (defaults to `save_to` from the settings).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Give each input file its own folder under the output directory.
        #[arg(long)]
        create_folders: bool,

        /// Worker pool size.
        #[arg(long, default_value = "1")]
        threads: usize,

        /// Job priority: critical | high | medium | low.
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// Extra directory searched for bare command names; repeatable.
        #[arg(long = "search-path", value_name = "DIR", action = clap::ArgAction::Append)]
        search_paths: Vec<PathBuf>,
    },

    /// Validate a preset file without running anything.
    Check {
        /// Preset file to validate.
        preset: PathBuf,
    },

    /// List the preset files in a directory, with validity.
    Presets {
        /// Directory to scan (defaults to `preset_from` from the settings).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Logs always go to stderr so stdout remains JSON-only.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(e) = run(cli) {
        // Distinguish a broken preset from generic internal errors.
        if e.downcast_ref::<PresetInvalid>().is_some() {
            ErrorResponse::new("preset_invalid", format!("{e:#}"), false).print();
        } else {
            ErrorResponse::new("internal_error", format!("{e:#}"), false).print();
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            preset,
            files,
            output,
            create_folders,
            threads,
            priority,
            search_paths,
        } => {
            let settings = Settings::load(cli.config.as_deref())?;
            let preset = Preset::read(&preset)?;

            let output = output
                .or_else(|| settings.save_to.as_ref().map(PathBuf::from))
                .context("no output directory: pass --output or set save_to in the settings")?;

            let queue = Queue::new();
            queue.set_threads(threads);
            let mut paths = settings.search_paths();
            paths.extend(search_paths);
            queue.set_search_paths(paths);

            let events = queue.subscribe();
            let options = ExpandOptions {
                output,
                create_folders: create_folders || settings.create_folders,
                priority: priority.value(),
            };
            let expansion = expand::expand(&queue, &preset, &files, &options);
            info!(submitted = expansion.submitted, "jobs submitted");

            // Every submitted job ends in exactly one `processed` (nothing in
            // this path stops jobs), so counting them is the completion gate.
            let mut submitted = Vec::new();
            let mut processed = 0;
            while processed < expansion.submitted {
                match events.recv() {
                    Ok(Event::Submitted(snapshot)) => submitted.push(snapshot.uuid),
                    Ok(Event::Processed(_)) => processed += 1,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }

            let mut jobs: Vec<JobReport> = submitted
                .into_iter()
                .filter_map(|uuid| queue.snapshot(uuid))
                .map(JobReport::from)
                .collect();
            jobs.extend(
                expansion
                    .unresolved
                    .iter()
                    .map(|job| JobReport::from(job.snapshot())),
            );

            Response::new(
                "run",
                RunData {
                    preset: preset.filename.display().to_string(),
                    submitted: expansion.submitted,
                    jobs,
                },
            )
            .print();
        }

        Command::Check { preset } => {
            let preset = Preset::read(&preset)?;
            if preset.tasks.is_empty() {
                bail!(PresetInvalid(format!(
                    "preset {} contains no tasks",
                    preset.filename.display()
                )));
            }
            Response::new(
                "check",
                CheckData {
                    preset: preset.filename.display().to_string(),
                    name: preset.name.clone(),
                    tasks: preset.tasks.len(),
                },
            )
            .print();
        }

        Command::Presets { dir } => {
            let settings = Settings::load(cli.config.as_deref())?;
            let dir = dir
                .or_else(|| settings.preset_from.as_ref().map(PathBuf::from))
                .context("no preset directory: pass --dir or set preset_from in the settings")?;

            let mut presets = Vec::new();
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("failed to read directory: {}", dir.display()))?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .collect();
            paths.sort();
            for path in paths {
                match Preset::read(&path) {
                    Ok(preset) => presets.push(PresetSummary {
                        file: path.display().to_string(),
                        valid: true,
                        name: Some(preset.name),
                        tasks: Some(preset.tasks.len()),
                        error: None,
                    }),
                    Err(err) => presets.push(PresetSummary {
                        file: path.display().to_string(),
                        valid: false,
                        name: None,
                        tasks: None,
                        error: Some(format!("{err:#}")),
                    }),
                }
            }
            info!(dir = %dir.display(), count = presets.len(), "presets scanned");
            Response::new(
                "presets",
                PresetsData {
                    dir: dir.display().to_string(),
                    presets,
                },
            )
            .print();
        }
    }
    Ok(())
}
