//! Materialize jobs from a preset and a list of input files.
//!
//! Each input file expands independently: every task in the preset becomes
//! one job, with the substitution variables resolved against that file and
//! its computed output path. Task-level `dependson` ids are rewritten into
//! job uuids during the expansion; a dependent whose parent id never maps
//! (a validated preset makes this impossible) is marked `Failed` and
//! never submitted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::job::{Job, Priority, Status};
use crate::preset::{Preset, Substitution};
use crate::queue::Queue;

#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Caller-supplied output directory.
    pub output: PathBuf,
    /// Give each input file its own folder under `output`.
    pub create_folders: bool,
    /// Priority assigned to every expanded job.
    pub priority: i32,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            output: PathBuf::new(),
            create_folders: false,
            priority: Priority::Medium.value(),
        }
    }
}

/// What an expansion produced: how many jobs entered the queue, and the jobs
/// whose dependency never resolved (created `Failed`, not submitted).
#[derive(Debug, Default)]
pub struct Expansion {
    pub submitted: usize,
    pub unresolved: Vec<Arc<Job>>,
}

pub fn expand(
    queue: &Queue,
    preset: &Preset,
    files: &[PathBuf],
    options: &ExpandOptions,
) -> Expansion {
    let mut expansion = Expansion::default();
    for file in files {
        expand_file(queue, preset, file, options, &mut expansion);
    }
    debug!(
        preset = %preset.name,
        files = files.len(),
        submitted = expansion.submitted,
        "expansion finished"
    );
    expansion
}

fn expand_file(
    queue: &Queue,
    preset: &Preset,
    file: &Path,
    options: &ExpandOptions,
    expansion: &mut Expansion,
) {
    let input = Substitution::input(file);
    let inputbase = file
        .file_stem()
        .map(|b| b.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut assigned = HashMap::new();
    let mut pending = Vec::new();

    for task in &preset.tasks {
        let extension = input.apply(&task.extension);
        let output_dir = if options.create_folders {
            options.output.join(&inputbase)
        } else {
            options.output.clone()
        };
        let output_file = output_dir.join(format!("{inputbase}.{extension}"));
        let vars = input.clone().with_output(&output_file);

        let job = Arc::new(Job::new());
        job.set_task_id(task.id.clone());
        job.set_name(task.name.clone());
        job.set_filename(file.display().to_string());
        job.set_command(vars.apply(&task.command));
        job.set_arguments(tokenize(&vars.apply(&task.arguments)));
        job.set_startin(vars.apply(&task.startin));
        job.set_output(output_dir.display().to_string());
        job.set_priority(options.priority);

        match &task.dependson {
            None => {
                assigned.insert(task.id.clone(), job.uuid());
                queue.submit(job);
                expansion.submitted += 1;
            }
            Some(dependson) => pending.push((job, task.id.clone(), dependson.clone())),
        }
    }

    // Dependents resolve in preset order, so a chain of dependents maps one
    // link at a time as earlier entries submit.
    for (job, task_id, dependson) in pending {
        match assigned.get(&dependson) {
            Some(&parent) => {
                job.set_dependson(parent);
                assigned.insert(task_id, job.uuid());
                queue.submit(job);
                expansion.submitted += 1;
            }
            None => {
                warn!(task = %task_id, %dependson, "dependency never resolved");
                job.set_log(format!(
                    "Uuid:\n{}\n\nCommand:\n{} {}\n\nStatus:\nCommand cancelled, \
                     dependency could not be resolved: {}\n",
                    job.uuid(),
                    job.command(),
                    job.arguments().join(" "),
                    dependson
                ));
                job.set_status(Status::Failed);
                expansion.unresolved.push(job);
            }
        }
    }
}

/// Arguments split on ASCII space after substitution. Simple on purpose:
/// an argument containing a space cannot be expressed.
fn tokenize(arguments: &str) -> Vec<String> {
    arguments
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
