//! Preset documents: a named list of task templates with dependencies.
//!
//! A preset is a small JSON file describing the tasks to run for each input
//! file. Required per task: `id`, `name`, `command`, `extension`,
//! `arguments`. `dependson`, when present, must name a task declared earlier
//! in the same file. Any violation makes the whole preset unusable; the error
//! names the task and every missing attribute.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Validation failure for a preset document. Carried inside `anyhow::Error`
/// so the CLI can classify it separately from internal errors.
#[derive(Debug)]
pub struct PresetInvalid(pub String);

impl fmt::Display for PresetInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PresetInvalid {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawPreset {
    name: String,
    tasks: Vec<RawTask>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawTask {
    id: String,
    name: String,
    command: String,
    extension: String,
    arguments: String,
    startin: String,
    dependson: String,
    documentation: Vec<String>,
}

/// One validated task template.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub command: String,
    pub extension: String,
    pub arguments: String,
    pub startin: String,
    pub dependson: Option<String>,
    pub documentation: Vec<String>,
}

/// A validated preset document.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub filename: PathBuf,
    pub tasks: Vec<Task>,
}

impl Preset {
    /// Read and validate a preset file.
    pub fn read(path: &Path) -> Result<Preset> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to open preset: {}", path.display()))?;
        let raw: RawPreset = serde_json::from_str(&text).map_err(|e| {
            PresetInvalid(format!(
                "failed to parse preset {}: {} at line {}, column {}",
                path.display(),
                e,
                e.line(),
                e.column()
            ))
        })?;

        let mut tasks: Vec<Task> = Vec::with_capacity(raw.tasks.len());
        for (index, task) in raw.tasks.iter().enumerate() {
            let mut missing = Vec::new();
            if task.id.is_empty() {
                missing.push("id");
            }
            if task.name.is_empty() {
                missing.push("name");
            }
            if task.command.is_empty() {
                missing.push("command");
            }
            if task.extension.is_empty() {
                missing.push("extension");
            }
            if task.arguments.is_empty() {
                missing.push("arguments");
            }
            let label = if task.name.is_empty() {
                format!("task {index}")
            } else {
                format!("task \"{}\"", task.name)
            };
            if !missing.is_empty() {
                return Err(PresetInvalid(format!(
                    "{label} in {} does not contain all required attributes, missing: {}",
                    path.display(),
                    missing.join(", ")
                ))
                .into());
            }
            if tasks.iter().any(|seen| seen.id == task.id) {
                return Err(PresetInvalid(format!(
                    "{label} in {} reuses id \"{}\"",
                    path.display(),
                    task.id
                ))
                .into());
            }
            let dependson = if task.dependson.is_empty() {
                None
            } else {
                // Forward references are forbidden: only ids already seen count.
                if !tasks.iter().any(|seen| seen.id == task.dependson) {
                    return Err(PresetInvalid(format!(
                        "{label} in {} contains a dependson id that can not be found: \"{}\"",
                        path.display(),
                        task.dependson
                    ))
                    .into());
                }
                Some(task.dependson.clone())
            };
            tasks.push(Task {
                id: task.id.clone(),
                name: task.name.clone(),
                command: task.command.clone(),
                extension: task.extension.clone(),
                arguments: task.arguments.clone(),
                startin: task.startin.clone(),
                dependson,
                documentation: task.documentation.clone(),
            });
        }

        debug!(preset = %raw.name, tasks = tasks.len(), "preset loaded");
        Ok(Preset {
            name: raw.name,
            filename: path.to_path_buf(),
            tasks,
        })
    }
}

/// The substitution variable table: four `%input*%` pairs built from the
/// dropped file, four `%output*%` pairs added once the output file is known.
/// `dir` is the parent directory, `file` the full path, `ext` the suffix
/// after the last dot, `base` the name with the suffix removed.
#[derive(Debug, Clone)]
pub struct Substitution {
    vars: Vec<(&'static str, String)>,
}

impl Substitution {
    pub fn input(file: &Path) -> Substitution {
        Substitution {
            vars: path_vars(file, ["%inputdir%", "%inputfile%", "%inputext%", "%inputbase%"]),
        }
    }

    pub fn with_output(mut self, file: &Path) -> Substitution {
        self.vars.extend(path_vars(
            file,
            ["%outputdir%", "%outputfile%", "%outputext%", "%outputbase%"],
        ));
        self
    }

    /// Replace every known variable literally.
    pub fn apply(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (var, value) in &self.vars {
            out = out.replace(var, value);
        }
        out
    }
}

fn path_vars(file: &Path, names: [&'static str; 4]) -> Vec<(&'static str, String)> {
    let [dir_var, file_var, ext_var, base_var] = names;
    let dir = file
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let ext = file
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = file
        .file_stem()
        .map(|b| b.to_string_lossy().into_owned())
        .unwrap_or_default();
    vec![
        (dir_var, dir),
        (file_var, file.display().to_string()),
        (ext_var, ext),
        (base_var, base),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_preset(json: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preset.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_a_valid_preset() {
        let (_dir, path) = write_preset(
            r#"{
                "name": "Proxies",
                "tasks": [
                    {
                        "id": "prores",
                        "name": "ProRes proxy",
                        "command": "ffmpeg",
                        "extension": "mov",
                        "arguments": "-i %inputfile% %outputfile%",
                        "startin": "",
                        "documentation": ["Transcode to ProRes", "Requires ffmpeg"]
                    },
                    {
                        "id": "thumb",
                        "name": "Thumbnail",
                        "command": "ffmpeg",
                        "extension": "png",
                        "arguments": "-i %inputfile% -frames:v 1 %outputfile%",
                        "dependson": "prores"
                    }
                ]
            }"#,
        );
        let preset = Preset::read(&path).unwrap();
        assert_eq!(preset.name, "Proxies");
        assert_eq!(preset.tasks.len(), 2);
        assert_eq!(preset.tasks[0].dependson, None);
        assert_eq!(preset.tasks[0].documentation.len(), 2);
        assert_eq!(preset.tasks[1].dependson.as_deref(), Some("prores"));
    }

    #[test]
    fn missing_attributes_are_all_named() {
        let (_dir, path) = write_preset(
            r#"{"name": "Broken", "tasks": [{"name": "half a task", "command": "cp"}]}"#,
        );
        let err = Preset::read(&path).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("half a task"), "{msg}");
        assert!(msg.contains("id"), "{msg}");
        assert!(msg.contains("extension"), "{msg}");
        assert!(msg.contains("arguments"), "{msg}");
        assert!(err.downcast_ref::<PresetInvalid>().is_some());
    }

    #[test]
    fn forward_dependson_reference_is_rejected() {
        let (_dir, path) = write_preset(
            r#"{"name": "Fwd", "tasks": [
                {"id": "a", "name": "A", "command": "true", "extension": "out",
                 "arguments": "x", "dependson": "b"},
                {"id": "b", "name": "B", "command": "true", "extension": "out",
                 "arguments": "x"}
            ]}"#,
        );
        let err = Preset::read(&path).unwrap_err();
        assert!(format!("{err}").contains("can not be found"), "{err}");
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let (_dir, path) = write_preset(
            r#"{"name": "Dup", "tasks": [
                {"id": "a", "name": "A", "command": "true", "extension": "out", "arguments": "x"},
                {"id": "a", "name": "A again", "command": "true", "extension": "out", "arguments": "x"}
            ]}"#,
        );
        let err = Preset::read(&path).unwrap_err();
        assert!(format!("{err}").contains("reuses id"), "{err}");
    }

    #[test]
    fn invalid_json_reports_position() {
        let (_dir, path) = write_preset("{ not json");
        let err = Preset::read(&path).unwrap_err();
        assert!(format!("{err}").contains("failed to parse preset"), "{err}");
    }

    #[test]
    fn substitution_replaces_all_eight_variables() {
        let vars = Substitution::input(Path::new("/media/in/clip.mov"))
            .with_output(Path::new("/media/out/clip.mxf"));
        assert_eq!(vars.apply("%inputdir%"), "/media/in");
        assert_eq!(vars.apply("%inputfile%"), "/media/in/clip.mov");
        assert_eq!(vars.apply("%inputext%"), "mov");
        assert_eq!(vars.apply("%inputbase%"), "clip");
        assert_eq!(vars.apply("%outputdir%"), "/media/out");
        assert_eq!(vars.apply("%outputfile%"), "/media/out/clip.mxf");
        assert_eq!(vars.apply("%outputext%"), "mxf");
        assert_eq!(vars.apply("%outputbase%"), "clip");
        assert_eq!(
            vars.apply("-i %inputfile% -o %outputfile%"),
            "-i /media/in/clip.mov -o /media/out/clip.mxf"
        );
    }

    #[test]
    fn substitution_without_extension() {
        let vars = Substitution::input(Path::new("/data/README"));
        assert_eq!(vars.apply("%inputext%"), "");
        assert_eq!(vars.apply("%inputbase%"), "README");
    }
}
