//! Preset loading and expansion against a live queue.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use jobq::event::Event;
use jobq::expand::{self, ExpandOptions};
use jobq::job::{JobSnapshot, Status};
use jobq::preset::{Preset, Task};
use jobq::queue::Queue;

const DEADLINE: Duration = Duration::from_secs(20);

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn copy_then_list_preset(dir: &Path) -> Preset {
    let path = write_file(
        dir,
        "preset.json",
        r#"{
            "name": "Copy and list",
            "tasks": [
                {
                    "id": "copy",
                    "name": "Copy input",
                    "command": "cp",
                    "extension": "copy",
                    "arguments": "%inputfile% %outputfile%",
                    "startin": ""
                },
                {
                    "id": "list",
                    "name": "List output",
                    "command": "ls",
                    "extension": "txt",
                    "arguments": "%outputdir%",
                    "dependson": "copy"
                }
            ]
        }"#,
    );
    Preset::read(&path).unwrap()
}

fn drain_until_processed(events: &Receiver<Event>, count: usize) -> Vec<JobSnapshot> {
    let mut submitted = Vec::new();
    let mut processed = 0;
    while processed < count {
        match events.recv_timeout(DEADLINE).expect("event") {
            Event::Submitted(snapshot) => submitted.push(snapshot),
            Event::Processed(_) => processed += 1,
            _ => {}
        }
    }
    submitted
}

#[test]
fn expansion_submits_wires_and_runs_a_chain() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "clip.txt", "payload");
    let preset = copy_then_list_preset(dir.path());
    let output = dir.path().join("out");

    let queue = Queue::new();
    let events = queue.subscribe();
    let expansion = expand::expand(
        &queue,
        &preset,
        &[input],
        &ExpandOptions {
            output: output.clone(),
            create_folders: false,
            priority: 10,
        },
    );
    assert_eq!(expansion.submitted, 2);
    assert!(expansion.unresolved.is_empty());

    let submitted = drain_until_processed(&events, 2);
    assert_eq!(submitted.len(), 2);
    let copy = submitted.iter().find(|s| s.task_id == "copy").unwrap();
    let list = submitted.iter().find(|s| s.task_id == "list").unwrap();

    // The task-level dependson was rewritten into the parent job's uuid.
    assert_eq!(copy.dependson, None);
    assert_eq!(list.dependson, Some(copy.uuid));
    assert_eq!(copy.priority, 10);

    // Substitution produced real paths and the chain actually ran.
    assert_eq!(
        copy.arguments,
        vec![
            dir.path().join("clip.txt").display().to_string(),
            output.join("clip.copy").display().to_string(),
        ]
    );
    assert!(output.join("clip.copy").is_file());
    assert_eq!(queue.snapshot(copy.uuid).unwrap().status, Status::Completed);
    assert_eq!(queue.snapshot(list.uuid).unwrap().status, Status::Completed);
}

#[test]
fn create_folders_gives_each_input_its_own_directory() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "clip.txt", "payload");
    let preset = copy_then_list_preset(dir.path());
    let output = dir.path().join("out");

    let queue = Queue::new();
    let events = queue.subscribe();
    let expansion = expand::expand(
        &queue,
        &preset,
        &[input],
        &ExpandOptions {
            output: output.clone(),
            create_folders: true,
            priority: 10,
        },
    );
    assert_eq!(expansion.submitted, 2);

    let submitted = drain_until_processed(&events, 2);
    let copy = submitted.iter().find(|s| s.task_id == "copy").unwrap();
    assert_eq!(copy.output, output.join("clip").display().to_string());
    assert!(output.join("clip").join("clip.copy").is_file());
}

#[test]
fn each_input_file_expands_independently() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_file(dir.path(), "first.txt", "1");
    let second = write_file(dir.path(), "second.txt", "2");
    let preset = copy_then_list_preset(dir.path());
    let output = dir.path().join("out");

    let queue = Queue::new();
    let events = queue.subscribe();
    let expansion = expand::expand(
        &queue,
        &preset,
        &[first.clone(), second.clone()],
        &ExpandOptions {
            output: output.clone(),
            create_folders: true,
            priority: 10,
        },
    );
    assert_eq!(expansion.submitted, 4);

    let submitted = drain_until_processed(&events, 4);
    for input in [&first, &second] {
        let filename = input.display().to_string();
        let copy = submitted
            .iter()
            .find(|s| s.task_id == "copy" && s.filename == filename)
            .unwrap();
        let list = submitted
            .iter()
            .find(|s| s.task_id == "list" && s.filename == filename)
            .unwrap();
        // Dependencies stay within one file's expansion.
        assert_eq!(list.dependson, Some(copy.uuid));
    }
    assert!(output.join("first").join("first.copy").is_file());
    assert!(output.join("second").join("second.copy").is_file());
}

#[test]
fn unresolved_dependency_is_failed_and_never_submitted() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "clip.txt", "payload");

    // Built by hand to bypass validation: a preset file could never carry an
    // unknown dependson, but expansion still guards against it.
    let preset = Preset {
        name: "Ghost".into(),
        filename: PathBuf::from("ghost.json"),
        tasks: vec![Task {
            id: "orphan".into(),
            name: "Orphan".into(),
            command: "true".into(),
            extension: "out".into(),
            arguments: "%inputfile%".into(),
            startin: String::new(),
            dependson: Some("ghost".into()),
            documentation: Vec::new(),
        }],
    };

    let queue = Queue::new();
    let expansion = expand::expand(
        &queue,
        &preset,
        &[input],
        &ExpandOptions {
            output: dir.path().join("out"),
            create_folders: false,
            priority: 10,
        },
    );
    assert_eq!(expansion.submitted, 0);
    assert_eq!(expansion.unresolved.len(), 1);

    let orphan = &expansion.unresolved[0];
    assert_eq!(orphan.status(), Status::Failed);
    assert!(
        orphan.log().contains("dependency could not be resolved"),
        "{}",
        orphan.log()
    );
    assert!(queue.snapshot(orphan.uuid()).is_none());
}

#[test]
fn extension_template_substitutes_input_variables() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "clip.mov", "payload");
    let path = write_file(
        dir.path(),
        "ext.json",
        r#"{
            "name": "Extension echo",
            "tasks": [
                {
                    "id": "tag",
                    "name": "Tag by input extension",
                    "command": "true",
                    "extension": "%inputext%.bak",
                    "arguments": "%outputfile%"
                }
            ]
        }"#,
    );
    let preset = Preset::read(&path).unwrap();
    let output = dir.path().join("out");

    let queue = Queue::new();
    let events = queue.subscribe();
    let expansion = expand::expand(
        &queue,
        &preset,
        &[input],
        &ExpandOptions {
            output: output.clone(),
            create_folders: false,
            priority: 0,
        },
    );
    assert_eq!(expansion.submitted, 1);
    let submitted = drain_until_processed(&events, 1);
    assert_eq!(
        submitted[0].arguments,
        vec![output.join("clip.mov.bak").display().to_string()]
    );
}
