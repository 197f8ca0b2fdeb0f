//! The job record: one scheduled invocation of an external command.
//!
//! A [`Job`] is shared between the queue's control plane, the worker that
//! runs it, and observers, so every field sits behind the job's own mutex.
//! Getters return by-value snapshots; setters emit a [`FieldChange`] event
//! through the queue's notification channel, but only when the value actually
//! changed; duplicate assignments are dropped to prevent observer storms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use ulid::Ulid;

use crate::event::{FieldChange, Notice, NoticeSender};

/// Unique job identifier, assigned once at construction.
pub type JobId = Ulid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Waiting,
    Running,
    Completed,
    Failed,
    /// A downstream job failed; this prerequisite is flagged so the chain can
    /// be explained. Reached only via the upward cascade.
    Dependency,
    /// Paused by the user. Reachable only from `Running`.
    Stopped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Waiting => "Waiting",
            Status::Running => "Running",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Dependency => "Dependency",
            Status::Stopped => "Stopped",
        }
    }
}

/// Named priority tiers. The queue orders by the raw integer, higher first;
/// these are the values the CLI exposes by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn value(self) -> i32 {
        match self {
            Priority::Critical => 1000,
            Priority::High => 100,
            Priority::Medium => 10,
            Priority::Low => 0,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Process-wide monotonic sequence used for scheduling tie-breaks.
fn next_seq() -> u64 {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Default)]
struct Fields {
    task_id: String,
    name: String,
    filename: String,
    command: String,
    arguments: Vec<String>,
    startin: String,
    output: String,
    dependson: Option<JobId>,
    pid: u32,
    priority: i32,
    log: String,
}

/// By-value copy of a job at one point in time.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub uuid: JobId,
    pub created_at: String,
    pub task_id: String,
    pub name: String,
    pub filename: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub startin: String,
    pub output: String,
    pub dependson: Option<JobId>,
    pub pid: u32,
    pub priority: i32,
    pub status: Status,
    pub log: String,
}

#[derive(Debug)]
pub struct Job {
    uuid: JobId,
    seq: u64,
    created_at: String,
    status: Mutex<Status>,
    fields: Mutex<Fields>,
    notices: OnceLock<NoticeSender>,
}

impl Job {
    pub fn new() -> Job {
        Job {
            uuid: Ulid::new(),
            seq: next_seq(),
            created_at: now_rfc3339(),
            status: Mutex::new(Status::Waiting),
            fields: Mutex::new(Fields::default()),
            notices: OnceLock::new(),
        }
    }

    pub fn uuid(&self) -> JobId {
        self.uuid
    }

    /// Monotonic creation sequence; earlier submissions win priority ties.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn created_at(&self) -> String {
        self.created_at.clone()
    }

    /// Wire the job into the queue's notification channel. Called once at
    /// submit; setters are silent until then.
    pub(crate) fn attach(&self, notices: NoticeSender) {
        let _ = self.notices.set(notices);
    }

    fn emit(&self, change: FieldChange) {
        if let Some(tx) = self.notices.get() {
            let _ = tx.send(Notice::Field(self.uuid, change));
        }
    }

    pub fn task_id(&self) -> String {
        self.fields.lock().unwrap().task_id.clone()
    }

    pub fn set_task_id(&self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        let mut f = self.fields.lock().unwrap();
        if f.task_id != task_id {
            f.task_id = task_id.clone();
            drop(f);
            self.emit(FieldChange::TaskId(task_id));
        }
    }

    pub fn name(&self) -> String {
        self.fields.lock().unwrap().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut f = self.fields.lock().unwrap();
        if f.name != name {
            f.name = name.clone();
            drop(f);
            self.emit(FieldChange::Name(name));
        }
    }

    pub fn filename(&self) -> String {
        self.fields.lock().unwrap().filename.clone()
    }

    pub fn set_filename(&self, filename: impl Into<String>) {
        let filename = filename.into();
        let mut f = self.fields.lock().unwrap();
        if f.filename != filename {
            f.filename = filename.clone();
            drop(f);
            self.emit(FieldChange::Filename(filename));
        }
    }

    pub fn command(&self) -> String {
        self.fields.lock().unwrap().command.clone()
    }

    pub fn set_command(&self, command: impl Into<String>) {
        let command = command.into();
        let mut f = self.fields.lock().unwrap();
        if f.command != command {
            f.command = command.clone();
            drop(f);
            self.emit(FieldChange::Command(command));
        }
    }

    pub fn arguments(&self) -> Vec<String> {
        self.fields.lock().unwrap().arguments.clone()
    }

    pub fn set_arguments(&self, arguments: Vec<String>) {
        let mut f = self.fields.lock().unwrap();
        if f.arguments != arguments {
            f.arguments = arguments.clone();
            drop(f);
            self.emit(FieldChange::Arguments(arguments));
        }
    }

    pub fn startin(&self) -> String {
        self.fields.lock().unwrap().startin.clone()
    }

    pub fn set_startin(&self, startin: impl Into<String>) {
        let startin = startin.into();
        let mut f = self.fields.lock().unwrap();
        if f.startin != startin {
            f.startin = startin.clone();
            drop(f);
            self.emit(FieldChange::Startin(startin));
        }
    }

    pub fn output(&self) -> String {
        self.fields.lock().unwrap().output.clone()
    }

    pub fn set_output(&self, output: impl Into<String>) {
        let output = output.into();
        let mut f = self.fields.lock().unwrap();
        if f.output != output {
            f.output = output.clone();
            drop(f);
            self.emit(FieldChange::Output(output));
        }
    }

    pub fn dependson(&self) -> Option<JobId> {
        self.fields.lock().unwrap().dependson
    }

    /// Immutable once the job is submitted; expansion sets it before handing
    /// the job over.
    pub fn set_dependson(&self, dependson: JobId) {
        let mut f = self.fields.lock().unwrap();
        if f.dependson != Some(dependson) {
            f.dependson = Some(dependson);
            drop(f);
            self.emit(FieldChange::Dependson(dependson));
        }
    }

    pub fn pid(&self) -> u32 {
        self.fields.lock().unwrap().pid
    }

    pub fn set_pid(&self, pid: u32) {
        let mut f = self.fields.lock().unwrap();
        if f.pid != pid {
            f.pid = pid;
            drop(f);
            self.emit(FieldChange::Pid(pid));
        }
    }

    pub fn priority(&self) -> i32 {
        self.fields.lock().unwrap().priority
    }

    pub fn set_priority(&self, priority: i32) {
        let mut f = self.fields.lock().unwrap();
        if f.priority != priority {
            f.priority = priority;
            drop(f);
            self.emit(FieldChange::Priority(priority));
        }
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: Status) {
        let mut s = self.status.lock().unwrap();
        if *s != status {
            *s = status;
            drop(s);
            self.emit(FieldChange::Status(status));
        }
    }

    pub fn log(&self) -> String {
        self.fields.lock().unwrap().log.clone()
    }

    pub fn set_log(&self, log: impl Into<String>) {
        let log = log.into();
        let mut f = self.fields.lock().unwrap();
        if f.log != log {
            f.log = log.clone();
            drop(f);
            self.emit(FieldChange::Log(log));
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let status = self.status();
        let f = self.fields.lock().unwrap();
        JobSnapshot {
            uuid: self.uuid,
            created_at: self.created_at.clone(),
            task_id: f.task_id.clone(),
            name: f.name.clone(),
            filename: f.filename.clone(),
            command: f.command.clone(),
            arguments: f.arguments.clone(),
            startin: f.startin.clone(),
            output: f.output.clone(),
            dependson: f.dependson,
            pid: f.pid,
            priority: f.priority,
            status,
            log: f.log.clone(),
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Job::new()
    }
}

/// Current time as an RFC 3339 UTC string.
pub fn now_rfc3339() -> String {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_rfc3339(d.as_secs())
}

fn format_rfc3339(secs: u64) -> String {
    let mut s = secs;
    let seconds = s % 60;
    s /= 60;
    let minutes = s % 60;
    s /= 60;
    let hours = s % 24;
    s /= 24;

    // Days since 1970-01-01
    let mut days = s;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let leap = is_leap(year);
    let month_days: [u64; 12] = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 0usize;
    for (i, &d) in month_days.iter().enumerate() {
        if days < d {
            month = i;
            break;
        }
        days -= d;
    }
    let day = days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month + 1,
        day,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(year: u64) -> bool {
    (year.is_multiple_of(4) && !year.is_multiple_of(100)) || year.is_multiple_of(400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Notice;
    use std::sync::mpsc;

    #[test]
    fn rfc3339_epoch() {
        assert_eq!(format_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn rfc3339_known_date() {
        // 2024-01-01T00:00:00Z = 1704067200
        assert_eq!(format_rfc3339(1704067200), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn seq_is_monotonic() {
        let a = Job::new();
        let b = Job::new();
        assert!(a.seq() < b.seq());
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn setters_are_silent_before_attach() {
        let job = Job::new();
        job.set_name("convert");
        job.set_status(Status::Failed);
        assert_eq!(job.name(), "convert");
        assert_eq!(job.status(), Status::Failed);
    }

    #[test]
    fn duplicate_status_assignment_emits_once() {
        let job = Job::new();
        let (tx, rx) = mpsc::channel();
        job.attach(tx);
        job.set_status(Status::Running);
        job.set_status(Status::Running);
        let mut status_events = 0;
        while let Ok(notice) = rx.try_recv() {
            if matches!(
                notice,
                Notice::Field(_, crate::event::FieldChange::Status(_))
            ) {
                status_events += 1;
            }
        }
        assert_eq!(status_events, 1);
    }

    #[test]
    fn snapshot_copies_all_fields() {
        let job = Job::new();
        job.set_name("proxy");
        job.set_command("ffmpeg");
        job.set_arguments(vec!["-i".into(), "in.mov".into()]);
        job.set_priority(Priority::High.value());
        let snap = job.snapshot();
        assert_eq!(snap.uuid, job.uuid());
        assert_eq!(snap.name, "proxy");
        assert_eq!(snap.command, "ffmpeg");
        assert_eq!(snap.arguments, vec!["-i".to_string(), "in.mov".to_string()]);
        assert_eq!(snap.priority, 100);
        assert_eq!(snap.status, Status::Waiting);
        assert_eq!(snap.pid, 0);
    }
}
