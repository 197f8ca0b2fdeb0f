//! Scheduler core: admits, orders, dispatches, tracks, cancels, restarts and
//! removes jobs, enforcing dependency edges between them.
//!
//! All bookkeeping lives behind one coarse mutex. Workers never hold that
//! mutex while doing I/O; they touch jobs only through the job's own
//! thread-safe setters. Status bookkeeping and event delivery run serialized
//! on a single dispatcher thread, so observers see a coherent stream.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::event::{Event, Notice};
use crate::job::{Job, JobId, JobSnapshot, Status};
use crate::pool::WorkerPool;
use crate::process::{ExitKind, Process};

/// The job queue. Owns every submitted job until it is removed; callers and
/// observers refer to jobs by uuid.
pub struct Queue {
    inner: Arc<Inner>,
    dispatcher: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<State>,
    pool: WorkerPool,
    notices: Sender<Notice>,
    subscribers: Mutex<Vec<Sender<Event>>>,
}

#[derive(Default)]
struct State {
    all: HashMap<JobId, Arc<Job>>,
    waiting: Vec<Arc<Job>>,
    dependents: HashMap<JobId, Vec<Arc<Job>>>,
    completed: HashSet<JobId>,
    /// Tombstones for removed uuids; late worker notifications for these are
    /// dropped. Cleared at the next submission boundary.
    removed: HashSet<JobId>,
    search_paths: Vec<PathBuf>,
    threads: usize,
    active: usize,
}

impl Queue {
    /// A queue with a single worker; grow it with [`Queue::set_threads`].
    pub fn new() -> Queue {
        Queue::with_threads(1)
    }

    pub fn with_threads(threads: usize) -> Queue {
        let threads = threads.max(1);
        let (tx, rx) = mpsc::channel();
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                threads,
                ..State::default()
            }),
            pool: WorkerPool::new(threads),
            notices: tx,
            subscribers: Mutex::new(Vec::new()),
        });
        let dispatcher = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || dispatch_loop(inner, rx))
        };
        Queue {
            inner,
            dispatcher: Some(dispatcher),
        }
    }

    /// Register an observer. Events arrive on the returned channel in
    /// dispatch order; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.inner.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Directories consulted when resolving bare command names at worker
    /// start. Changing them affects jobs that have not started yet.
    pub fn set_search_paths(&self, paths: Vec<PathBuf>) {
        self.inner.state.lock().unwrap().search_paths = paths;
    }

    pub fn threads(&self) -> usize {
        self.inner.state.lock().unwrap().threads
    }

    /// Resize the worker pool and try to dispatch.
    pub fn set_threads(&self, threads: usize) {
        let threads = threads.max(1);
        self.inner.pool.resize(threads);
        self.inner.state.lock().unwrap().threads = threads;
        info!(threads, "worker pool resized");
        schedule(&self.inner);
    }

    /// A by-value copy of the job, if it is still registered.
    pub fn snapshot(&self, uuid: JobId) -> Option<JobSnapshot> {
        let state = self.inner.state.lock().unwrap();
        state.all.get(&uuid).map(|job| job.snapshot())
    }

    /// Admit a job. Jobs with a satisfied (or absent) dependency become
    /// eligible immediately; the rest wait under their parent's uuid.
    pub fn submit(&self, job: Arc<Job>) -> JobId {
        let uuid = job.uuid();
        {
            let mut state = self.inner.state.lock().unwrap();
            // Submission boundary: all notifications for removed uuids have
            // drained by now, so the tombstones can go.
            state.removed.clear();
            job.set_log(log_banner(&job));
            match job.dependson() {
                Some(parent) if !state.completed.contains(&parent) => {
                    state.dependents.entry(parent).or_default().push(Arc::clone(&job));
                }
                _ => state.waiting.push(Arc::clone(&job)),
            }
            state.all.insert(uuid, Arc::clone(&job));
            job.attach(self.inner.notices.clone());
            let _ = self.inner.notices.send(Notice::Submitted(job.snapshot()));
        }
        debug!(%uuid, "job submitted");
        schedule(&self.inner);
        uuid
    }

    /// Resume a stopped job: back to the eligible set with a fresh log banner.
    pub fn start(&self, uuid: JobId) {
        let mut started = false;
        {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(job) = state.all.get(&uuid).cloned()
                && job.status() == Status::Stopped
            {
                job.set_status(Status::Waiting);
                job.set_log(log_banner(&job));
                state.waiting.push(job);
                started = true;
            }
        }
        if started {
            debug!(%uuid, "job resumed");
            schedule(&self.inner);
        }
    }

    /// Stop a running job. The status flips to `Stopped` before the kill so
    /// the worker, when its wait returns, knows this was a stop rather than a
    /// crash and does not cascade a dependency failure.
    pub fn stop(&self, uuid: JobId) {
        {
            let state = self.inner.state.lock().unwrap();
            if let Some(job) = state.all.get(&uuid)
                && job.status() == Status::Running
            {
                job.set_status(Status::Stopped);
                let pid = job.pid();
                if pid > 0 {
                    Process::kill_pid(pid);
                }
                job.set_log(log_banner(job));
                debug!(%uuid, pid, "job stopped");
            }
        }
        schedule(&self.inner);
    }

    /// Re-queue a job and, transitively, everything that depends on it.
    /// Running jobs are left alone.
    pub fn restart(&self, uuid: JobId) {
        {
            let mut state = self.inner.state.lock().unwrap();
            restart_recursive(&mut state, uuid);
        }
        debug!(%uuid, "job restarted");
        schedule(&self.inner);
    }

    /// Drop the job and every transitive dependent from the registry, killing
    /// any that are running. Each removed uuid gets a final `processed` +
    /// `removed` pair and a tombstone that mutes later notifications.
    pub fn remove(&self, uuid: JobId) {
        let mut state = self.inner.state.lock().unwrap();
        remove_recursive(&mut state, uuid, &self.inner.notices);
    }
}

impl Default for Queue {
    fn default() -> Self {
        Queue::new()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Drain in-flight work, then stop delivery.
        self.inner.pool.shutdown();
        let _ = self.inner.notices.send(Notice::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

fn log_banner(job: &Job) -> String {
    format!(
        "Uuid:\n{}\n\nCommand:\n{} {}\n",
        job.uuid(),
        job.command(),
        job.arguments().join(" ")
    )
}

fn restart_recursive(state: &mut State, uuid: JobId) {
    let Some(job) = state.all.get(&uuid).cloned() else {
        return;
    };
    if job.status() == Status::Running {
        return;
    }
    job.set_status(Status::Waiting);
    match job.dependson() {
        None => {
            if !state.waiting.iter().any(|j| j.uuid() == uuid) {
                state.waiting.push(Arc::clone(&job));
            }
        }
        Some(parent) => {
            let bucket = state.dependents.entry(parent).or_default();
            if !bucket.iter().any(|j| j.uuid() == uuid) {
                bucket.push(Arc::clone(&job));
            }
        }
    }
    job.set_log(log_banner(&job));
    let children: Vec<JobId> = state
        .all
        .values()
        .filter(|j| j.dependson() == Some(uuid))
        .map(|j| j.uuid())
        .collect();
    for child in children {
        restart_recursive(state, child);
    }
}

fn remove_recursive(state: &mut State, uuid: JobId, notices: &Sender<Notice>) {
    let Some(job) = state.all.remove(&uuid) else {
        return;
    };
    state.removed.insert(uuid);
    if job.status() == Status::Running {
        let pid = job.pid();
        if pid > 0 {
            Process::kill_pid(pid);
        }
    }
    let children: Vec<JobId> = state
        .all
        .values()
        .filter(|j| j.dependson() == Some(uuid))
        .map(|j| j.uuid())
        .collect();
    state.dependents.remove(&uuid);
    state.waiting.retain(|j| j.uuid() != uuid);
    state.completed.remove(&uuid);
    let _ = notices.send(Notice::Removed(uuid));
    debug!(%uuid, "job removed");
    for child in children {
        remove_recursive(state, child, notices);
    }
}

impl Inner {
    fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn is_removed(&self, uuid: JobId) -> bool {
        self.state.lock().unwrap().removed.contains(&uuid)
    }
}

/// Scheduling pass: hand as many eligible jobs to the pool as there are free
/// slots, highest priority first, ties broken by earliest creation.
fn schedule(inner: &Arc<Inner>) {
    let mut picked = Vec::new();
    {
        let mut state = inner.state.lock().unwrap();
        let free = state.threads.saturating_sub(state.active);
        for _ in 0..free {
            match take_next(&mut state) {
                Some(job) => picked.push(job),
                None => break,
            }
        }
        state.active += picked.len();
    }
    for job in picked {
        let task_inner = Arc::clone(inner);
        inner.pool.execute(move || {
            process_job(&task_inner, &job);
            // Release the slot before the finished notification so the next
            // pass sees it free.
            {
                let mut state = task_inner.state.lock().unwrap();
                state.active -= 1;
            }
            let _ = task_inner
                .notices
                .send(Notice::Finished(job.uuid(), job.status()));
        });
    }
}

fn take_next(state: &mut State) -> Option<Arc<Job>> {
    let mut best: Option<usize> = None;
    for (index, job) in state.waiting.iter().enumerate() {
        if job.status() != Status::Waiting {
            continue;
        }
        match best {
            None => best = Some(index),
            Some(current) => {
                let chosen = &state.waiting[current];
                if job.priority() > chosen.priority()
                    || (job.priority() == chosen.priority() && job.seq() < chosen.seq())
                {
                    best = Some(index);
                }
            }
        }
    }
    best.map(|index| state.waiting.remove(index))
}

/// Worker body: resolve, verify, spawn, wait, record. Runs on a pool thread
/// with no queue lock held during I/O.
fn process_job(inner: &Arc<Inner>, job: &Arc<Job>) {
    let mut log = job.log();
    let mut command = job.command();
    let absolute = Path::new(&command).is_absolute();
    if absolute && !Path::new(&command).exists() {
        log.push_str(&format!(
            "\nCommand error:\nCommand path could not be found: {command}\n"
        ));
        job.set_status(Status::Failed);
    } else {
        if !absolute {
            // Bare name: the first match on the configured search paths wins;
            // otherwise the name is left for $PATH lookup.
            let search_paths = inner.state.lock().unwrap().search_paths.clone();
            for dir in search_paths {
                let candidate = dir.join(&command);
                if candidate.exists() {
                    command = candidate.display().to_string();
                    break;
                }
            }
        }
        job.set_status(Status::Running);
        let output = job.output();
        match ensure_output_dir(&output) {
            Err(message) => {
                log.push_str(&format!("\nStatus:\n{message}\n"));
                job.set_status(Status::Failed);
            }
            Ok(()) => {
                let mut failed = false;
                let mut stopped = false;
                let mut standard_output = String::new();
                let mut standard_error = String::new();
                let mut process = Process::new();
                if Process::exists(&command) {
                    match process.run(&command, &job.arguments(), &job.startin()) {
                        Ok(pid) => {
                            job.set_pid(pid);
                            log.push_str(&format!("\nProcess id:\n{pid}\n"));
                            job.set_log(log.clone());
                            let success = process.wait();
                            job.set_pid(0);
                            if success {
                                job.set_status(Status::Completed);
                                log.push_str("\nStatus:\nCommand completed\n");
                            } else if job.status() == Status::Stopped {
                                // A concurrent stop won the race; leave it.
                                stopped = true;
                            } else {
                                failed = true;
                            }
                            standard_output = process.stdout().to_string();
                            standard_error = process.stderr().to_string();
                        }
                        Err(err) => {
                            standard_error = format!("{err:#}");
                            failed = true;
                        }
                    }
                } else {
                    standard_error = "Command does not exist, make sure command can be \
                                      found in system or application search paths"
                        .to_string();
                    failed = true;
                }
                if failed {
                    log.push_str("\nStatus:\nCommand failed\n");
                    log.push_str(&format!("\nExit code:\n{}\n", process.exit_code()));
                    let kind = match process.exit_kind() {
                        ExitKind::Normal => "Normal",
                        ExitKind::Crash => "Crash",
                    };
                    log.push_str(&format!("\nExit status:\n{kind}\n"));
                    job.set_status(Status::Failed);
                }
                if stopped {
                    log.push_str("\nStatus:\nCommand stopped\n");
                }
                if !standard_output.is_empty() {
                    log.push_str(&format!("\nCommand output:\n{standard_output}"));
                }
                if !standard_error.is_empty() {
                    log.push_str(&format!("\nCommand error:\n{standard_error}"));
                }
            }
        }
    }
    job.set_log(log);
    if job.status() == Status::Failed
        && let Some(parent) = job.dependson()
    {
        mark_completed_ancestors(inner, job.uuid(), parent);
    }
}

fn ensure_output_dir(output: &str) -> Result<(), String> {
    if output.is_empty() {
        return Ok(());
    }
    let path = Path::new(output);
    if !path.exists() {
        std::fs::create_dir_all(path)
            .map_err(|_| format!("Could not create directory: {output}"))
    } else if !path.is_dir() {
        Err(format!("Output exists but is not a directory: {output}"))
    } else {
        Ok(())
    }
}

/// Upward cascade: when a job fails, flag every ancestor in the chain that is
/// currently `Completed` as `Dependency`, so the dead branch can be explained.
fn mark_completed_ancestors(inner: &Arc<Inner>, failed: JobId, parent: JobId) {
    let state = inner.state.lock().unwrap();
    let mut child = failed;
    let mut current = parent;
    while let Some(job) = state.all.get(&current) {
        if job.status() == Status::Completed {
            let mut log = job.log();
            log.push_str(&format!("\nDependent error:\nDependent job failed: {child}\n"));
            job.set_log(log);
            job.set_status(Status::Dependency);
        }
        match job.dependson() {
            Some(next) => {
                child = current;
                current = next;
            }
            None => break,
        }
    }
}

/// Dispatcher: turns notices into observer events and runs the status-change
/// bookkeeping, serialized on this one thread.
fn dispatch_loop(inner: Arc<Inner>, rx: Receiver<Notice>) {
    while let Ok(notice) = rx.recv() {
        match notice {
            Notice::Shutdown => break,
            Notice::Submitted(snapshot) => inner.publish(Event::Submitted(snapshot)),
            Notice::Field(uuid, change) => {
                if !inner.is_removed(uuid) {
                    inner.publish(Event::FieldChanged(uuid, change));
                }
            }
            Notice::Removed(uuid) => {
                // Final pair for a removed job: progress, then the tombstone
                // event. Nothing for this uuid is delivered afterwards.
                inner.publish(Event::Processed(uuid));
                inner.publish(Event::Removed(uuid));
            }
            Notice::Finished(uuid, status) => {
                handle_finished(&inner, uuid, status);
            }
        }
    }
}

fn handle_finished(inner: &Arc<Inner>, uuid: JobId, status: Status) {
    let mut events = Vec::new();
    {
        let mut state = inner.state.lock().unwrap();
        if !state.removed.contains(&uuid) {
            if status != Status::Stopped {
                events.push(Event::Processed(uuid));
            }
            match status {
                Status::Completed => {
                    state.completed.insert(uuid);
                    // Everything parked under this job becomes eligible.
                    if let Some(dependents) = state.dependents.remove(&uuid) {
                        debug!(%uuid, count = dependents.len(), "dependents released");
                        state.waiting.extend(dependents);
                    }
                }
                Status::Failed => {
                    fail_dependents(&mut state, uuid, &mut events);
                }
                _ => {}
            }
        } else {
            debug!(%uuid, "dropping notification for removed job");
        }
    }
    for event in events {
        inner.publish(event);
    }
    schedule(inner);
}

/// Downward cascade: a failed parent fails every dependent, recursively, each
/// with a log naming the parent and a final `processed`.
fn fail_dependents(state: &mut State, parent: JobId, events: &mut Vec<Event>) {
    if let Some(dependents) = state.dependents.remove(&parent) {
        for job in dependents {
            let log = format!(
                "Uuid:\n{}\n\nCommand:\n{} {}\n\nStatus:\nCommand cancelled, dependent job failed: {}\n",
                job.uuid(),
                job.command(),
                job.arguments().join(" "),
                parent
            );
            job.set_log(log);
            job.set_status(Status::Failed);
            events.push(Event::Processed(job.uuid()));
            fail_dependents(state, job.uuid(), events);
        }
    }
}
