//! Lifecycle event surface.
//!
//! Observers subscribe to the queue and receive [`Event`] values over a plain
//! mpsc channel. All delivery happens on the queue's dispatcher thread, so for
//! a single observer events arrive in a stable order: `Submitted` before any
//! field change of that job, and `Removed` last, with nothing after it.

use std::sync::mpsc;

use crate::job::{JobId, JobSnapshot, Status};

/// A change to a single job field, carried by [`Event::FieldChanged`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    TaskId(String),
    Name(String),
    Filename(String),
    Command(String),
    Arguments(Vec<String>),
    Startin(String),
    Output(String),
    Dependson(JobId),
    Pid(u32),
    Priority(i32),
    Status(Status),
    Log(String),
}

/// Lifecycle events published by the queue.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job entered the queue. The snapshot reflects the job at submit time.
    Submitted(JobSnapshot),
    /// A job reached a final decision for progress purposes. Stopped jobs do
    /// not emit this; removed jobs emit it once, right before `Removed`.
    Processed(JobId),
    /// The job's record has been dropped from the registry. Final event for
    /// that uuid.
    Removed(JobId),
    /// One field of a live job changed.
    FieldChanged(JobId, FieldChange),
}

/// Internal notification fed to the queue's dispatcher thread. Job setters
/// and workers produce these; the dispatcher turns them into [`Event`]s and
/// runs the status-change bookkeeping.
#[derive(Debug)]
pub(crate) enum Notice {
    Submitted(JobSnapshot),
    Field(JobId, FieldChange),
    /// A worker finished with the given final status.
    Finished(JobId, Status),
    /// A job was removed; deliver the final `Processed` + `Removed` pair.
    Removed(JobId),
    Shutdown,
}

pub(crate) type NoticeSender = mpsc::Sender<Notice>;
