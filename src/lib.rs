//! jobq: dependency-aware job queue with preset-driven expansion.
//!
//! A preset file describes a list of task templates; expansion turns each
//! dropped input file into a graph of concrete jobs; the queue orders and
//! runs them on a bounded worker pool, enforcing dependency edges and
//! publishing lifecycle events to observers.

pub mod config;
pub mod event;
pub mod expand;
pub mod job;
pub mod pool;
pub mod preset;
pub mod process;
pub mod queue;
pub mod report;
