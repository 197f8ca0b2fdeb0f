//! Bounded worker pool over OS threads.
//!
//! Tasks queue without bound; at most `size` run at once. Resizing grows the
//! pool immediately; shrinking retires workers as they go idle, because the
//! exit messages queue behind any work already submitted.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Exit,
}

pub struct WorkerPool {
    tx: Sender<Message>,
    rx: Arc<Mutex<Receiver<Message>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: Mutex<usize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> WorkerPool {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));
        let pool = WorkerPool {
            tx,
            rx,
            workers: Mutex::new(Vec::new()),
            size: Mutex::new(0),
        };
        pool.resize(size);
        pool
    }

    /// Queue a task; it runs as soon as a worker is free.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(Message::Run(Box::new(task)));
    }

    pub fn size(&self) -> usize {
        *self.size.lock().unwrap()
    }

    /// Grow or shrink the pool to `size` workers (at least one).
    pub fn resize(&self, size: usize) {
        let size = size.max(1);
        let mut current = self.size.lock().unwrap();
        if size > *current {
            let mut workers = self.workers.lock().unwrap();
            for _ in *current..size {
                workers.push(spawn_worker(Arc::clone(&self.rx)));
            }
        } else {
            for _ in size..*current {
                let _ = self.tx.send(Message::Exit);
            }
        }
        debug!(from = *current, to = size, "worker pool resized");
        *current = size;
    }

    /// Drain all queued work, then stop and join every worker.
    pub fn shutdown(&self) {
        let mut current = self.size.lock().unwrap();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for _ in 0..workers.len() {
            let _ = self.tx.send(Message::Exit);
        }
        *current = 0;
        drop(current);
        for worker in workers {
            let _ = worker.join();
        }
    }
}

fn spawn_worker(rx: Arc<Mutex<Receiver<Message>>>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let message = {
                let guard = rx.lock().unwrap();
                guard.recv()
            };
            match message {
                Ok(Message::Run(task)) => task(),
                Ok(Message::Exit) | Err(_) => break,
            }
        }
    })
}
