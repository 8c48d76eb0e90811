// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::server::conn::dispatch;
use crate::server::registry::Disposition;
use crate::server::Shared;

/// Counting semaphore. Posted once for every record moved to the working
/// list, and once per worker at shutdown to release them.
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }
}

/// A fixed-size pool draining the working list.
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(num_workers: usize, shared: Arc<Shared>) -> Self {
        let mut handles = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("rpc-worker-{index}"))
                .spawn(move || worker_loop(&shared))
                // Failure to stand up the pool leaves the server unable to
                // make progress, so it takes the whole run down.
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self { shared, handles }
    }

    /// Release every worker and join them. Workers observe the cleared
    /// running flag after their semaphore wakeup and exit; an in-flight
    /// handler runs to completion first.
    pub fn shutdown(self) {
        for _ in &self.handles {
            self.shared.sem.post();
        }

        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        shared.sem.wait();

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let record = {
            let mut lists = shared.lists.lock().unwrap();
            lists.take_first_working()
        };

        let Some(mut record) = record else {
            continue;
        };

        match dispatch(&mut record, shared) {
            Disposition::Keep => {
                {
                    let mut lists = shared.lists.lock().unwrap();
                    lists.pending.push(record);
                }
                // The loop is parked on a snapshot that does not include this
                // record; one byte on the self-pipe makes it re-evaluate.
                shared.wake();
            }
            Disposition::Drop => drop(record),
        }
    }

    trace!("worker exiting");
}
