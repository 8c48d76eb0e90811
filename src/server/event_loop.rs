// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::sync::atomic::Ordering;

use crate::server::conn::dispatch;
use crate::server::registry::{Disposition, Record};
use crate::server::Shared;

/// Run the readiness loop until the running flag is cleared.
pub(crate) fn run(shared: &Shared, pooled: bool) {
    if pooled {
        run_pooled(shared);
    } else {
        run_inline(shared);
    }
}

/// Pool mode. Each iteration snapshots the pending list into a poll batch,
/// parks in poll(2) with no timeout, and then either rearms (self-pipe byte
/// or a stale snapshot) or moves the ready records to the working list for
/// the workers, posting the semaphore once per record.
fn run_pooled(shared: &Shared) {
    while shared.running.load(Ordering::SeqCst) {
        let fds: Vec<RawFd> = {
            let lists = shared.lists.lock().unwrap();
            lists.pending.iter().map(Record::fd).collect()
        };
        let batch_len = fds.len();

        let Some(batch) = poll_indefinitely(&fds) else {
            shared.running.store(false, Ordering::SeqCst);
            break;
        };

        let mut lists = shared.lists.lock().unwrap();

        // Slot 0 is the self-pipe sentinel. A byte there means the pending
        // list changed under the snapshot: drain it and start over.
        if batch.first().is_some_and(|slot| is_ready(slot)) {
            if let Some(Record::Wake(fd)) = lists.pending.first() {
                let mut byte = [0u8; 1];
                let _ = nix::unistd::read(fd, &mut byte);
            }
            continue;
        }

        // A handler already running in a worker may have re-parked or freed
        // records while we were polling; the length is a sufficient
        // staleness signal because nothing can shrink and regrow the list
        // between one poll and this check.
        if lists.pending.len() != batch_len {
            continue;
        }

        // Walk the pending list and the batch in lockstep, migrating every
        // ready record with a real handler to the working list.
        let mut moved = 0;
        let snapshot = std::mem::take(&mut lists.pending);
        for (record, slot) in snapshot.into_iter().zip(&batch) {
            if is_ready(slot) && !record.is_sentinel() {
                lists.working.push(record);
                moved += 1;
            } else {
                lists.pending.push(record);
            }
        }
        drop(lists);

        for _ in 0..moved {
            shared.sem.post();
        }
    }

    debug!("event loop exiting");
}

/// Single-threaded mode: no self-pipe, no semaphore. Ready handlers run
/// inline on the loop thread; the records migrate to a working set for the
/// duration of the sweep and survivors return to pending afterwards.
fn run_inline(shared: &Shared) {
    while shared.running.load(Ordering::SeqCst) {
        let fds: Vec<RawFd> = {
            let lists = shared.lists.lock().unwrap();
            lists.pending.iter().map(Record::fd).collect()
        };

        let Some(batch) = poll_indefinitely(&fds) else {
            shared.running.store(false, Ordering::SeqCst);
            break;
        };

        // Nothing else mutates the lists between the snapshot and here, so
        // the batch indices line up with the records one to one.
        let working = {
            let mut lists = shared.lists.lock().unwrap();
            std::mem::take(&mut lists.pending)
        };

        let mut survivors = Vec::with_capacity(working.len());
        for (index, mut record) in working.into_iter().enumerate() {
            let ready = batch.get(index).is_some_and(is_ready);
            if !ready {
                survivors.push(record);
                continue;
            }

            match dispatch(&mut record, shared) {
                Disposition::Keep => survivors.push(record),
                Disposition::Drop => drop(record),
            }
        }

        // Handlers may have appended fresh records (new connections) while
        // the sweep ran; they belong after the survivors, matching the order
        // appends would have produced.
        let mut lists = shared.lists.lock().unwrap();
        let appended = std::mem::take(&mut lists.pending);
        lists.pending = survivors;
        lists.pending.extend(appended);
    }

    debug!("event loop exiting");
}

fn is_ready(slot: &libc::pollfd) -> bool {
    slot.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
}

/// poll(2) over `fds` for readability with no timeout. Every wakeup comes
/// from a socket event or the self-pipe. Returns `None` on an unexpected
/// poll failure, which aborts the run.
fn poll_indefinitely(fds: &[RawFd]) -> Option<Vec<libc::pollfd>> {
    let mut batch: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    loop {
        // SAFETY: `batch` outlives the call and its length is the length
        // passed; the fds stay open because their records stay in the
        // pending list until this thread takes the lock again.
        let rv = unsafe { libc::poll(batch.as_mut_ptr(), batch.len() as libc::nfds_t, -1) };

        if rv >= 0 {
            return Some(batch);
        }

        let e = std::io::Error::last_os_error();
        if e.kind() == ErrorKind::Interrupted {
            continue;
        }

        error!("poll failed: {e}");
        return None;
    }
}
