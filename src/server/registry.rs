// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::server::conn::Connection;
use crate::server::ListenSocket;

/// One registered descriptor and the handler that services it.
///
/// A record lives in exactly one of the pending list, the working list, or
/// nowhere (freed); ownership moves the whole record between the lists, so a
/// record can never appear in both. Several records may carry the same fd
/// number across lifecycles, but never at the same time.
pub(crate) enum Record {
    /// The read end of the self-pipe. A sentinel: it occupies a poll slot so
    /// the loop can be woken, but it is never dispatched.
    Wake(OwnedFd),

    /// The stop source. Readability triggers an orderly shutdown.
    Stop(OwnedFd),

    /// A listening socket whose readiness means a connection is waiting.
    Accept(Arc<ListenSocket>),

    /// An accepted connection carrying framed requests.
    Conn(Connection),
}

impl Record {
    pub fn fd(&self) -> RawFd {
        match self {
            Self::Wake(fd) => fd.as_raw_fd(),
            Self::Stop(fd) => fd.as_raw_fd(),
            Self::Accept(socket) => socket.fd(),
            Self::Conn(conn) => conn.fd(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Wake(_))
    }
}

/// What a handler wants done with its record afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Put the record back in the pending list.
    Keep,

    /// Free the record. Dropping it closes its fd and releases its buffers.
    Drop,
}

/// The two record lists, always mutated under the server mutex.
///
/// The order of `pending` matters: it defines the poll order, and the event
/// loop maps poll-result indices back onto records positionally. When the
/// worker pool is active, the self-pipe sentinel is permanently `pending[0]`.
#[derive(Default)]
pub(crate) struct Lists {
    pub pending: Vec<Record>,
    pub working: Vec<Record>,
}

impl Lists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the pending record registered for `fd`, if any.
    pub fn remove_pending_by_fd(&mut self, fd: RawFd) -> Option<Record> {
        let index = self.pending.iter().position(|record| record.fd() == fd)?;
        Some(self.pending.remove(index))
    }

    /// Dequeue the oldest working record.
    pub fn take_first_working(&mut self) -> Option<Record> {
        if self.working.is_empty() {
            return None;
        }
        Some(self.working.remove(0))
    }
}
