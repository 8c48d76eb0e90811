// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use crate::endpoint::{Endpoint, Listener};
use crate::service::Service;
use crate::Error;

pub(crate) mod conn;
mod event_loop;
pub(crate) mod registry;
mod workers;

use registry::{Lists, Record};
use workers::{Semaphore, WorkerPool};

/// A bound listening endpoint. Dropping it closes the socket and, for UNIX
/// endpoints, unlinks the socket file.
pub(crate) struct ListenSocket {
    pub endpoint: Endpoint,
    pub listener: Listener,
}

impl ListenSocket {
    pub fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for ListenSocket {
    fn drop(&mut self) {
        if let Endpoint::Unix(path) = &self.endpoint {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// State shared between the event loop, the workers, and every handler.
pub(crate) struct Shared {
    /// Cleared by the stop handler (or a fatal loop error); the loop and the
    /// workers exit once they observe it.
    pub running: AtomicBool,

    /// The pending and working record lists. Every mutation happens under
    /// this mutex.
    pub lists: Mutex<Lists>,

    /// Posted once per record moved to the working list.
    pub sem: Semaphore,

    /// Write end of the self-pipe; empty when running without a pool.
    wake_fd: OnceLock<OwnedFd>,

    pub service: Arc<dyn Service>,
}

impl Shared {
    fn new(service: Arc<dyn Service>) -> Self {
        Self {
            running: AtomicBool::new(false),
            lists: Mutex::new(Lists::new()),
            sem: Semaphore::new(),
            wake_fd: OnceLock::new(),
            service,
        }
    }

    /// Wake the event loop out of poll(2) so it re-reads the pending list.
    /// A no-op without a pool: the loop is then the only thread touching the
    /// lists and needs no rearming.
    pub fn wake(&self) {
        if let Some(fd) = self.wake_fd.get() {
            let _ = nix::unistd::write(fd, &[1u8]);
        }
    }
}

/// A server instance: an owned value, so several independent servers can
/// coexist in one process.
///
/// Bind one or more endpoints, then call [`serve`], which runs the event
/// loop on the calling thread until the stop source fires and tears
/// everything down on the way out.
///
/// [`serve`]: Server::serve
pub struct Server {
    sockets: Vec<Arc<ListenSocket>>,
    shared: Arc<Shared>,
}

impl Server {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self {
            sockets: Vec::new(),
            shared: Arc::new(Shared::new(service)),
        }
    }

    /// Bind a listening endpoint and register its accept handler.
    pub fn bind(&mut self, url: &str) -> Result<(), Error> {
        let endpoint = Endpoint::parse(url)?;
        let listener = endpoint.listen()?;

        info!("listening on {endpoint}");

        let socket = Arc::new(ListenSocket { endpoint, listener });
        self.sockets.push(Arc::clone(&socket));

        let mut lists = self.shared.lists.lock().unwrap();
        lists.pending.push(Record::Accept(socket));

        Ok(())
    }

    /// Close the listening endpoint equal to the parsed `url`, unlinking a
    /// UNIX socket path. Returns whether a bound endpoint matched.
    pub fn unbind(&mut self, url: &str) -> Result<bool, Error> {
        let endpoint = Endpoint::parse(url)?;

        let Some(index) = self
            .sockets
            .iter()
            .position(|socket| socket.endpoint == endpoint)
        else {
            return Ok(false);
        };

        let socket = self.sockets.remove(index);
        info!("unbinding {}", socket.endpoint);

        let mut lists = self.shared.lists.lock().unwrap();
        lists.remove_pending_by_fd(socket.fd());

        Ok(true)
    }

    /// Run the server until shutdown.
    ///
    /// With `num_workers > 0`, a self-pipe is created and installed as the
    /// permanent first pending entry, and a pool of that many threads drains
    /// the working list. With zero workers the loop dispatches every handler
    /// inline and stays strictly single-threaded.
    ///
    /// `stop`, when given, is watched for readability; one readable event
    /// shuts the server down. On return all listen sockets are closed and
    /// UNIX socket paths unlinked.
    pub fn serve(self, num_workers: usize, stop: Option<OwnedFd>) -> Result<(), Error> {
        self.shared.running.store(true, Ordering::SeqCst);

        let pooled = num_workers > 0;

        if pooled {
            // Same construction as a pipe, but bidirectional ends are fine
            // here; only one direction is ever used.
            let (read_end, write_end) = socketpair(
                AddressFamily::Unix,
                SockType::Stream,
                None,
                SockFlag::empty(),
            )
            .map_err(|e| Error::Socket(e.into()))?;

            let _ = self.shared.wake_fd.set(write_end);

            let mut lists = self.shared.lists.lock().unwrap();
            lists.pending.insert(0, Record::Wake(read_end));
        }

        if let Some(fd) = stop {
            let mut lists = self.shared.lists.lock().unwrap();
            lists.pending.push(Record::Stop(fd));
        }

        let pool = pooled.then(|| WorkerPool::spawn(num_workers, Arc::clone(&self.shared)));

        debug!("starting event loop with {num_workers} workers");
        event_loop::run(&self.shared, pooled);

        if let Some(pool) = pool {
            pool.shutdown();
        }

        info!("server stopped");

        // Dropping self closes every listen socket (unlinking UNIX paths)
        // and frees whatever records remain in the lists.
        Ok(())
    }
}

/// Bind `url` and serve until shutdown: the one-call form composing
/// [`Server::new`], [`Server::bind`], and [`Server::serve`].
pub fn provide_service(
    url: &str,
    service: Arc<dyn Service>,
    num_workers: usize,
    stop: Option<OwnedFd>,
) -> Result<(), Error> {
    let mut server = Server::new(service);
    server.bind(url)?;
    server.serve(num_workers, stop)
}
