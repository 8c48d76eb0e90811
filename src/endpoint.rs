// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use crate::Error;

/// Number of connections the kernel may queue on a listening socket before
/// `accept` drains them.
const LISTEN_BACKLOG: i32 = 255;

/// A parsed server or client address. Immutable after parsing.
///
/// Three URL forms are recognized:
///
///   - `unix:///<path>[:<suffix>]` -- the path runs up to the first `:` or
///     the end of the string; the suffix is ignored here.
///   - `tcp://<dotted-ipv4>:<port>[:<suffix>]`
///   - `tcp://[<ipv6>]:<port>[:<suffix>]`
///
/// Anything else fails with [`Error::InvalidUrl`]; a recognized form whose
/// address or port does not parse fails with [`Error::InvalidAddress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, Error> {
        if let Some(rest) = url.strip_prefix("unix://") {
            // The third slash is the first byte of the (absolute) path.
            if !rest.starts_with('/') {
                return Err(Error::InvalidUrl);
            }

            let path = match rest.find(':') {
                Some(colon) => &rest[..colon],
                None => rest,
            };

            return Ok(Self::Unix(PathBuf::from(path)));
        }

        if let Some(rest) = url.strip_prefix("tcp://") {
            return parse_tcp(rest);
        }

        Err(Error::InvalidUrl)
    }

    /// Create a listening socket for this endpooint: SO_REUSEADDR, a backlog
    /// of [`LISTEN_BACKLOG`], and O_NONBLOCK. A stale UNIX socket file is
    /// removed before binding, and the bound file is unlinked again when the
    /// caller tears the listener down.
    pub fn listen(&self) -> Result<Listener, Error> {
        let listener = match self {
            Self::Tcp(addr) => Listener::Tcp(TcpListener::bind(addr).map_err(Error::Socket)?),
            Self::Unix(path) => {
                // Not necessary to check for errors in remove_file() because ENOENT is
                // expected, and a failure to remove the file (while it already exists)
                // will result in an error in bind().
                let _ = std::fs::remove_file(path);
                Listener::Unix(UnixListener::bind(path).map_err(Error::Socket)?)
            }
        };

        // std::net picks its own short backlog with no way to widen it, so
        // listen a second time; the kernel updates the queue length in place.
        // SAFETY: the fd is owned by `listener` and open.
        let rv = unsafe { libc::listen(listener.as_raw_fd(), LISTEN_BACKLOG) };
        if rv != 0 {
            return Err(Error::Socket(io::Error::last_os_error()));
        }

        listener.set_nonblocking(true).map_err(Error::Socket)?;

        Ok(listener)
    }

    /// Open a non-blocking stream socket connected to this endpoint.
    pub fn connect(&self) -> Result<Stream, Error> {
        let stream = match self {
            Self::Tcp(addr) => Stream::Tcp(TcpStream::connect(addr).map_err(Error::Socket)?),
            Self::Unix(path) => Stream::Unix(UnixStream::connect(path).map_err(Error::Socket)?),
        };

        stream.set_nonblocking(true).map_err(Error::Socket)?;

        Ok(stream)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

fn parse_tcp(rest: &str) -> Result<Endpoint, Error> {
    if let Some(bracketed) = rest.strip_prefix('[') {
        let Some(end) = bracketed.find(']') else {
            return Err(Error::InvalidUrl);
        };

        let addr: Ipv6Addr = bracketed[..end]
            .parse()
            .map_err(|_| Error::InvalidAddress)?;
        let port = parse_port(&bracketed[end + 1..])?;

        return Ok(Endpoint::Tcp(SocketAddr::from((addr, port))));
    }

    let (host, after) = match rest.find(':') {
        Some(colon) => (&rest[..colon], &rest[colon..]),
        None => (rest, ""),
    };

    let addr: Ipv4Addr = host.parse().map_err(|_| Error::InvalidAddress)?;
    let port = parse_port(after)?;

    Ok(Endpoint::Tcp(SocketAddr::from((addr, port))))
}

/// `after` is either empty, or `:<port>[:<suffix>]`. A missing port falls
/// back to 80.
fn parse_port(after: &str) -> Result<u16, Error> {
    let Some(rest) = after.strip_prefix(':') else {
        return if after.is_empty() {
            Ok(80)
        } else {
            Err(Error::InvalidUrl)
        };
    };

    let digits = match rest.find(':') {
        Some(colon) => &rest[..colon],
        None => rest,
    };

    digits.parse().map_err(|_| Error::InvalidAddress)
}

/// A bound listening socket of either address family.
///
/// Functions that only ever see one family can stay generic over the std
/// listener types; this enum exists so that one server can hold listeners of
/// both families in a single list.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    pub fn accept(&self) -> io::Result<Stream> {
        match self {
            Self::Tcp(listener) => listener.accept().map(|(stream, _)| Stream::Tcp(stream)),
            Self::Unix(listener) => listener.accept().map(|(stream, _)| Stream::Unix(stream)),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(nonblocking),
            Self::Unix(listener) => listener.set_nonblocking(nonblocking),
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(listener) => listener.as_raw_fd(),
            Self::Unix(listener) => listener.as_raw_fd(),
        }
    }
}

/// A connected stream socket of either address family.
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(stream) => stream.as_raw_fd(),
            Self::Unix(stream) => stream.as_raw_fd(),
        }
    }
}
