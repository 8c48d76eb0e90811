// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::endpoint::{Endpoint, Stream};
use crate::service::{Descriptor, Message};
use crate::{Error, FrameHeader, ProtocolError, HEADER_SIZE, REPLY_STATUS_SIZE};

/// Environment variable overriding the reply deadline, in microseconds.
const TIMEOUT_ENV: &str = "RPC_TIMEOUT_US";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8 * 1024;

/// A connected client issuing one request at a time.
///
/// The internal mutex is held across the whole request/response round trip,
/// so concurrent callers serialize rather than interleave frames.
pub struct Client {
    descriptor: Descriptor,
    timeout: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    stream: Stream,
    last_request_id: u32,
}

impl Client {
    /// Connect a new client to the server at `url`.
    ///
    /// The reply deadline starts out as `RPC_TIMEOUT_US` microseconds from
    /// the environment when set, and can be changed with [`set_timeout`].
    ///
    /// [`set_timeout`]: Client::set_timeout
    pub fn connect(url: &str, descriptor: Descriptor) -> Result<Self, Error> {
        let endpoint = Endpoint::parse(url)?;
        Self::from_stream(endpoint.connect()?, descriptor)
    }

    /// Wrap an already-connected stream, for callers that build their own
    /// transport (a socketpair end, for example). The stream is switched to
    /// non-blocking mode.
    pub fn from_stream(stream: Stream, descriptor: Descriptor) -> Result<Self, Error> {
        stream.set_nonblocking(true).map_err(Error::Socket)?;

        Ok(Self {
            descriptor,
            timeout: timeout_from_env(),
            inner: Mutex::new(Inner {
                stream,
                last_request_id: 0,
            }),
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Issue one call and block until its reply arrives or the deadline
    /// passes.
    ///
    /// Every outcome is reported: a lost send, a closed connection, an
    /// undecodable reply, and an expired deadline all come back as errors
    /// rather than a silently missing completion.
    pub fn invoke(&self, method_index: u32, input: &dyn Message) -> Result<Box<dyn Message>, Error> {
        let Some(method) = self.descriptor.methods.get(method_index as usize) else {
            return Err(Error::Protocol(ProtocolError::BadMethod));
        };

        let mut inner = self.inner.lock().unwrap();

        inner.last_request_id = inner.last_request_id.wrapping_add(1);
        let request_id = inner.last_request_id;

        let header = FrameHeader {
            method_index,
            message_length: input.packed_size() as u32,
            request_id,
        };

        let mut request = Vec::with_capacity(HEADER_SIZE + input.packed_size());
        header.pack_into(&mut request);
        input.pack(&mut request);

        trace!(
            "sending request {request_id} on method {method_index} ({} byte body)",
            header.message_length
        );

        send_all(&mut inner.stream, &request)?;

        // Accumulate until the status word, the header, and the whole body
        // indicated by the header's length field are present.
        let deadline = Instant::now() + self.timeout;
        let mut reply = Vec::new();

        read_until(
            &mut inner.stream,
            &mut reply,
            REPLY_STATUS_SIZE + HEADER_SIZE,
            deadline,
        )?;

        let reply_header = FrameHeader::unpack(
            reply[REPLY_STATUS_SIZE..REPLY_STATUS_SIZE + HEADER_SIZE]
                .try_into()
                .unwrap(),
        );

        let total = REPLY_STATUS_SIZE + HEADER_SIZE + reply_header.message_length as usize;
        read_until(&mut inner.stream, &mut reply, total, deadline)?;

        // With one request in flight the reply must echo our id; anything
        // else means the stream is out of step with us.
        if reply_header.request_id != request_id {
            debug!(
                "reply carries request id {} while waiting for {request_id}",
                reply_header.request_id
            );
            return Err(Error::Protocol(ProtocolError::Decode));
        }

        let body = &reply[REPLY_STATUS_SIZE + HEADER_SIZE..total];
        method.output.unpack(body).map_err(Error::Protocol)
    }
}

fn timeout_from_env() -> Duration {
    std::env::var(TIMEOUT_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_micros)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// Send the whole buffer, retrying short and interrupted writes.
fn send_all(stream: &mut Stream, mut bytes: &[u8]) -> Result<(), Error> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(Error::Send(ErrorKind::WriteZero.into())),
            Ok(sent) => bytes = &bytes[sent..],
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => return Err(Error::Send(e)),
        }
    }

    Ok(())
}

/// Read until `buf` holds at least `needed` bytes or `deadline` passes.
fn read_until(
    stream: &mut Stream,
    buf: &mut Vec<u8>,
    needed: usize,
    deadline: Instant,
) -> Result<(), Error> {
    let mut chunk = [0u8; READ_CHUNK];

    while buf.len() < needed {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Err(Error::Timeout);
        };

        if !wait_readable(stream.as_raw_fd(), remaining)? {
            return Err(Error::Timeout);
        }

        match stream.read(&mut chunk) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(amount) => buf.extend_from_slice(&chunk[..amount]),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Read(e)),
        }
    }

    Ok(())
}

/// Wait for the socket to become readable, up to `timeout`. `Ok(false)`
/// means the wait expired.
fn wait_readable(fd: RawFd, timeout: Duration) -> Result<bool, Error> {
    let mut slot = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // Round up so a sub-millisecond remainder still waits instead of
    // spinning through poll with a zero timeout.
    let millis = ((timeout.as_micros() + 999) / 1000).min(i32::MAX as u128) as i32;

    loop {
        // SAFETY: a single slot, passed with length one, alive for the call.
        let rv = unsafe { libc::poll(&mut slot, 1, millis) };

        if rv < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Read(e));
        }

        return Ok(rv > 0);
    }
}
