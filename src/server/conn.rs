// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;

use crate::buffer::Buffer;
use crate::endpoint::Stream;
use crate::server::registry::{Disposition, Record};
use crate::server::{ListenSocket, Shared};
use crate::service::Responder;
use crate::HEADER_SIZE;

/// Upper bound on one read from a connection socket.
const READ_CHUNK: usize = 8 * 1024;

/// One accepted connection: its socket and the two directional buffers.
///
/// Created by the accept handler, owned by its callback record, and
/// destroyed when the connection handler returns a terminal status (protocol
/// violation, read error, or EOF). Dropping it closes the fd.
pub(crate) struct Connection {
    stream: Stream,
    inbuf: Buffer,
    outbuf: Buffer,
}

impl Connection {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            inbuf: Buffer::new(),
            outbuf: Buffer::new(),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Drive framing on this connection after a readiness event: read once,
    /// then decode and dispatch every complete frame in the buffer.
    fn handle(&mut self, shared: &Shared) -> Disposition {
        let mut chunk = [0u8; READ_CHUNK];

        match self.stream.read(&mut chunk) {
            Ok(0) => {
                trace!("EOF on connection fd {}", self.fd());
                return Disposition::Drop;
            }
            Ok(amount) => self.inbuf.append(&chunk[..amount]),
            // A spurious wakeup or an interrupted read leaves the buffer as
            // it was; complete frames may still be waiting below.
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("read error on connection fd {}: {e}", self.fd());
                return Disposition::Drop;
            }
        }

        while self.inbuf.len() >= HEADER_SIZE {
            let header =
                crate::FrameHeader::unpack(self.inbuf.as_slice()[..HEADER_SIZE].try_into().unwrap());

            let frame_len = HEADER_SIZE + header.message_length as usize;
            if self.inbuf.len() < frame_len {
                // Frames are only dispatched once the body is complete.
                break;
            }

            let descriptor = shared.service.descriptor();

            let Some(method) = descriptor.methods.get(header.method_index as usize) else {
                warn!(
                    "request {} names unknown method {}; closing connection",
                    header.request_id, header.method_index
                );
                return Disposition::Drop;
            };

            let message = match method.input.unpack(&self.inbuf.as_slice()[HEADER_SIZE..frame_len])
            {
                Ok(message) => message,
                Err(e) => {
                    warn!("undecodable body for request {}: {e}", header.request_id);
                    return Disposition::Drop;
                }
            };

            self.inbuf.consume(frame_len);

            trace!(
                "dispatching request {} on method {} ({} byte body)",
                header.request_id,
                header.method_index,
                header.message_length
            );

            let responder = Responder {
                stream: &mut self.stream,
                out: &mut self.outbuf,
                method_index: header.method_index,
                request_id: header.request_id,
            };

            // Synchronous by contract: the service uses the responder before
            // returning, so request N's reply is fully written before
            // request N+1 is decoded.
            shared.service.invoke(header.method_index, message, responder);
        }

        Disposition::Keep
    }
}

/// Run the handler a ready record calls for. The uniform contract: `Keep`
/// re-parks the record, `Drop` frees it (closing its fd).
pub(crate) fn dispatch(record: &mut Record, shared: &Shared) -> Disposition {
    match record {
        // Sentinels are never dispatched; the event loop drains the
        // self-pipe itself.
        Record::Wake(_) => Disposition::Keep,
        Record::Stop(_) => {
            debug!("stop source is readable; shutting down");
            shared.running.store(false, Ordering::SeqCst);
            shared.wake();
            Disposition::Drop
        }
        Record::Accept(socket) => handle_accept(socket, shared),
        Record::Conn(conn) => conn.handle(shared),
    }
}

/// Accept one waiting connection and register a record for it. The listener
/// itself always stays registered.
fn handle_accept(socket: &ListenSocket, shared: &Shared) -> Disposition {
    match socket.listener.accept() {
        Ok(stream) => {
            if let Err(e) = stream.set_nonblocking(true) {
                warn!("could not make accepted socket non-blocking: {e}");
                return Disposition::Keep;
            }

            debug!(
                "accepted connection fd {} on {}",
                stream.as_raw_fd(),
                socket.endpoint
            );

            {
                let mut lists = shared.lists.lock().unwrap();
                lists.pending.push(Record::Conn(Connection::new(stream)));
            }

            // The loop may be mid-poll on a snapshot without the new record.
            shared.wake();
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
        Err(e) => warn!("error accepting connection on {}: {e}", socket.endpoint),
    }

    Disposition::Keep
}
