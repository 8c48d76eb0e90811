// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::*;

use std::any::Any;
use std::io::Write;

use crate::buffer::Buffer;
use crate::endpoint::Stream;
use crate::{FrameHeader, ProtocolError, REPLY_STATUS_SIZE};

/// One message crossing the wire, in its decoded form.
///
/// The runtime never inspects message contents; it only asks a message for
/// its packed size and tells it to pack itself. Both are supplied by the
/// external serialization layer.
pub trait Message: Send + std::fmt::Debug {
    /// Number of bytes [`pack`] will append.
    ///
    /// [`pack`]: Message::pack
    fn packed_size(&self) -> usize;

    /// Append the encoded form of this message to `out`.
    fn pack(&self, out: &mut Vec<u8>);

    /// Escape hatch for callers that need the concrete type back after a
    /// reply has passed through `Box<dyn Message>`.
    fn as_any(&self) -> &dyn Any;
}

/// Decoder for one message kind. The input and output sides of a method each
/// carry one of these.
pub trait Schema: Send + Sync {
    /// Decode a message from `bytes`, which holds exactly one message body
    /// (possibly empty).
    fn unpack(&self, bytes: &[u8]) -> Result<Box<dyn Message>, ProtocolError>;
}

/// The schemas for a single method: what it consumes and what it returns.
pub struct Method {
    pub input: Box<dyn Schema>,
    pub output: Box<dyn Schema>,
}

/// The method table of a service. A frame's `method_index` indexes into
/// `methods`; anything at or past the end is a protocol violation.
#[derive(Default)]
pub struct Descriptor {
    pub methods: Vec<Method>,
}

impl Descriptor {
    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }
}

/// A service implementation, supplied by the embedding application.
///
/// The runtime calls `invoke` synchronously from whichever thread is driving
/// the connection, and relies on the responder being used exactly once on
/// that call stack: either with the reply message, or with `None` to signal
/// failure without a reply.
pub trait Service: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    fn invoke(&self, method_index: u32, input: Box<dyn Message>, responder: Responder<'_>);
}

/// The reply path handed to [`Service::invoke`].
///
/// `respond` frames the reply into the connection's outgoing buffer -- a
/// 4-byte zero status word, the 12-byte header echoing the request's method
/// index and request id, then the packed body -- and drains the buffer to
/// the socket before returning. The buffer is therefore empty again by the
/// time the next request on this connection is decoded.
pub struct Responder<'a> {
    pub(crate) stream: &'a mut Stream,
    pub(crate) out: &'a mut Buffer,
    pub(crate) method_index: u32,
    pub(crate) request_id: u32,
}

impl Responder<'_> {
    pub fn method_index(&self) -> u32 {
        self.method_index
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Send the reply. Consumes the responder; call it exactly once.
    ///
    /// `None` signals failure: nothing is written and the connection stays
    /// open (there is no error frame in the protocol).
    pub fn respond(self, reply: Option<&dyn Message>) {
        let Some(reply) = reply else {
            debug!(
                "no reply for request {} on method {}",
                self.request_id, self.method_index
            );
            return;
        };

        let header = FrameHeader {
            method_index: self.method_index,
            message_length: reply.packed_size() as u32,
            request_id: self.request_id,
        };

        self.out.append(&[0u8; REPLY_STATUS_SIZE]);
        header.pack_into(self.out.vec_mut());
        reply.pack(self.out.vec_mut());

        // Drain to the socket in place. Retries on EINTR/EAGAIN; a
        // zero-length write or any other error silently ends the attempt and
        // the connection is cleaned up when its next read fails.
        let mut cursor = 0;
        while cursor < self.out.len() {
            match self.stream.write(&self.out.as_slice()[cursor..]) {
                Ok(0) => break,
                Ok(written) => cursor += written,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => {
                    debug!("error sending reply for request {}: {e}", self.request_id);
                    break;
                }
            }
        }

        self.out.clear();
    }
}
