// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod buffer;
pub mod client;
pub mod endpoint;
pub mod server;
pub mod service;

use std::fmt;
use std::io;

pub use buffer::Buffer;
pub use client::Client;
pub use endpoint::{Endpoint, Listener, Stream};
pub use server::{provide_service, Server};
pub use service::{Descriptor, Message, Method, Responder, Schema, Service};

/// Size of the fixed frame header: three little-endian u32 fields.
pub const HEADER_SIZE: usize = 12;

/// Reply frames carry a reserved status word ahead of the header. It is
/// always written as zero and ignored on receipt.
pub const REPLY_STATUS_SIZE: usize = 4;

/// The possible errors that can arise from setting up an endpoint or from
/// carrying a call over it.
#[derive(Debug)]
pub enum Error {
    /// The URL does not match any recognized endpoint form.
    InvalidUrl,

    /// The URL matched an endpoint form but its address or port could not be
    /// parsed.
    InvalidAddress,

    /// Creating, binding, or connecting a socket failed.
    Socket(io::Error),

    /// Reading from a connected socket failed.
    Read(io::Error),

    /// Writing to a connected socket failed.
    Send(io::Error),

    /// The peer violated the framing contract. On the server this terminates
    /// the offending connection; there is no error frame on the wire.
    Protocol(ProtocolError),

    /// The client gave up waiting for a reply.
    Timeout,

    /// The peer closed the connection.
    ConnectionClosed,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidUrl => write!(f, "Invalid URL"),
            Self::InvalidAddress => write!(f, "Invalid address"),
            Self::Socket(e) => write!(f, "Socket error: {e}"),
            Self::Read(e) => write!(f, "Read error: {e}"),
            Self::Send(e) => write!(f, "Send error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Timeout => write!(f, "Timed out waiting for a reply"),
            Self::ConnectionClosed => write!(f, "Connection closed by peer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame names a method index the service does not have.
    BadMethod,

    /// A message body could not be decoded by its schema.
    Decode,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::BadMethod => "Unknown method index",
                Self::Decode => "Error decoding a message body",
            }
        )
    }
}

/// The fixed header that starts every request frame and follows the status
/// word of every reply frame.
///
/// All three fields are unsigned 32-bit integers in little-endian order.
/// There is no magic, no version, and no checksum. Bounds on `method_index`
/// and `message_length` are enforced by the caller, not here.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub method_index: u32,
    pub message_length: u32,
    pub request_id: u32,
}

impl FrameHeader {
    /// Encode the header into its 12-byte wire form.
    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.method_index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.message_length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.request_id.to_le_bytes());
        buf
    }

    /// Append the 12-byte wire form to `out`.
    pub fn pack_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pack());
    }

    /// Decode a header from its 12-byte wire form. The inverse of [`pack`].
    ///
    /// [`pack`]: FrameHeader::pack
    pub fn unpack(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            method_index: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            message_length: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            request_id: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        }
    }
}
