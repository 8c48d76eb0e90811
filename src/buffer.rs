// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

/// A growable byte buffer with the partial-I/O semantics each connection
/// needs on both directions.
///
/// The receive side appends raw reads and consumes whole frames off the
/// front; the send side is filled by the responder and drained in place with
/// a write cursor.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop the first `count` bytes, moving the tail to the front in order.
    pub fn consume(&mut self, count: usize) {
        self.data.drain(..count);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub(crate) fn vec_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}
