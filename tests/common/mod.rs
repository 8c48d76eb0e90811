// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

#![allow(dead_code)]

use std::any::Any;
use std::net::TcpStream;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use rpc_core::{
    provide_service, Descriptor, Message, Method, ProtocolError, Responder, Schema, Service,
};

/// An uninterpreted byte payload, standing in for the external
/// serialization layer.
#[derive(Debug)]
pub struct Bytes(pub Vec<u8>);

impl Message for Bytes {
    fn packed_size(&self) -> usize {
        self.0.len()
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct BytesSchema;

impl Schema for BytesSchema {
    fn unpack(&self, bytes: &[u8]) -> Result<Box<dyn Message>, ProtocolError> {
        Ok(Box::new(Bytes(bytes.to_vec())))
    }
}

/// One method, echoing its request body back unchanged.
pub struct EchoService {
    descriptor: Descriptor,
}

impl EchoService {
    pub fn new() -> Self {
        Self {
            descriptor: echo_descriptor(),
        }
    }
}

impl Service for EchoService {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, _method_index: u32, input: Box<dyn Message>, responder: Responder<'_>) {
        responder.respond(Some(&*input));
    }
}

pub fn echo_descriptor() -> Descriptor {
    Descriptor {
        methods: vec![Method {
            input: Box::new(BytesSchema),
            output: Box::new(BytesSchema),
        }],
    }
}

/// Spawn an echo server for `url` on a background thread. Returns the write
/// end of its stop source and the join handle; one byte on the former shuts
/// the server down.
pub fn start_echo_server(url: String, workers: usize) -> (OwnedFd, JoinHandle<()>) {
    let (stop_rx, stop_tx) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .expect("socketpair");

    let handle = std::thread::spawn(move || {
        provide_service(&url, Arc::new(EchoService::new()), workers, Some(stop_rx)).unwrap();
    });

    (stop_tx, handle)
}

pub fn stop_server(stop_tx: OwnedFd, handle: JoinHandle<()>) {
    nix::unistd::write(&stop_tx, &[1u8]).expect("write to stop source");
    handle.join().expect("server thread");
}

pub fn wait_for_tcp(addr: &str) -> TcpStream {
    let mut counter = 100;
    while counter > 0 {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(_) => std::thread::sleep(std::time::Duration::from_millis(10)),
        };
        counter -= 1;
    }

    panic!("Timeout trying to connect to TCP server at {addr}");
}

pub fn wait_for_unix(path: &Path) -> UnixStream {
    let mut counter = 100;
    while counter > 0 {
        match UnixStream::connect(path) {
            Ok(stream) => return stream,
            Err(_) => std::thread::sleep(std::time::Duration::from_millis(10)),
        };
        counter -= 1;
    }

    panic!(
        "Timeout trying to connect to unix domain socket at {}",
        path.display()
    );
}

/// A socket path under the temp dir that won't collide between tests.
pub fn scratch_socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rpc_core_{name}_{}.sock", std::process::id()))
}
