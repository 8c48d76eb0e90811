// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::any::Any;
use std::sync::Arc;

use clap::Parser;
use log::*;

use rpc_core::{provide_service, Descriptor, Message, Method, ProtocolError, Responder, Schema, Service};

/// A demonstration server with a single method that echoes its request body
/// back unchanged. Useful as a wire-level smoke test target:
///
///   RUST_LOG=debug rpc_echod --url tcp://127.0.0.1:4045 --workers 4
#[derive(Parser)]
struct Cli {
    /// Endpoint URL to serve, e.g. tcp://127.0.0.1:4045 or unix:///tmp/echo.sock
    #[arg(long, default_value = "tcp://127.0.0.1:4045")]
    url: String,

    /// Worker threads; 0 runs the whole server on one thread.
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

/// An uninterpreted byte payload.
#[derive(Debug)]
struct Bytes(Vec<u8>);

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

struct BytesSchema;

impl Schema for BytesSchema {
    fn unpack(&self, bytes: &[u8]) -> Result<Box<dyn Message>, ProtocolError> {
        Ok(Box::new(Bytes(bytes.to_vec())))
    }
}

struct EchoService {
    descriptor: Descriptor,
}

impl EchoService {
    fn new() -> Self {
        Self {
            descriptor: Descriptor {
                methods: vec![Method {
                    input: Box::new(BytesSchema),
                    output: Box::new(BytesSchema),
                }],
            },
        }
    }
}

impl Service for EchoService {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, method_index: u32, input: Box<dyn Message>, responder: Responder<'_>) {
        debug!(
            "echoing request {} on method {method_index}",
            responder.request_id()
        );

        responder.respond(Some(&*input));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Cli::parse();

    info!("echo server starting on {}", args.url);

    provide_service(&args.url, Arc::new(EchoService::new()), args.workers, None)?;

    Ok(())
}
