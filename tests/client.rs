// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

mod common;

use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use common::*;
use rpc_core::{Client, Error, FrameHeader, ProtocolError, Stream, HEADER_SIZE, REPLY_STATUS_SIZE};

#[test]
fn times_out_when_the_server_never_replies() {
    let listener = TcpListener::bind("127.0.0.1:45005").unwrap();

    // Accept and then sit on the connection without answering.
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let mut client = Client::connect("tcp://127.0.0.1:45005", echo_descriptor()).unwrap();
    client.set_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let err = client.invoke(0, &Bytes(b"anyone there?".to_vec())).unwrap_err();

    assert!(matches!(err, Error::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(200));

    server.join().unwrap();
}

#[test]
fn scripted_peer_round_trip() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let client = Client::from_stream(Stream::Unix(ours), echo_descriptor()).unwrap();

    let peer = std::thread::spawn(move || {
        let mut theirs = theirs;
        theirs
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut header_bytes = [0u8; HEADER_SIZE];
        theirs.read_exact(&mut header_bytes).unwrap();
        let header = FrameHeader::unpack(&header_bytes);

        let mut body = vec![0u8; header.message_length as usize];
        theirs.read_exact(&mut body).unwrap();

        let reply_header = FrameHeader {
            method_index: header.method_index,
            message_length: body.len() as u32,
            request_id: header.request_id,
        };

        let mut reply = vec![0u8; REPLY_STATUS_SIZE];
        reply.extend_from_slice(&reply_header.pack());
        reply.extend_from_slice(&body);
        theirs.write_all(&reply).unwrap();
    });

    let reply = client.invoke(0, &Bytes(b"ping".to_vec())).unwrap();
    let reply = reply.as_any().downcast_ref::<Bytes>().unwrap();
    assert_eq!(reply.0, b"ping");

    peer.join().unwrap();
}

#[test]
fn mismatched_reply_id_is_a_protocol_error() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let client = Client::from_stream(Stream::Unix(ours), echo_descriptor()).unwrap();

    let peer = std::thread::spawn(move || {
        let mut theirs = theirs;
        theirs
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut header_bytes = [0u8; HEADER_SIZE];
        theirs.read_exact(&mut header_bytes).unwrap();
        let header = FrameHeader::unpack(&header_bytes);

        let mut body = vec![0u8; header.message_length as usize];
        theirs.read_exact(&mut body).unwrap();

        // Echo back under a request id the client never issued.
        let reply_header = FrameHeader {
            method_index: header.method_index,
            message_length: 0,
            request_id: 99,
        };

        let mut reply = vec![0u8; REPLY_STATUS_SIZE];
        reply.extend_from_slice(&reply_header.pack());
        theirs.write_all(&reply).unwrap();
    });

    let err = client.invoke(0, &Bytes(b"ping".to_vec())).unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::Decode)));

    peer.join().unwrap();
}

#[test]
fn send_to_a_closed_peer_fails() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let client = Client::from_stream(Stream::Unix(ours), echo_descriptor()).unwrap();

    drop(theirs);

    let err = client.invoke(0, &Bytes(b"ping".to_vec())).unwrap_err();
    assert!(matches!(err, Error::Send(_)));
}

#[test]
fn unknown_method_index_is_rejected_locally() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let client = Client::from_stream(Stream::Unix(ours), echo_descriptor()).unwrap();

    let err = client.invoke(5, &Bytes(Vec::new())).unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::BadMethod)));

    // Nothing went out on the wire.
    let mut theirs = theirs;
    theirs
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let err = theirs.read(&mut [0u8; 1]).unwrap_err();
    assert!(matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    ));
}
