// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use rpc_core::{Buffer, Endpoint, Error, FrameHeader, HEADER_SIZE};

#[test]
fn header_round_trip() {
    let cases = [
        (0, 0, 0),
        (1, 0, 1),
        (7, 32, 1000),
        (u32::MAX, u32::MAX, u32::MAX),
        (0x0102_0304, 0x8000_0000, 0xDEAD_BEEF),
    ];

    for (method_index, message_length, request_id) in cases {
        let header = FrameHeader {
            method_index,
            message_length,
            request_id,
        };

        let packed = header.pack();
        assert_eq!(FrameHeader::unpack(&packed), header);
    }
}

#[test]
fn header_wire_layout_is_little_endian() {
    let header = FrameHeader {
        method_index: 0x0000_0001,
        message_length: 0x0000_0020,
        request_id: 0x0403_0201,
    };

    assert_eq!(
        header.pack(),
        [1, 0, 0, 0, 0x20, 0, 0, 0, 0x01, 0x02, 0x03, 0x04]
    );
}

#[test]
fn buffer_compaction_preserves_the_tail() {
    let mut buf = Buffer::new();

    let header = FrameHeader {
        method_index: 0,
        message_length: 5,
        request_id: 1,
    };
    buf.append(&header.pack());
    buf.append(b"hello");

    // The start of the next frame, arrived early.
    let tail = b"\x01\x00\x00\x00";
    buf.append(tail);

    let before = buf.len();
    buf.consume(HEADER_SIZE + 5);

    assert_eq!(buf.len(), before - (HEADER_SIZE + 5));
    assert_eq!(buf.as_slice(), tail);
}

#[test]
fn parses_unix_urls() {
    let endpoint = Endpoint::parse("unix:///tmp/server.sock").unwrap();
    assert_eq!(endpoint, Endpoint::Unix("/tmp/server.sock".into()));

    // Everything after the first colon is a suffix and is ignored.
    let endpoint = Endpoint::parse("unix:///tmp/server.sock:label").unwrap();
    assert_eq!(endpoint, Endpoint::Unix("/tmp/server.sock".into()));
}

#[test]
fn parses_tcp_v4_urls() {
    let endpoint = Endpoint::parse("tcp://127.0.0.1:8080").unwrap();
    assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:8080".parse().unwrap()));

    let endpoint = Endpoint::parse("tcp://10.1.2.3:65535:suffix").unwrap();
    assert_eq!(endpoint, Endpoint::Tcp("10.1.2.3:65535".parse().unwrap()));

    // A port-less form falls back to 80.
    let endpoint = Endpoint::parse("tcp://10.0.0.1").unwrap();
    assert_eq!(endpoint, Endpoint::Tcp("10.0.0.1:80".parse().unwrap()));
}

#[test]
fn parses_tcp_v6_urls() {
    let endpoint = Endpoint::parse("tcp://[::1]:9000").unwrap();
    assert_eq!(endpoint, Endpoint::Tcp("[::1]:9000".parse().unwrap()));

    let endpoint = Endpoint::parse("tcp://[fe80::1]:9000:suffix").unwrap();
    assert_eq!(endpoint, Endpoint::Tcp("[fe80::1]:9000".parse().unwrap()));
}

#[test]
fn rejects_unrecognized_urls() {
    for url in [
        "http://127.0.0.1:80",
        "tcp:/127.0.0.1:80",
        "unix://relative/path",
        "tcp://[::1",
        "",
    ] {
        assert!(
            matches!(Endpoint::parse(url), Err(Error::InvalidUrl)),
            "{url} should be an invalid URL"
        );
    }
}

#[test]
fn rejects_bad_addresses() {
    for url in [
        "tcp://localhost:80",
        "tcp://300.0.0.1:80",
        "tcp://127.0.0.1:notaport",
        "tcp://127.0.0.1:99999",
        "tcp://[zzzz::1]:80",
    ] {
        assert!(
            matches!(Endpoint::parse(url), Err(Error::InvalidAddress)),
            "{url} should be an invalid address"
        );
    }
}
