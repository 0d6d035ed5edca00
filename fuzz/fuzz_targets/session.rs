// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use bytes::Bytes;
use camstream::{PacketContext, Session, SessionOptions, Transport};
use libfuzzer_sys::fuzz_target;

struct Discard;

impl Transport for Discard {
    fn send(&mut self, _data: &[u8], _to: std::net::SocketAddr) -> Result<(), std::io::Error> {
        Ok(())
    }
}

fn handshake() -> [Vec<u8>; 3] {
    let mut announcement = vec![0u8; 32];
    announcement[0..4].copy_from_slice(b"luzh");
    let mut all_info = vec![0u8; 733];
    all_info[26..34].copy_from_slice(b"AllInfo\x00");
    let mut settings = vec![0u8; 30];
    settings[26..30].copy_from_slice(b"Ret1");
    [announcement, all_info, settings]
}

// Each datagram is a header byte followed by up to 127 bytes. With the high
// bit set, the bytes are wrapped as a video datagram's payload; otherwise
// they're delivered raw.
fuzz_target!(|data: &[u8]| {
    let mut data = data;
    let mut session =
        Session::new(SessionOptions::default().buffer_capacity(512), Box::new(Discard)).unwrap();
    let ctx = PacketContext::dummy();
    for d in handshake() {
        session.push(ctx, Bytes::from(d)).unwrap();
    }
    let mut seq = 0u8;
    loop {
        let (hdr, rest) = match data.split_first() {
            Some(r) => r,
            None => break,
        };
        let len = usize::from(hdr & 0x7f);
        if rest.len() < len {
            break;
        }
        let (body, rest) = rest.split_at(len);
        data = rest;
        let datagram = if hdr & 0x80 != 0 {
            let mut d = vec![0u8; 99];
            d[1] = seq;
            d[95..99].copy_from_slice(b"Data");
            d.extend_from_slice(body);
            seq = seq.wrapping_add(1);
            d
        } else {
            body.to_vec()
        };
        let _ = session.push(ctx, Bytes::from(datagram));
        if let Some(f) = session.pull() {
            let data = f.data();
            let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            assert_eq!(usize::try_from(len).unwrap() + 4, data.len());
        }
    }
    let _ = session.flush();
    let _ = session.pull();
});
