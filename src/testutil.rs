// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

pub(crate) fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("CAMSTREAM_LOG", "info"),
    )
    .is_test(true)
    .try_init();
}

/// A 1920x1080 High profile SPS, including its NAL header byte.
pub(crate) const SPS: &[u8] = &[
    0x67, 0x64, 0x00, 0x28, 0xac, 0xd9, 0x40, 0x78, 0x02, 0x27, 0xe5, 0x84, 0x00, 0x00, 0x03, 0x00,
    0x04, 0x00, 0x00, 0x03, 0x00, 0xf0, 0x3c, 0x60, 0xc6, 0x58,
];

/// A PPS to go with [`SPS`].
pub(crate) const PPS: &[u8] = b"\x68\xeb\xe3\xcb\x22\xc0";

/// Returns `nals` joined in Annex B form, each preceded by a start code.
pub(crate) fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(b"\x00\x00\x00\x01");
        out.extend_from_slice(nal);
    }
    out
}

pub(crate) fn announcement(ip: [u8; 4], name: &[u8]) -> Bytes {
    let mut data = vec![0u8; 32];
    data[0..4].copy_from_slice(b"luzh");
    data[4..8].copy_from_slice(&ip);
    data[8..8 + name.len()].copy_from_slice(name);
    data.into()
}

pub(crate) fn all_info_response() -> Bytes {
    let mut data = vec![0u8; 733];
    data[26..34].copy_from_slice(b"AllInfo\x00");
    data.into()
}

pub(crate) fn stream_settings_response() -> Bytes {
    let mut data = vec![0u8; 30];
    data[26..30].copy_from_slice(b"Ret1");
    data.into()
}

pub(crate) fn video_data(sequence: u8, payload: &[u8]) -> Bytes {
    let mut data = vec![0u8; 99];
    data[1] = sequence;
    data[95..99].copy_from_slice(b"Data");
    data.extend_from_slice(payload);
    data.into()
}
