// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire format of the camera's UDP protocol.
//!
//! Every inbound message is recognized the same way: by its length (exact, or
//! a minimum for [`VideoData`]) and a magic signature at a fixed offset. There
//! is no message type field and no length prefix. Fields live at fixed offsets.
//!
//! The two requests the client sends are opaque vendor command strings which
//! are sent verbatim.

use std::net::Ipv4Addr;

use bytes::Bytes;
use thiserror::Error;

/// Asks the camera to describe itself; answered by [`AllInfoResponse`].
pub const ALL_INFO_REQUEST: &[u8] = b"\x00\x00\x00\x76\
    00100008\
    00001007\
    000001AllInfo1";

/// Asks the camera to start streaming with fixed audio/video/frame settings;
/// answered by [`StreamSettingsResponse`].
pub const STREAM_SETTINGS_REQUEST: &[u8] = b"\x00\x01\x01\x76\
    00100006\
    00005805\
    000001Audio1050000\
    01Video1090000\
    07FrameSize28000f\
    0090000\
    01FrameRatef070000\
    03BitRate400";

/// The kinds of message the camera sends.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketKind {
    Announcement,
    AllInfoResponse,
    StreamSettingsResponse,
    Acknowledgement,
    VideoData,
}

impl PacketKind {
    /// Returns the kind of `buf`, if it's recognizable as any inbound message.
    pub fn recognize(buf: &[u8]) -> Option<Self> {
        if Announcement::is_recognized(buf) {
            Some(PacketKind::Announcement)
        } else if AllInfoResponse::is_recognized(buf) {
            Some(PacketKind::AllInfoResponse)
        } else if StreamSettingsResponse::is_recognized(buf) {
            Some(PacketKind::StreamSettingsResponse)
        } else if Acknowledgement::is_recognized(buf) {
            Some(PacketKind::Acknowledgement)
        } else if VideoData::is_recognized(buf) {
            Some(PacketKind::VideoData)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("{len}-byte buffer is the wrong size for {kind:?}")]
    InvalidSize { kind: PacketKind, len: usize },

    #[error("{kind:?}-sized buffer lacks the {kind:?} signature")]
    UnrecognizedSignature { kind: PacketKind },
}

/// Signature bytes expected at a fixed offset.
struct Signature {
    offset: usize,
    bytes: &'static [u8],
}

impl Signature {
    fn matches(&self, buf: &[u8]) -> bool {
        buf.get(self.offset..self.offset + self.bytes.len()) == Some(self.bytes)
    }
}

/// An inbound message which can be recognized in and parsed from a datagram.
pub trait IncomingPacket: Sized {
    const KIND: PacketKind;

    /// Returns true iff `buf` has the right size and signature(s).
    ///
    /// Never reads beyond `buf.len()`.
    fn is_recognized(buf: &[u8]) -> bool;

    /// Parses the message, failing unless [`Self::is_recognized`] holds.
    fn parse(data: Bytes) -> Result<Self, PacketError>;
}

/// Checks the size and then the signatures, in that order.
fn check(
    kind: PacketKind,
    buf: &[u8],
    size_ok: bool,
    signatures: &[Signature],
) -> Result<(), PacketError> {
    if !size_ok {
        return Err(PacketError::InvalidSize {
            kind,
            len: buf.len(),
        });
    }
    if !signatures.iter().all(|s| s.matches(buf)) {
        return Err(PacketError::UnrecognizedSignature { kind });
    }
    Ok(())
}

/// The camera's periodic broadcast, which starts (or restarts) a session.
///
/// ```text
///  0       4       8                      24              32
/// +-------+-------+----------------------+---------------+
/// | luzh  | IPv4  | service name (NUL-   | (unused)      |
/// |       |       | padded ASCII)        |               |
/// +-------+-------+----------------------+---------------+
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    server_ip: Ipv4Addr,
    service_name: String,
}

impl Announcement {
    pub const SIZE: usize = 32;
    const SIGNATURE: Signature = Signature {
        offset: 0,
        bytes: b"luzh",
    };
    const IP_OFFSET: usize = 4;
    const NAME: std::ops::Range<usize> = 8..24;

    /// The address the camera claims for itself.
    pub fn server_ip(&self) -> Ipv4Addr {
        self.server_ip
    }

    /// The camera's advertised name, eg `WIFICAM`.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl IncomingPacket for Announcement {
    const KIND: PacketKind = PacketKind::Announcement;

    fn is_recognized(buf: &[u8]) -> bool {
        buf.len() == Self::SIZE && Self::SIGNATURE.matches(buf)
    }

    fn parse(data: Bytes) -> Result<Self, PacketError> {
        check(
            Self::KIND,
            &data,
            data.len() == Self::SIZE,
            &[Self::SIGNATURE],
        )?;
        let ip = &data[Self::IP_OFFSET..Self::IP_OFFSET + 4];
        let name = &data[Self::NAME];
        let name = match name.iter().position(|&b| b == 0) {
            Some(nul) => &name[..nul],
            None => name,
        };
        Ok(Announcement {
            server_ip: Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
            service_name: String::from_utf8_lossy(name).into_owned(),
        })
    }
}

/// Response to [`ALL_INFO_REQUEST`]. The body isn't interpreted.
#[derive(Clone)]
pub struct AllInfoResponse(Bytes);

impl AllInfoResponse {
    pub const SIZE: usize = 733;
    const SIGNATURE: Signature = Signature {
        offset: 26,
        bytes: b"AllInfo\x00",
    };

    /// Returns the full message.
    pub fn raw(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for AllInfoResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AllInfoResponse")
            .field(&crate::hex::LimitedHex::new(&self.0, 64))
            .finish()
    }
}

impl IncomingPacket for AllInfoResponse {
    const KIND: PacketKind = PacketKind::AllInfoResponse;

    fn is_recognized(buf: &[u8]) -> bool {
        buf.len() == Self::SIZE && Self::SIGNATURE.matches(buf)
    }

    fn parse(data: Bytes) -> Result<Self, PacketError> {
        check(
            Self::KIND,
            &data,
            data.len() == Self::SIZE,
            &[Self::SIGNATURE],
        )?;
        Ok(AllInfoResponse(data))
    }
}

/// Response to [`STREAM_SETTINGS_REQUEST`]. The body isn't interpreted.
#[derive(Clone)]
pub struct StreamSettingsResponse(Bytes);

impl StreamSettingsResponse {
    pub const SIZE: usize = 30;
    const SIGNATURE: Signature = Signature {
        offset: 26,
        bytes: b"Ret1",
    };

    pub fn raw(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for StreamSettingsResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StreamSettingsResponse")
            .field(&crate::hex::LimitedHex::new(&self.0, 64))
            .finish()
    }
}

impl IncomingPacket for StreamSettingsResponse {
    const KIND: PacketKind = PacketKind::StreamSettingsResponse;

    fn is_recognized(buf: &[u8]) -> bool {
        buf.len() == Self::SIZE && Self::SIGNATURE.matches(buf)
    }

    fn parse(data: Bytes) -> Result<Self, PacketError> {
        check(
            Self::KIND,
            &data,
            data.len() == Self::SIZE,
            &[Self::SIGNATURE],
        )?;
        Ok(StreamSettingsResponse(data))
    }
}

/// A rolling 8-bit acknowledgement, sent by the client after each response
/// and each video datagram.
///
/// ```text
/// +------+----------+------+------+
/// | 0x01 | received | next | 0x76 |
/// +------+----------+------+------+
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Acknowledgement {
    pub received: u8,
    pub next: u8,
}

impl Acknowledgement {
    pub const SIZE: usize = 4;
    const HEAD: Signature = Signature {
        offset: 0,
        bytes: b"\x01",
    };
    const TAIL: Signature = Signature {
        offset: 3,
        bytes: b"\x76",
    };

    pub fn new(received: u8, next: u8) -> Self {
        Self { received, next }
    }

    /// Acknowledges `sequence` and expects its successor, wrapping after 255.
    pub fn for_sequence(sequence: u8) -> Self {
        Self::new(sequence, sequence.wrapping_add(1))
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        [
            Self::HEAD.bytes[0],
            self.received,
            self.next,
            Self::TAIL.bytes[0],
        ]
    }
}

impl IncomingPacket for Acknowledgement {
    const KIND: PacketKind = PacketKind::Acknowledgement;

    fn is_recognized(buf: &[u8]) -> bool {
        buf.len() == Self::SIZE && Self::HEAD.matches(buf) && Self::TAIL.matches(buf)
    }

    fn parse(data: Bytes) -> Result<Self, PacketError> {
        check(
            Self::KIND,
            &data,
            data.len() == Self::SIZE,
            &[Self::HEAD, Self::TAIL],
        )?;
        Ok(Acknowledgement {
            received: data[1],
            next: data[2],
        })
    }
}

/// A fragment of the H.264 elementary stream.
///
/// The 99-byte header carries a sequence number at offset 1 and the `Data`
/// signature at offset 95; everything after it is payload. Fragments don't say
/// where NAL units begin or end; see [`crate::codec::FrameBuffer`].
#[derive(Clone)]
pub struct VideoData {
    sequence: u8,
    payload: Bytes,
}

impl VideoData {
    pub const HEADER_LEN: usize = 99;
    const SIGNATURE: Signature = Signature {
        offset: 95,
        bytes: b"Data",
    };
    const SEQUENCE_OFFSET: usize = 1;

    #[inline]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl std::fmt::Debug for VideoData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoData")
            .field("sequence", &self.sequence)
            .field("payload", &crate::hex::LimitedHex::new(&self.payload, 64))
            .finish()
    }
}

impl IncomingPacket for VideoData {
    const KIND: PacketKind = PacketKind::VideoData;

    fn is_recognized(buf: &[u8]) -> bool {
        buf.len() >= Self::HEADER_LEN && Self::SIGNATURE.matches(buf)
    }

    fn parse(data: Bytes) -> Result<Self, PacketError> {
        check(
            Self::KIND,
            &data,
            data.len() >= Self::HEADER_LEN,
            &[Self::SIGNATURE],
        )?;
        Ok(VideoData {
            sequence: data[Self::SEQUENCE_OFFSET],
            payload: data.slice(Self::HEADER_LEN..),
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::testutil;

    #[test]
    fn request_blobs() {
        #[rustfmt::skip]
        const ALL_INFO: [u8; 34] = [
            0x00, 0x00, 0x00, 0x76, 0x30, 0x30, 0x31, 0x30,
            0x30, 0x30, 0x30, 0x38, 0x30, 0x30, 0x30, 0x30,
            0x31, 0x30, 0x30, 0x37, 0x30, 0x30, 0x30, 0x30,
            0x30, 0x31, 0x41, 0x6c, 0x6c, 0x49, 0x6e, 0x66,
            0x6f, 0x31,
        ];
        #[rustfmt::skip]
        const STREAM_SETTINGS: [u8; 106] = [
            0x00, 0x01, 0x01, 0x76, 0x30, 0x30, 0x31, 0x30,
            0x30, 0x30, 0x30, 0x36, 0x30, 0x30, 0x30, 0x30,
            0x35, 0x38, 0x30, 0x35, 0x30, 0x30, 0x30, 0x30,
            0x30, 0x31, 0x41, 0x75, 0x64, 0x69, 0x6f, 0x31,
            0x30, 0x35, 0x30, 0x30, 0x30, 0x30, 0x30, 0x31,
            0x56, 0x69, 0x64, 0x65, 0x6f, 0x31, 0x30, 0x39,
            0x30, 0x30, 0x30, 0x30, 0x30, 0x37, 0x46, 0x72,
            0x61, 0x6d, 0x65, 0x53, 0x69, 0x7a, 0x65, 0x32,
            0x38, 0x30, 0x30, 0x30, 0x66, 0x30, 0x30, 0x39,
            0x30, 0x30, 0x30, 0x30, 0x30, 0x31, 0x46, 0x72,
            0x61, 0x6d, 0x65, 0x52, 0x61, 0x74, 0x65, 0x66,
            0x30, 0x37, 0x30, 0x30, 0x30, 0x30, 0x30, 0x33,
            0x42, 0x69, 0x74, 0x52, 0x61, 0x74, 0x65, 0x34,
            0x30, 0x30,
        ];
        assert_eq!(ALL_INFO_REQUEST, &ALL_INFO[..]);
        assert_eq!(STREAM_SETTINGS_REQUEST, &STREAM_SETTINGS[..]);
    }

    #[test]
    fn announcement() {
        let data = testutil::announcement([192, 168, 72, 173], b"WIFICAM");
        assert!(Announcement::is_recognized(&data));
        assert_eq!(PacketKind::recognize(&data), Some(PacketKind::Announcement));
        let a = Announcement::parse(data).unwrap();
        assert_eq!(a.server_ip(), Ipv4Addr::new(192, 168, 72, 173));
        assert_eq!(a.service_name(), "WIFICAM");
    }

    #[test]
    fn announcement_unterminated_name() {
        let data = testutil::announcement([10, 0, 0, 1], b"0123456789abcdef");
        let a = Announcement::parse(data).unwrap();
        assert_eq!(a.service_name(), "0123456789abcdef");
    }

    #[test]
    fn responses() {
        let all_info = testutil::all_info_response();
        assert_eq!(
            PacketKind::recognize(&all_info),
            Some(PacketKind::AllInfoResponse)
        );
        assert_eq!(AllInfoResponse::parse(all_info).unwrap().raw().len(), 733);

        let settings = testutil::stream_settings_response();
        assert_eq!(
            PacketKind::recognize(&settings),
            Some(PacketKind::StreamSettingsResponse)
        );
        StreamSettingsResponse::parse(settings).unwrap();
    }

    #[test]
    fn acknowledgement() {
        let data = Bytes::from_static(b"\x01\x03\x04\x76");
        assert_eq!(
            PacketKind::recognize(&data),
            Some(PacketKind::Acknowledgement)
        );
        let ack = Acknowledgement::parse(data).unwrap();
        assert_eq!(ack, Acknowledgement::new(3, 4));
        assert_eq!(Acknowledgement::new(1, 2).to_bytes(), *b"\x01\x01\x02\x76");
    }

    #[test]
    fn acknowledgement_roundtrip() {
        for (r, n) in [(0, 1), (1, 2), (0x7f, 0x80), (0xff, 0x00), (0x42, 0x42)] {
            let ack = Acknowledgement::new(r, n);
            let parsed = Acknowledgement::parse(Bytes::copy_from_slice(&ack.to_bytes())).unwrap();
            assert_eq!(parsed, ack);
        }
    }

    #[test]
    fn acknowledgement_wraps() {
        assert_eq!(Acknowledgement::for_sequence(5), Acknowledgement::new(5, 6));
        assert_eq!(
            Acknowledgement::for_sequence(255),
            Acknowledgement::new(255, 0)
        );
    }

    #[test]
    fn video_data() {
        let data = testutil::video_data(2, b"\x00\x00\x00\x01\x65slice");
        assert_eq!(PacketKind::recognize(&data), Some(PacketKind::VideoData));
        let v = VideoData::parse(data).unwrap();
        assert_eq!(v.sequence(), 2);
        assert_eq!(&v.payload()[..], b"\x00\x00\x00\x01\x65slice");
    }

    #[test]
    fn video_data_header_only() {
        let v = VideoData::parse(testutil::video_data(9, b"")).unwrap();
        assert!(v.payload().is_empty());
    }

    #[test]
    fn wrong_sizes_not_recognized() {
        let announcement = testutil::announcement([1, 2, 3, 4], b"x");
        let all_info = testutil::all_info_response();
        let settings = testutil::stream_settings_response();
        let ack = Bytes::from_static(b"\x01\x00\x01\x76");
        let video = testutil::video_data(0, b"");

        // Grow or shrink each valid message while keeping its signature intact
        // (zero-padding at the end, truncating at the end).
        fn resized(data: &[u8], len: usize) -> Vec<u8> {
            let mut v = data.to_vec();
            v.resize(len, 0);
            v
        }
        for len in 0..800 {
            if len != Announcement::SIZE {
                let b = resized(&announcement, len);
                assert!(!Announcement::is_recognized(&b), "len={len}");
                assert!(matches!(
                    Announcement::parse(Bytes::from(b)),
                    Err(PacketError::InvalidSize { .. })
                ));
            }
            if len != AllInfoResponse::SIZE {
                assert!(!AllInfoResponse::is_recognized(&resized(&all_info, len)));
            }
            if len != StreamSettingsResponse::SIZE {
                assert!(!StreamSettingsResponse::is_recognized(&resized(
                    &settings, len
                )));
            }
            if len != Acknowledgement::SIZE {
                assert!(!Acknowledgement::is_recognized(&resized(&ack, len)));
            }
            if len < VideoData::HEADER_LEN {
                let b = resized(&video, len);
                assert!(!VideoData::is_recognized(&b), "len={len}");
                assert!(matches!(
                    VideoData::parse(Bytes::from(b)),
                    Err(PacketError::InvalidSize { .. })
                ));
            }
        }
    }

    #[test]
    fn bad_signature() {
        let mut data = testutil::announcement([1, 2, 3, 4], b"x").to_vec();
        data[0] = b'L';
        assert!(!Announcement::is_recognized(&data));
        assert_eq!(
            Announcement::parse(Bytes::from(data)).unwrap_err(),
            PacketError::UnrecognizedSignature {
                kind: PacketKind::Announcement
            }
        );

        let mut data = testutil::video_data(1, b"abc").to_vec();
        data[98] = b'A';
        assert_eq!(
            VideoData::parse(Bytes::from(data)).unwrap_err(),
            PacketError::UnrecognizedSignature {
                kind: PacketKind::VideoData
            }
        );

        assert_eq!(
            Acknowledgement::parse(Bytes::from_static(b"\x02\x00\x01\x76")).unwrap_err(),
            PacketError::UnrecognizedSignature {
                kind: PacketKind::Acknowledgement
            }
        );
        assert_eq!(PacketKind::recognize(&[0u8; 32]), None);
    }
}
