// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elementary stream handling.
//!
//! Video datagrams carry an H.264 Annex B byte stream cut into arbitrary
//! pieces. [`FrameBuffer`] glues the pieces back together into frames, and
//! [`Demuxer`] turns each frame into a [`VideoFrame`] a decoder can consume:
//! parameter sets become [`VideoParameters`] and the slice gets a 4-byte
//! length prefix in place of its start code.

use bytes::{Buf, Bytes};
use pretty_hex::PrettyHex;

mod buffer;
pub(crate) mod h264;

pub use buffer::{BufferError, FrameBuffer};
pub use h264::{Demuxer, StreamParseError};

/// The Annex B start code which precedes every NAL unit on the wire.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

#[inline]
pub(crate) fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(&START_CODE)
}

/// Returns the position of the first start code at or after `from` which is
/// followed by at least a NAL header byte.
pub(crate) fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let search = data.get(from..)?;
    search
        .windows(START_CODE.len() + 1)
        .position(|w| w[..START_CODE.len()] == START_CODE)
        .map(|p| from + p)
}

/// Decoder configuration derived from a sequence parameter set and picture
/// parameter set pair.
#[derive(Clone)]
pub struct VideoParameters {
    pixel_dimensions: (u32, u32),
    rfc6381_codec: String,
    sps_nal: Bytes,
    pps_nal: Bytes,
    extra_data: Bytes,
}

impl VideoParameters {
    /// Returns a codec description in
    /// [RFC-6381](https://tools.ietf.org/html/rfc6381) form, eg `avc1.4D401E`.
    pub fn rfc6381_codec(&self) -> &str {
        &self.rfc6381_codec
    }

    /// Returns the overall dimensions of the video frame in pixels, as `(width, height)`.
    pub fn pixel_dimensions(&self) -> (u32, u32) {
        self.pixel_dimensions
    }

    /// The SPS NAL unit, including its header byte but not its start code.
    pub fn sps(&self) -> &[u8] {
        &self.sps_nal
    }

    /// The PPS NAL unit, including its header byte but not its start code.
    pub fn pps(&self) -> &[u8] {
        &self.pps_nal
    }

    /// The codec-specific "extra data" to feed to eg ffmpeg to decode the video frames:
    /// an `AVCDecoderConfigurationRecord` declaring 4-byte NAL length prefixes.
    pub fn extra_data(&self) -> &Bytes {
        &self.extra_data
    }
}

impl std::fmt::Debug for VideoParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoParameters")
            .field("rfc6381_codec", &self.rfc6381_codec)
            .field("pixel_dimensions", &self.pixel_dimensions)
            .field("extra_data", &self.extra_data.hex_dump())
            .finish()
    }
}

impl PartialEq for VideoParameters {
    /// Parameters are equal iff they came from the same SPS and PPS bytes.
    fn eq(&self, other: &Self) -> bool {
        self.extra_data == other.extra_data
    }
}

impl Eq for VideoParameters {}

/// A single encoded video frame (aka picture, video sample, or video access unit).
///
/// The data is one coded slice NAL unit in length-prefixed form: a 4-byte
/// big-endian length followed by the NAL unit itself. Use the [bytes::Buf]
/// implementation or [`VideoFrame::data`] to retrieve it.
pub struct VideoFrame {
    ctx: crate::PacketContext,

    parameters: VideoParameters,

    /// True iff this frame's SPS and PPS replaced the decoder configuration.
    pub new_parameters: bool,

    /// If this is an "instantaneous decoding refresh (IDR)" picture, aka key
    /// frame. It can be decoded without any other and may be presented
    /// immediately; other frames are presented in arrival order.
    pub is_random_access_point: bool,

    data: Bytes,
}

impl VideoFrame {
    /// Returns the context of the datagram which completed this frame.
    ///
    /// Frames are completed when the *next* frame's first datagram arrives,
    /// so this is usually one datagram after the frame's last byte.
    #[inline]
    pub fn ctx(&self) -> &crate::PacketContext {
        &self.ctx
    }

    /// Returns the decoder configuration in effect for this frame.
    #[inline]
    pub fn parameters(&self) -> &VideoParameters {
        &self.parameters
    }

    /// Returns the length-prefixed slice.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("ctx", &self.ctx)
            .field("new_parameters", &self.new_parameters)
            .field("is_random_access_point", &self.is_random_access_point)
            .field("data", &crate::hex::LimitedHex::new(&self.data, 64))
            .finish()
    }
}

impl Buf for VideoFrame {
    fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.data.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.data.advance(cnt)
    }
}
