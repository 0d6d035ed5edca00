// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [H.264](https://www.itu.int/rec/T-REC-H.264-201906-I/en) Annex B frames to
//! length-prefixed access units.

use bytes::{BufMut, Bytes, BytesMut};
use h264_reader::nal::UnitType;
use log::{debug, trace};
use thiserror::Error;

use super::{find_start_code, VideoFrame, VideoParameters, START_CODE};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamParseError {
    /// Only a frame beginning with an SPS can establish the decoder configuration.
    #[error("no decoder configuration yet; dropping frame starting with NAL type {nal_type}")]
    MissingConfiguration { nal_type: u8 },

    #[error("malformed parameter sets: {reason}")]
    MalformedParameterSet { reason: String },

    #[error("{len}-byte slice can't be length-prefixed")]
    SliceTooLong { len: usize },
}

fn malformed(reason: impl Into<String>) -> StreamParseError {
    StreamParseError::MalformedParameterSet {
        reason: reason.into(),
    }
}

/// Returns the type of the NAL unit whose start code is at `start_code_pos`.
fn nal_type_at(frame: &[u8], start_code_pos: usize) -> u8 {
    frame
        .get(start_code_pos + START_CODE.len())
        .map(|&b| b & 0x1F)
        .unwrap_or(0)
}

fn is(nal_type: u8, unit_type: UnitType) -> bool {
    UnitType::for_id(nal_type).map_or(false, |t| t == unit_type)
}

/// Turns completed Annex B frames into [`VideoFrame`]s.
///
/// Each frame is expected to hold either a coded slice, or an SPS and PPS
/// followed by a coded slice. The latter replaces the decoder configuration.
#[derive(Debug, Default)]
pub struct Demuxer {
    parameters: Option<VideoParameters>,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current decoder configuration, if one has been seen.
    pub fn parameters(&self) -> Option<&VideoParameters> {
        self.parameters.as_ref()
    }

    /// Forgets the decoder configuration, as when the camera restarts.
    pub fn reset(&mut self) {
        self.parameters = None;
    }

    /// Processes one frame, returning the slice it carries, if any.
    ///
    /// On error the frame is dropped and any prior configuration is kept.
    pub fn push(
        &mut self,
        ctx: crate::PacketContext,
        frame: &[u8],
    ) -> Result<Option<VideoFrame>, StreamParseError> {
        if frame.len() <= START_CODE.len() {
            trace!("[{}] discarding {}-byte frame", ctx, frame.len());
            return Ok(None);
        }
        let first_type = nal_type_at(frame, 0);
        if self.parameters.is_none() && !is(first_type, UnitType::SeqParameterSet) {
            return Err(StreamParseError::MissingConfiguration {
                nal_type: first_type,
            });
        }

        let mut slice_start = 0;
        let mut new_parameters = false;
        if is(first_type, UnitType::SeqParameterSet) {
            let pps_start = find_start_code(frame, START_CODE.len())
                .ok_or_else(|| malformed("no NAL unit follows SPS"))?;
            let pps_type = nal_type_at(frame, pps_start);
            if !is(pps_type, UnitType::PicParameterSet) {
                return Err(malformed(format!(
                    "SPS is followed by NAL type {pps_type}, not PPS"
                )));
            }
            let next_start = find_start_code(frame, pps_start + START_CODE.len())
                .ok_or_else(|| malformed("no NAL unit follows PPS"))?;
            let sps_nal = &frame[START_CODE.len()..pps_start];
            let pps_nal = &frame[pps_start + START_CODE.len()..next_start];
            let parameters = parse_sps_and_pps(sps_nal, pps_nal)?;
            if self.parameters.as_ref() != Some(&parameters) {
                debug!("[{}] new parameters: {:#?}", ctx, &parameters);
                new_parameters = true;
            }
            self.parameters = Some(parameters);
            slice_start = next_start;
        }

        let slice_type = nal_type_at(frame, slice_start);
        let is_random_access_point = match UnitType::for_id(slice_type) {
            Ok(UnitType::SliceLayerWithoutPartitioningIdr) => true,
            Ok(UnitType::SliceLayerWithoutPartitioningNonIdr) => false,
            _ => {
                trace!("[{}] ignoring NAL type {}", ctx, slice_type);
                return Ok(None);
            }
        };
        let Some(parameters) = self.parameters.clone() else {
            return Err(StreamParseError::MissingConfiguration {
                nal_type: first_type,
            });
        };

        let slice = &frame[slice_start + START_CODE.len()..];
        let len = u32::try_from(slice.len())
            .map_err(|_| StreamParseError::SliceTooLong { len: slice.len() })?;
        let mut data = BytesMut::with_capacity(START_CODE.len() + slice.len());
        data.put_u32(len);
        data.extend_from_slice(slice);
        Ok(Some(VideoFrame {
            ctx,
            parameters,
            new_parameters,
            is_random_access_point,
            data: data.freeze(),
        }))
    }
}

/// Builds a configuration from an SPS and PPS, each including its header byte.
fn parse_sps_and_pps(sps_nal: &[u8], pps_nal: &[u8]) -> Result<VideoParameters, StreamParseError> {
    let sps_rbsp = h264_reader::rbsp::decode_nal(sps_nal)
        .map_err(|e| malformed(format!("can't decode SPS: {e}")))?;
    if sps_rbsp.len() < 4 {
        return Err(malformed("SPS too short"));
    }
    let rfc6381_codec = format!(
        "avc1.{:02X}{:02X}{:02X}",
        sps_rbsp[0], sps_rbsp[1], sps_rbsp[2]
    );
    let sps = h264_reader::nal::sps::SeqParameterSet::from_bits(
        h264_reader::rbsp::BitReader::new(&*sps_rbsp),
    )
    .map_err(|e| malformed(format!("bad SPS: {e:?}")))?;
    let pixel_dimensions = sps
        .pixel_dimensions()
        .map_err(|e| malformed(format!("SPS has invalid pixel dimensions: {e:?}")))?;

    // AVCDecoderConfigurationRecord, ISO/IEC 14496-15 section 5.2.4.1.
    let sps_len = u16::try_from(sps_nal.len()).map_err(|_| malformed("SPS too long"))?;
    let pps_len = u16::try_from(pps_nal.len()).map_err(|_| malformed("PPS too long"))?;
    let mut config = BytesMut::with_capacity(11 + sps_nal.len() + pps_nal.len());
    config.put_u8(1); // configurationVersion
    config.extend_from_slice(&sps_rbsp[0..=2]); // profile, compatibility, level
    config.put_u8(0xff); // lengthSizeMinusOne = 3
    config.put_u8(0xe1); // one SPS
    config.put_u16(sps_len);
    let sps_start = config.len();
    config.extend_from_slice(sps_nal);
    let sps_end = config.len();
    config.put_u8(1); // one PPS
    config.put_u16(pps_len);
    let pps_start = config.len();
    config.extend_from_slice(pps_nal);
    let pps_end = config.len();

    let extra_data: Bytes = config.freeze();
    Ok(VideoParameters {
        pixel_dimensions,
        rfc6381_codec,
        sps_nal: extra_data.slice(sps_start..sps_end),
        pps_nal: extra_data.slice(pps_start..pps_end),
        extra_data,
    })
}
