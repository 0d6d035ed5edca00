// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session state machine: the handshake and video acknowledgement.
//!
//! The camera drives the conversation. It broadcasts an [`Announcement`]
//! periodically; the client answers with a fixed sequence of requests and then
//! acknowledges every [`VideoData`] datagram:
//!
//! ```text
//! camera                                  client
//!   | --- Announcement ------------------->  |  Idle -> GotAnnouncement
//!   | <-- AllInfoRequest -----------------   |
//!   | --- AllInfoResponse ---------------->  |  -> GotAllInfo
//!   | <-- Ack(0, 1), StreamSettingsRequest   |
//!   | --- StreamSettingsResponse --------->  |  -> GotStreamSettings
//!   | <-- Ack(1, 2) ----------------------   |
//!   | --- VideoData(seq) ----------------->  |
//!   | <-- Ack(seq, seq + 1) --------------   |
//! ```
//!
//! A fresh announcement after the handshake has started means the camera
//! restarted; the session goes back to `Idle`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use log::{debug, info, trace, warn};

use crate::codec::{Demuxer, FrameBuffer, VideoFrame};
use crate::packet::{
    Acknowledgement, AllInfoResponse, Announcement, IncomingPacket, PacketKind,
    StreamSettingsResponse, VideoData, ALL_INFO_REQUEST, STREAM_SETTINGS_REQUEST,
};
use crate::{Error, ErrorInt, PacketContext};

/// The UDP port cameras of this family send to.
pub const DEFAULT_PORT: u16 = 3102;

/// Outbound half of the datagram channel to the camera.
///
/// Sends must not block; the session calls this from its `push`.
pub trait Transport {
    fn send(&mut self, data: &[u8], to: SocketAddr) -> Result<(), std::io::Error>;
}

/// Handshake progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Waiting for the camera's announcement.
    Idle,

    /// Sent the all-info request; waiting for the response.
    GotAnnouncement,

    /// Sent the stream settings request; waiting for the response.
    GotAllInfo,

    /// Streaming: every video datagram is acknowledged and reassembled.
    GotStreamSettings,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            State::Idle => "idle",
            State::GotAnnouncement => "got-announcement",
            State::GotAllInfo => "got-all-info",
            State::GotStreamSettings => "got-stream-settings",
        })
    }
}

/// Options which must be known as a session is created.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub(crate) buffer_capacity: usize,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) bind_addr: SocketAddr,
    pub(crate) max_datagram_len: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 50 * 1024,
            peer: None,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_datagram_len: 2048,
        }
    }
}

impl SessionOptions {
    /// Sets the capacity of the frame reassembly buffer, in bytes.
    ///
    /// It must hold the largest expected frame, parameter sets included.
    /// Larger frames are dropped with an error.
    pub fn buffer_capacity(self, buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            ..self
        }
    }

    /// Sends all outbound datagrams to `peer`.
    ///
    /// By default they go to the source of the announcement which started the session.
    pub fn peer(self, peer: Option<SocketAddr>) -> Self {
        Self { peer, ..self }
    }

    /// Sets the local address for [`crate::VideoStream::bind`].
    pub fn bind_addr(self, bind_addr: SocketAddr) -> Self {
        Self { bind_addr, ..self }
    }

    /// Sets the size of the receive buffer; longer datagrams are truncated.
    pub fn max_datagram_len(self, max_datagram_len: usize) -> Self {
        Self {
            max_datagram_len,
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.buffer_capacity == 0 {
            bail!(ErrorInt::InvalidArgument(
                "buffer_capacity must be positive".to_owned()
            ));
        }
        if self.max_datagram_len == 0 {
            bail!(ErrorInt::InvalidArgument(
                "max_datagram_len must be positive".to_owned()
            ));
        }
        Ok(())
    }
}

/// A session with a single camera.
///
/// Feed it every inbound datagram with [`Session::push`], then check for a
/// finished frame with [`Session::pull`]. The session sends its replies
/// through the [`Transport`] synchronously from `push`.
pub struct Session {
    transport: Box<dyn Transport + Send>,
    explicit_peer: Option<SocketAddr>,
    learned_peer: Option<SocketAddr>,
    state: State,
    announcement: Option<Announcement>,
    buffer: FrameBuffer,
    demuxer: Demuxer,

    /// The context of the latest video datagram, for frames completed by [`Session::flush`].
    last_video_ctx: Option<PacketContext>,

    /// A complete video frame ready for pull.
    pending: Option<VideoFrame>,
}

impl Session {
    pub fn new(
        options: SessionOptions,
        transport: Box<dyn Transport + Send>,
    ) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self {
            transport,
            explicit_peer: options.peer,
            learned_peer: None,
            state: State::Idle,
            announcement: None,
            buffer: FrameBuffer::new(options.buffer_capacity),
            demuxer: Demuxer::new(),
            last_video_ctx: None,
            pending: None,
        })
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns where outbound datagrams go, if known yet.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.explicit_peer.or(self.learned_peer)
    }

    /// Returns the most recent announcement, if any.
    pub fn announcement(&self) -> Option<&Announcement> {
        self.announcement.as_ref()
    }

    /// Returns the reassembly buffer, mostly for inspecting its fill level.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Returns the demuxer, for its current decoder configuration.
    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    /// Processes one inbound datagram.
    ///
    /// Errors are never fatal: each means some input was dropped. A frame may
    /// be ready for [`Session::pull`] even when this returns an error.
    ///
    /// Panics if a frame is still pending from the previous call.
    pub fn push(&mut self, ctx: PacketContext, datagram: Bytes) -> Result<(), Error> {
        assert!(self.pending.is_none(), "push with data already pending");
        let kind = match PacketKind::recognize(&datagram) {
            Some(k) => k,
            None => {
                debug!(
                    "[{}] discarding unrecognized {}-byte datagram in state {}: {}",
                    &ctx,
                    datagram.len(),
                    self.state,
                    crate::hex::LimitedHex::new(&datagram, 16),
                );
                return Ok(());
            }
        };
        trace!("[{}] {:?} in state {}", &ctx, kind, self.state);
        match (self.state, kind) {
            (State::Idle, PacketKind::Announcement) => {
                let announcement = parse::<Announcement>(&ctx, datagram)?;
                info!(
                    "[{}] camera {:?} at {} announced itself",
                    &ctx,
                    announcement.service_name(),
                    announcement.server_ip()
                );
                self.announcement = Some(announcement);

                // Every later step is reachable only through this one.
                if self.learned_peer.is_none() {
                    debug!("[{}] learned peer address", &ctx);
                    self.learned_peer = Some(ctx.peer_addr());
                }
                self.send(&ctx, ALL_INFO_REQUEST, "all-info request")?;
                self.transition(&ctx, State::GotAnnouncement);
            }
            (_, PacketKind::Announcement) => {
                let announcement = parse::<Announcement>(&ctx, datagram)?;
                warn!(
                    "[{}] announcement in state {}; camera restarted?",
                    &ctx, self.state
                );
                self.announcement = Some(announcement);
                self.restart();
            }
            (State::GotAnnouncement, PacketKind::AllInfoResponse) => {
                parse::<AllInfoResponse>(&ctx, datagram)?;
                self.send(
                    &ctx,
                    &Acknowledgement::new(0, 1).to_bytes(),
                    "all-info acknowledgement",
                )?;
                self.send(&ctx, STREAM_SETTINGS_REQUEST, "stream settings request")?;
                self.transition(&ctx, State::GotAllInfo);
            }
            (State::GotAllInfo, PacketKind::StreamSettingsResponse) => {
                parse::<StreamSettingsResponse>(&ctx, datagram)?;
                self.send(
                    &ctx,
                    &Acknowledgement::new(1, 2).to_bytes(),
                    "stream settings acknowledgement",
                )?;
                info!("[{}] stream started", &ctx);
                self.transition(&ctx, State::GotStreamSettings);
            }
            (State::GotStreamSettings, PacketKind::VideoData) => {
                let video = parse::<VideoData>(&ctx, datagram)?;
                self.last_video_ctx = Some(ctx);
                let ack = Acknowledgement::for_sequence(video.sequence());
                let sent = self.send(&ctx, &ack.to_bytes(), "video acknowledgement");
                self.reassemble(ctx, video.payload())?;
                sent?;
            }
            (state, kind) => {
                debug!("[{}] discarding {:?} in state {}", &ctx, kind, state);
            }
        }
        Ok(())
    }

    /// Returns a frame completed by the last `push` or `flush`, if any.
    pub fn pull(&mut self) -> Option<VideoFrame> {
        self.pending.take()
    }

    /// Forces any partially buffered frame through the demuxer.
    ///
    /// The final frame of a stream is otherwise never completed, as frames
    /// end only when the next one starts.
    pub fn flush(&mut self) -> Result<(), Error> {
        assert!(self.pending.is_none(), "flush with data already pending");
        let Some(ctx) = self.last_video_ctx else {
            return Ok(());
        };
        if let Some(frame) = self.buffer.flush() {
            self.demux(ctx, &frame)?;
        }
        Ok(())
    }

    fn reassemble(&mut self, ctx: PacketContext, payload: &[u8]) -> Result<(), Error> {
        let frame = match self.buffer.push(payload) {
            Ok(Some(f)) => f,
            Ok(None) => return Ok(()),
            Err(source) => bail!(ErrorInt::BufferError {
                pkt_ctx: ctx,
                source
            }),
        };
        self.demux(ctx, &frame)
    }

    fn demux(&mut self, ctx: PacketContext, frame: &[u8]) -> Result<(), Error> {
        match self.demuxer.push(ctx, frame) {
            Ok(f) => {
                self.pending = f;
                Ok(())
            }
            Err(source) => {
                warn!("[{}] dropping {}-byte frame: {}", &ctx, frame.len(), &source);
                bail!(ErrorInt::StreamParseError {
                    pkt_ctx: ctx,
                    source
                })
            }
        }
    }

    fn send(&mut self, ctx: &PacketContext, data: &[u8], what: &'static str) -> Result<(), Error> {
        let peer = self.peer().unwrap_or_else(|| ctx.peer_addr());
        trace!("[{}] sending {} to {}", ctx, what, peer);
        self.transport
            .send(data, peer)
            .map_err(|source| {
                wrap!(ErrorInt::TransportError {
                    pkt_ctx: *ctx,
                    peer,
                    what,
                    source,
                })
            })
    }

    fn transition(&mut self, ctx: &PacketContext, state: State) {
        debug!("[{}] {} -> {}", ctx, self.state, state);
        self.state = state;
    }

    fn restart(&mut self) {
        self.state = State::Idle;
        self.learned_peer = None;
        self.last_video_ctx = None;
        self.buffer.clear();
        self.demuxer.reset();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("peer", &self.peer())
            .field("announcement", &self.announcement)
            .field("buffer", &self.buffer)
            .field("parameters", &self.demuxer.parameters())
            .finish()
    }
}

fn parse<P: IncomingPacket>(ctx: &PacketContext, data: Bytes) -> Result<P, Error> {
    P::parse(data.clone()).map_err(|source| {
        wrap!(ErrorInt::PacketError {
            pkt_ctx: *ctx,
            source,
            data,
        })
    })
}
