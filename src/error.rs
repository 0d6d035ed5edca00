// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, net::SocketAddr, sync::Arc};

use crate::codec::{BufferError, StreamParseError};
use crate::packet::PacketError;
use crate::PacketContext;
use bytes::Bytes;
use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// Currently the focus is on providing detailed human-readable error messages.
/// In most cases they have enough information to find the offending datagram
/// in Wireshark.
///
/// None of these errors are fatal to a session. Each one means a single
/// datagram or frame was dropped; the caller may keep pushing input.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "[{pkt_ctx}] Unparseable datagram: {source}\n{:#?}",
        crate::hex::LimitedHex::new(data, 64)
    )]
    PacketError {
        pkt_ctx: PacketContext,
        source: PacketError,
        data: Bytes,
    },

    #[error("[{pkt_ctx}] Reassembly buffer dropped data: {source}")]
    BufferError {
        pkt_ctx: PacketContext,
        source: BufferError,
    },

    #[error("[{pkt_ctx}] Dropped video frame: {source}")]
    StreamParseError {
        pkt_ctx: PacketContext,
        source: StreamParseError,
    },

    #[error("[{pkt_ctx}] Error sending {what} to {peer}: {source}")]
    TransportError {
        pkt_ctx: PacketContext,
        peer: SocketAddr,
        what: &'static str,
        source: std::io::Error,
    },

    #[error("Unable to bind UDP socket to {addr}: {source}")]
    BindError {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("[{local_addr}] Error receiving UDP datagram: {source}")]
    UdpRecvError {
        local_addr: SocketAddr,
        source: std::io::Error,
    },
}
