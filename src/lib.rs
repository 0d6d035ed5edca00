// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the UDP-based video protocol spoken by a family of cheap Wi-Fi
//! IP cameras (the ones which announce themselves with a `luzh` broadcast).
//!
//! The crate is layered:
//!
//! *   [`packet`] recognizes and parses the protocol's binary messages.
//! *   [`codec`] reassembles the H.264 elementary stream carried in video
//!     datagrams and reframes it for a decoder.
//! *   [`client`] holds the [`Session`] state machine which drives the
//!     handshake and acknowledges video data.
//! *   [`VideoStream`] binds a tokio UDP socket and runs a session over it.
//!
//! Everything below [`VideoStream`] is synchronous and does no I/O of its own,
//! so it can be driven by any transport.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

use std::fmt::{Debug, Display};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

mod error;
mod hex;

pub mod client;
pub mod codec;
pub mod packet;
mod tokio;

#[cfg(test)]
mod testutil;

pub use crate::client::{Session, SessionOptions, State, Transport};
pub use crate::tokio::{UdpTransport, VideoStream};
pub use error::Error;

use error::ErrorInt;

/// A wall time taken from the local machine's realtime clock, used in error reporting.
///
/// Currently this just allows formatting via `Debug` and `Display`.
#[derive(Copy, Clone, Debug)]
pub struct WallTime(chrono::DateTime<chrono::Utc>);

impl WallTime {
    fn now() -> Self {
        Self(chrono::Utc::now())
    }
}

impl Display for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%FT%T%.3f"))
    }
}

/// Context of a received datagram.
///
/// This gives enough information to pick out the datagram in a packet capture.
#[derive(Copy, Clone)]
pub struct PacketContext {
    peer_addr: SocketAddr,
    received_wall: WallTime,
}

impl PacketContext {
    /// Creates a context for a datagram from `peer_addr` received just now.
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            received_wall: WallTime::now(),
        }
    }

    #[doc(hidden)]
    pub fn dummy() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }

    /// Returns the address the datagram came from.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[inline]
    pub fn received_wall(&self) -> WallTime {
        self.received_wall
    }
}

impl Display for PacketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", &self.peer_addr, &self.received_wall)
    }
}

impl Debug for PacketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
