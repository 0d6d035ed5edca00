// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! tokio-based [`VideoStream`].
//!
//! In theory there could be a similar async-std-based implementation.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use log::debug;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

use crate::client::{Session, SessionOptions, Transport};
use crate::codec::VideoFrame;
use crate::{Error, ErrorInt, PacketContext};

/// A [`Transport`] which sends through a shared tokio UDP socket without waiting.
///
/// A datagram the socket can't take immediately is reported as an error
/// rather than queued.
#[derive(Clone, Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8], to: SocketAddr) -> Result<(), std::io::Error> {
        let n = self.socket.try_send_to(data, to)?;
        if n != data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("sent only {} of {} bytes", n, data.len()),
            ));
        }
        Ok(())
    }
}

/// A session running over a bound UDP socket, which implements `Stream` and `Unpin`.
///
/// Each item is a video frame, or an error describing input which was dropped.
/// Errors don't end the stream; it continues until dropped.
pub struct VideoStream {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    session: Session,
    recv_buf: Box<[u8]>,
}

impl VideoStream {
    /// Binds to `options`' bind address and waits for a camera's announcement.
    pub async fn bind(options: SessionOptions) -> Result<Self, Error> {
        options.validate()?;
        let addr = options.bind_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| wrap!(ErrorInt::BindError { addr, source }))?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| wrap!(ErrorInt::BindError { addr, source }))?;
        debug!("listening on {}", local_addr);
        let socket = Arc::new(socket);
        let recv_buf = vec![0u8; options.max_datagram_len].into_boxed_slice();
        let session = Session::new(options, Box::new(UdpTransport::new(socket.clone())))?;
        Ok(Self {
            socket,
            local_addr,
            session,
            recv_buf,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStream")
            .field("local_addr", &self.local_addr)
            .field("session", &self.session)
            .finish()
    }
}

impl Stream for VideoStream {
    type Item = Result<VideoFrame, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(frame) = this.session.pull() {
                return Poll::Ready(Some(Ok(frame)));
            }
            let mut buf = ReadBuf::new(&mut this.recv_buf[..]);
            let from = match this.socket.poll_recv_from(cx, &mut buf) {
                Poll::Ready(Ok(from)) => from,
                Poll::Ready(Err(source)) => {
                    return Poll::Ready(Some(Err(wrap!(ErrorInt::UdpRecvError {
                        local_addr: this.local_addr,
                        source,
                    }))))
                }
                Poll::Pending => return Poll::Pending,
            };

            // The receive buffer is reused; the session keeps its own copy.
            let datagram = Bytes::copy_from_slice(buf.filled());
            if let Err(e) = this.session.push(PacketContext::new(from), datagram) {
                return Poll::Ready(Some(Err(e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::packet::{ALL_INFO_REQUEST, STREAM_SETTINGS_REQUEST};
    use crate::testutil::{self, annex_b, init_logging, PPS, SPS};

    async fn expect(camera: &UdpSocket, want: &[u8]) {
        let mut buf = [0u8; 256];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), camera.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], want);
    }

    #[tokio::test]
    async fn loopback() {
        init_logging();
        let stream = VideoStream::bind(
            SessionOptions::default().bind_addr("127.0.0.1:0".parse().unwrap()),
        )
        .await
        .unwrap();
        let client = stream.local_addr();
        let camera = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let camera_addr = camera.local_addr().unwrap();
        let receiver = tokio::spawn(async move {
            let mut stream = stream;
            let frame = stream.next().await.unwrap().unwrap();
            (frame, stream.session().peer())
        });

        camera
            .send_to(&testutil::announcement([127, 0, 0, 1], b"LOOPCAM"), client)
            .await
            .unwrap();
        expect(&camera, ALL_INFO_REQUEST).await;
        camera
            .send_to(&testutil::all_info_response(), client)
            .await
            .unwrap();
        expect(&camera, b"\x01\x00\x01\x76").await;
        expect(&camera, STREAM_SETTINGS_REQUEST).await;
        camera
            .send_to(&testutil::stream_settings_response(), client)
            .await
            .unwrap();
        expect(&camera, b"\x01\x01\x02\x76").await;

        let idr = b"\x65\x88\x84\x00\x21";
        camera
            .send_to(
                &testutil::video_data(9, &annex_b(&[SPS, PPS, idr])),
                client,
            )
            .await
            .unwrap();
        expect(&camera, b"\x01\x09\x0a\x76").await;
        camera
            .send_to(&testutil::video_data(10, &annex_b(&[b"\x41\x9a"])), client)
            .await
            .unwrap();
        expect(&camera, b"\x01\x0a\x0b\x76").await;

        let (frame, peer) = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, Some(camera_addr));
        assert!(frame.is_random_access_point);
        assert_eq!(frame.ctx().peer_addr(), camera_addr);
        assert_eq!(&frame.data()[..4], b"\x00\x00\x00\x05");
        assert_eq!(&frame.data()[4..], &idr[..]);
    }

    #[tokio::test]
    async fn debug_shows_session() {
        let stream = VideoStream::bind(
            SessionOptions::default().bind_addr("127.0.0.1:0".parse().unwrap()),
        )
        .await
        .unwrap();
        let s = format!("{:?}", &stream);
        assert!(s.starts_with("VideoStream"), "{s}");
        assert!(s.contains(&stream.local_addr().to_string()), "{s}");
        assert!(s.contains("Idle"), "{s}");
    }

    #[tokio::test]
    async fn bind_rejects_zero_capacity() {
        let e = VideoStream::bind(
            SessionOptions::default()
                .bind_addr("127.0.0.1:0".parse().unwrap())
                .buffer_capacity(0),
        )
        .await
        .unwrap_err();
        assert!(e.to_string().contains("buffer_capacity"), "{e}");
    }
}
