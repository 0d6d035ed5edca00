// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reassembly of video frames from datagram payloads.

use bytes::Bytes;
use log::{trace, warn};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// A single fragment can never fit; it was dropped and the buffer untouched.
    #[error("{len}-byte fragment exceeds the {capacity}-byte reassembly buffer")]
    TooSmall { len: usize, capacity: usize },

    /// The fragment didn't fit after the bytes already buffered. Both were dropped.
    #[error(
        "{len}-byte fragment overflows reassembly buffer \
         ({buffered} of {capacity} bytes in use); discarded partial frame"
    )]
    NotEnoughSpace {
        len: usize,
        buffered: usize,
        capacity: usize,
    },
}

/// Fixed-capacity arena which accumulates consecutive payload fragments.
///
/// A frame ends where the next begins: a fragment starting with a start code
/// flushes whatever was buffered before it is appended.
pub struct FrameBuffer {
    buf: Box<[u8]>,
    end: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            end: 0,
        }
    }

    /// Appends `fragment`, returning the previous frame if `fragment` starts a new one.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<Bytes>, BufferError> {
        let capacity = self.buf.len();
        if fragment.len() > capacity {
            return Err(BufferError::TooSmall {
                len: fragment.len(),
                capacity,
            });
        }
        let completed = if super::starts_with_start_code(fragment) {
            self.flush()
        } else {
            None
        };
        if fragment.len() > capacity - self.end {
            let buffered = std::mem::replace(&mut self.end, 0);
            warn!(
                "{}-byte fragment overflows reassembly buffer with {}/{} bytes in use",
                fragment.len(),
                buffered,
                capacity
            );
            return Err(BufferError::NotEnoughSpace {
                len: fragment.len(),
                buffered,
                capacity,
            });
        }
        let new_end = self.end + fragment.len();
        self.buf[self.end..new_end].copy_from_slice(fragment);
        self.end = new_end;
        trace!("buffered {} bytes; {} total", fragment.len(), self.end);
        Ok(completed)
    }

    /// Returns the buffered bytes as a frame, if any, and resets.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.end == 0 {
            return None;
        }
        let frame = Bytes::copy_from_slice(&self.buf[..self.end]);
        self.end = 0;
        Some(frame)
    }

    /// Discards any partial frame.
    pub fn clear(&mut self) {
        self.end = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.end)
            .field("capacity", &self.buf.len())
            .finish()
    }
}
