// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A bounds-checked cursor over the contiguous part of a packet.
//!
//! A packet may be longer than the bytes that can be reached without
//! a further pullup. The cursor knows both lengths and only ever
//! hands out views that fit inside the contiguous prefix. The
//! invariant `consumed <= contiguous_len <= base.len()` holds for
//! the whole life of a cursor, including after a failed operation,
//! which leaves the cursor where it was.

use super::headers::RawHeader;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum CursorError {
    #[error("contiguous length {contig} exceeds buffer length {len}")]
    BadContig { contig: usize, len: usize },

    #[error("need {need} bytes at offset {off}, only {avail} contiguous")]
    Short { off: usize, need: usize, avail: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct HdrCursor<'a> {
    base: &'a [u8],
    contig: usize,
    consumed: usize,
}

impl<'a> HdrCursor<'a> {
    pub fn new(base: &'a [u8], contig: usize) -> Result<Self, CursorError> {
        Self::resume(base, contig, 0)
    }

    /// Create a cursor which has already consumed `consumed` bytes.
    pub fn resume(
        base: &'a [u8],
        contig: usize,
        consumed: usize,
    ) -> Result<Self, CursorError> {
        if contig > base.len() {
            return Err(CursorError::BadContig { contig, len: base.len() });
        }

        if consumed > contig {
            return Err(CursorError::Short {
                off: 0,
                need: consumed,
                avail: contig,
            });
        }

        Ok(Self { base, contig, consumed })
    }

    /// The number of bytes consumed so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    #[inline]
    pub fn contiguous_len(&self) -> usize {
        self.contig
    }

    /// The number of contiguous bytes left after the current
    /// position.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.contig - self.consumed
    }

    /// Check that `need` bytes beyond the current position are
    /// contiguous, without moving.
    pub fn ensure(&self, need: usize) -> Result<(), CursorError> {
        self.ensure_at(0, need)
    }

    /// Check that `need` bytes starting `off` bytes beyond the
    /// current position are contiguous, without moving.
    pub fn ensure_at(
        &self,
        off: usize,
        need: usize,
    ) -> Result<(), CursorError> {
        let start = self.consumed.checked_add(off);
        let end = start.and_then(|s| s.checked_add(need));
        match end {
            Some(end) if end <= self.contig => Ok(()),
            _ => Err(CursorError::Short {
                off: self.consumed.saturating_add(off),
                need,
                avail: self.remaining().saturating_sub(off),
            }),
        }
    }

    /// Move past `n` bytes.
    pub fn advance(&mut self, n: usize) -> Result<(), CursorError> {
        self.ensure(n)?;
        self.consumed += n;
        Ok(())
    }

    /// Move to the absolute position `pos`.
    pub fn seek_to(&mut self, pos: usize) -> Result<(), CursorError> {
        if pos > self.contig {
            return Err(CursorError::Short {
                off: pos,
                need: 0,
                avail: self.contig,
            });
        }
        self.consumed = pos;
        Ok(())
    }

    /// View the header at the current position and move past it.
    pub fn view<T: RawHeader>(&mut self) -> Result<&'a T, CursorError> {
        let hdr = self.peek_at::<T>(0)?;
        self.consumed += T::SIZE;
        Ok(hdr)
    }

    /// View the header at the current position without moving.
    pub fn peek<T: RawHeader>(&self) -> Result<&'a T, CursorError> {
        self.peek_at::<T>(0)
    }

    /// View the header `off` bytes beyond the current position
    /// without moving.
    pub fn peek_at<T: RawHeader>(
        &self,
        off: usize,
    ) -> Result<&'a T, CursorError> {
        self.ensure_at(off, T::SIZE)?;
        let start = self.consumed + off;
        let bytes = &self.base[start..self.contig];
        // The length was checked above and every raw header is
        // unaligned, so the cast cannot fail.
        T::ref_from_prefix(bytes).map(|(hdr, _)| hdr).map_err(|_| {
            CursorError::Short { off: start, need: T::SIZE, avail: bytes.len() }
        })
    }

    /// The contiguous bytes after the current position.
    pub fn rest(&self) -> &'a [u8] {
        &self.base[self.consumed..self.contig]
    }
}
