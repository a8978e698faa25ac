// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The internet checksum.
//!
//! The classifier only ever *locates* checksum fields. The engine
//! computes checksums in exactly two places: the IPv4 header of a
//! reassembled datagram, and the incremental fixup of a TCP header
//! whose MSS option was rewritten by [`super::tcp::MtuClamp`].
//!
//! # Checksums and Endianness
//!
//! The checksum is a sequence of two bytes, not a logical `u16`. The
//! sum is built by treating each pair of network-order bytes as a
//! native 16-bit integer (`{to,from}_ne_bytes()`), and the result is
//! stored back the same way. No byte-order conversion is ever
//! applied to the checksum field. See RFC 1071 §1.B.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

/// The checksum value, as it is contained in a network header.
///
/// This holds the bytes with one's complement applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes found in a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum calculation.
///
/// Carries are folded only when the sum is finalized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by subtracting the contents of `bytes`.
    ///
    /// Paired with [`Self::add_bytes`] this is the RFC 1624 update
    /// for a region of a header that was rewritten in place.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Fold the accumulated carries and return the resulting value.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

/// Compute the header checksum of an IPv4 header, treating the
/// checksum field (bytes 10..12) as zero.
pub fn ipv4_hdr_checksum(hdr: &[u8]) -> HeaderChecksum {
    let mut csum = Checksum::new();
    if hdr.len() < 12 {
        csum.add_bytes(hdr);
    } else {
        csum.add_bytes(&hdr[..10]);
        csum.add_bytes(&hdr[12..]);
    }
    HeaderChecksum::from(csum)
}

/// Apply an incremental update to the checksum stored at
/// `csum_off` in `hdr`, given the old and new contents of a region
/// starting at the even offset that contained the rewrite.
pub fn update_in_place(
    hdr: &mut [u8],
    csum_off: usize,
    old: &[u8],
    new: &[u8],
) {
    let Some(field) = hdr.get_mut(csum_off..csum_off + 2) else {
        return;
    };
    let mut csum =
        Checksum::from(HeaderChecksum::wrap([field[0], field[1]]));
    csum.sub_bytes(old);
    csum.add_bytes(new);
    field.copy_from_slice(&HeaderChecksum::from(csum).bytes());
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);

    for pair in &mut chunks {
        csum += u16::from_ne_bytes([pair[0], pair[1]]) as u32;
    }

    if let [last] = chunks.remainder() {
        csum += u16::from_ne_bytes([*last, 0]) as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);

    for pair in &mut chunks {
        csum += (!u16::from_ne_bytes([pair[0], pair[1]])) as u32;
    }

    if let [last] = chunks.remainder() {
        csum += (!u16::from_ne_bytes([*last, 0])) as u32;
    }

    csum
}
