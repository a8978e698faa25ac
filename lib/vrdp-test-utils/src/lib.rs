// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet builders for unit, integration and fuzz tests.
//!
//! Everything here produces plain byte vectors, header by header, so
//! a test can truncate, corrupt or re-fragment them at will. IPv4
//! headers carry a valid checksum, filled in by smoltcp.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

use smoltcp::wire::IpAddress;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::TcpPacket;

pub use vrdp::api::IpAddr;
pub use vrdp::api::IpVersion;
pub use vrdp::api::Ipv4Addr;
pub use vrdp::api::Ipv6Addr;
pub use vrdp::api::MacAddr;
pub use vrdp::api::TcpFlags;
pub use vrdp::api::ETHER_TYPE_ARP;
pub use vrdp::api::ETHER_TYPE_IPV4;
pub use vrdp::api::ETHER_TYPE_IPV6;
pub use vrdp::api::ETHER_TYPE_PBB;
pub use vrdp::api::ETHER_TYPE_VLAN;
pub use vrdp::api::PROTO_ICMP;
pub use vrdp::api::PROTO_ICMPV6;
pub use vrdp::api::PROTO_IPV6_FRAG;
pub use vrdp::api::PROTO_SCTP;
pub use vrdp::api::PROTO_TCP;
pub use vrdp::api::PROTO_UDP;

pub const IP4_SRC: Ipv4Addr = Ipv4Addr::from_const([10, 0, 0, 1]);
pub const IP4_DST: Ipv4Addr = Ipv4Addr::from_const([10, 0, 0, 2]);
pub const IP6_SRC: Ipv6Addr =
    Ipv6Addr::from_const([0xfd00, 0, 0, 0, 0, 0, 0, 1]);
pub const IP6_DST: Ipv6Addr =
    Ipv6Addr::from_const([0xfd00, 0, 0, 0, 0, 0, 0, 2]);
pub const MAC_SRC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x01]);
pub const MAC_DST: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x02]);

/// The fragmentation fields of an IPv4 header.
#[derive(Clone, Copy, Debug, Default)]
pub struct V4Frag {
    /// Offset in bytes; must be a multiple of 8.
    pub offset: usize,
    pub more: bool,
}

/// An IPv4 header with no options, followed by `payload`.
pub fn ipv4(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ident: u16,
    frag: V4Frag,
    payload: &[u8],
) -> Vec<u8> {
    ipv4_with_opts(src, dst, proto, ident, frag, &[], payload)
}

/// An IPv4 header carrying `opts` (padded to a multiple of four with
/// EOL), followed by `payload`.
pub fn ipv4_with_opts(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    ident: u16,
    frag: V4Frag,
    opts: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut opts = opts.to_vec();
    while opts.len() % 4 != 0 {
        opts.push(0);
    }

    let hdr_len = 20 + opts.len();
    let total = u16::try_from(hdr_len + payload.len()).unwrap();
    let mut ff = u16::try_from(frag.offset / 8).unwrap();
    if frag.more {
        ff |= 0x2000;
    }

    let mut v = Vec::with_capacity(hdr_len + payload.len());
    v.push(0x40 | u8::try_from(hdr_len / 4).unwrap());
    v.push(0);
    v.extend(total.to_be_bytes());
    v.extend(ident.to_be_bytes());
    v.extend(ff.to_be_bytes());
    v.extend([64, proto, 0, 0]);
    v.extend(src.bytes());
    v.extend(dst.bytes());
    v.extend(&opts);
    fill_ipv4_csum(&mut v[..hdr_len]);
    v.extend_from_slice(payload);
    v
}

/// Recompute the checksum of the IPv4 header at the front of `hdr`.
pub fn fill_ipv4_csum(hdr: &mut [u8]) {
    Ipv4Packet::new_unchecked(hdr).fill_checksum();
}

/// Does the IPv4 header at the front of `pkt` carry a valid checksum?
pub fn ipv4_csum_ok(pkt: &[u8]) -> bool {
    Ipv4Packet::new_checked(pkt)
        .map(|p| p.verify_checksum())
        .unwrap_or(false)
}

// The addresses and segment of an option-less IPv4 TCP packet.
fn tcp4_parts(pkt: &[u8]) -> (IpAddress, IpAddress, usize) {
    let hdr_len = usize::from(pkt[0] & 0x0F) * 4;
    let src = Ipv4Address::from_bytes(&pkt[12..16]);
    let dst = Ipv4Address::from_bytes(&pkt[16..20]);
    (IpAddress::Ipv4(src), IpAddress::Ipv4(dst), hdr_len)
}

/// Fill in the TCP checksum of the IPv4 TCP packet `pkt`.
pub fn fill_tcp4_csum(pkt: &mut [u8]) {
    let (src, dst, off) = tcp4_parts(pkt);
    TcpPacket::new_unchecked(&mut pkt[off..]).fill_checksum(&src, &dst);
}

/// Does the IPv4 TCP packet `pkt` carry a valid TCP checksum?
pub fn tcp4_csum_ok(pkt: &[u8]) -> bool {
    let (src, dst, off) = tcp4_parts(pkt);
    TcpPacket::new_checked(&pkt[off..])
        .map(|t| t.verify_checksum(&src, &dst))
        .unwrap_or(false)
}

/// An IPv6 header followed by `payload`.
pub fn ipv6(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    next: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut v = Vec::with_capacity(40 + payload.len());
    v.extend([0x60, 0, 0, 0]);
    v.extend(u16::try_from(payload.len()).unwrap().to_be_bytes());
    v.extend([next, 64]);
    v.extend(src.bytes());
    v.extend(dst.bytes());
    v.extend_from_slice(payload);
    v
}

/// An IPv6 Fragment extension header.
pub fn ipv6_frag_hdr(
    next: u8,
    offset: usize,
    more: bool,
    ident: u32,
) -> Vec<u8> {
    let mut of = u16::try_from(offset).unwrap() & 0xFFF8;
    if more {
        of |= 1;
    }
    let mut v = vec![next, 0];
    v.extend(of.to_be_bytes());
    v.extend(ident.to_be_bytes());
    v
}

/// A TCP header with the given options, which must already be a
/// multiple of four bytes.
pub fn tcp(sport: u16, dport: u16, flags: TcpFlags, opts: &[u8]) -> Vec<u8> {
    assert_eq!(opts.len() % 4, 0, "TCP options must be padded");
    let doff = u8::try_from((20 + opts.len()) / 4).unwrap();
    let mut v = Vec::with_capacity(20 + opts.len());
    v.extend(sport.to_be_bytes());
    v.extend(dport.to_be_bytes());
    v.extend([0, 0, 0, 1, 0, 0, 0, 0]);
    v.extend([doff << 4, flags.bits(), 0xFA, 0xF0]);
    v.extend([0, 0, 0, 0]);
    v.extend_from_slice(opts);
    v
}

/// The four bytes of an MSS option.
pub fn mss_opt(mss: u16) -> [u8; 4] {
    let b = mss.to_be_bytes();
    [2, 4, b[0], b[1]]
}

pub fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(8 + payload.len()).unwrap();
    let mut v = Vec::with_capacity(8 + payload.len());
    v.extend(sport.to_be_bytes());
    v.extend(dport.to_be_bytes());
    v.extend(len.to_be_bytes());
    v.extend([0, 0]);
    v.extend_from_slice(payload);
    v
}

pub fn sctp(sport: u16, dport: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(12);
    v.extend(sport.to_be_bytes());
    v.extend(dport.to_be_bytes());
    v.extend([0; 8]);
    v
}

/// An ICMP or ICMPv6 header (type, code, checksum and four bytes of
/// "rest of header") followed by `payload`.
pub fn icmp(ty: u8, code: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![ty, code, 0, 0, 0, 0, 0, 0];
    v.extend_from_slice(payload);
    v
}

pub fn ether(dst: MacAddr, src: MacAddr, ether_type: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(14);
    v.extend(dst.bytes());
    v.extend(src.bytes());
    v.extend(ether_type.to_be_bytes());
    v
}

/// An 802.1Q tag: the TCI and the type that follows it.
pub fn vlan(vid: u16, ether_type: u16) -> Vec<u8> {
    let mut v = (vid & 0x0FFF).to_be_bytes().to_vec();
    v.extend(ether_type.to_be_bytes());
    v
}

/// An 802.1ah I-TAG.
pub fn pbb_itag(isid: u32) -> Vec<u8> {
    (isid & 0x00FF_FFFF).to_be_bytes().to_vec()
}

/// One MPLS label stack entry with a TTL of 64.
pub fn mpls_label(label: u32, bos: bool) -> Vec<u8> {
    let mut entry = (label << 12) | 64;
    if bos {
        entry |= 0x100;
    }
    entry.to_be_bytes().to_vec()
}

pub fn vxlan(vni: u32) -> Vec<u8> {
    let b = vni.to_be_bytes();
    vec![0x08, 0, 0, 0, b[1], b[2], b[3], 0]
}

pub fn arp() -> Vec<u8> {
    let mut v = vec![0, 1, 0x08, 0x00, 6, 4, 0, 1];
    v.extend(MAC_SRC.bytes());
    v.extend(IP4_SRC.bytes());
    v.extend([0; 6]);
    v.extend(IP4_DST.bytes());
    v
}

/// A payload of `len` bytes, each its own offset modulo 251, so a
/// misplaced byte shows up in a comparison.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Split the unfragmented, option-less IPv4 datagram `dgram` into
/// fragments whose payloads are `sizes` bytes long (the last size
/// takes whatever is left).
pub fn fragment_v4(dgram: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let hdr_len = usize::from(dgram[0] & 0x0F) * 4;
    let payload = &dgram[hdr_len..];
    let mut frags = vec![];
    let mut off = 0;

    for (i, size) in sizes.iter().enumerate() {
        let last = i == sizes.len() - 1;
        let end = if last { payload.len() } else { off + size };
        assert!(last || size % 8 == 0, "non-final fragment size {size}");

        let mut f = dgram[..hdr_len].to_vec();
        let total = u16::try_from(hdr_len + end - off).unwrap();
        f[2..4].copy_from_slice(&total.to_be_bytes());
        let mut ff = u16::try_from(off / 8).unwrap();
        if !last {
            ff |= 0x2000;
        }
        f[6..8].copy_from_slice(&ff.to_be_bytes());
        fill_ipv4_csum(&mut f);
        f.extend_from_slice(&payload[off..end]);
        frags.push(f);
        off = end;
    }

    frags
}

/// Split the unfragmented IPv6 datagram `dgram` (no extension
/// headers) into fragments of at most `size` payload bytes.
pub fn fragment_v6(dgram: &[u8], size: usize, ident: u32) -> Vec<Vec<u8>> {
    assert_eq!(size % 8, 0);
    let next = dgram[6];
    let payload = &dgram[40..];
    let mut frags = vec![];
    let mut off = 0;

    while off < payload.len() {
        let end = (off + size).min(payload.len());
        let more = end < payload.len();
        let mut body = ipv6_frag_hdr(next, off, more, ident);
        body.extend_from_slice(&payload[off..end]);

        let mut f = dgram[..40].to_vec();
        let plen = u16::try_from(body.len()).unwrap();
        f[4..6].copy_from_slice(&plen.to_be_bytes());
        f[6] = PROTO_IPV6_FRAG;
        f.extend(body);
        frags.push(f);
        off = end;
    }

    frags
}
