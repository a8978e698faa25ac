// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Raw, on-the-wire header layouts.
//!
//! Each type here is a byte-for-byte image of a header, with every
//! multi-byte field kept as a network-order byte array. They are
//! `Unaligned`, so a view can be taken at any offset, and they are
//! only ever obtained through [`super::cursor::HdrCursor`], which
//! does the bounds checking.

use vrdp_api::IpVersion;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// A fixed-size header which can be viewed in place.
pub trait RawHeader:
    Sized + FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned
{
    const SIZE: usize = core::mem::size_of::<Self>();
}

pub const IPV4_HDR_SZ: usize = 20;
pub const IPV6_HDR_SZ: usize = 40;
pub const IPV6_FRAG_HDR_SZ: usize = 8;
pub const TCP_HDR_SZ: usize = 20;
pub const UDP_HDR_SZ: usize = 8;
pub const ICMP_HDR_SZ: usize = 8;
pub const SCTP_HDR_SZ: usize = 12;
pub const ETHER_HDR_SZ: usize = 14;
pub const VLAN_TAG_SZ: usize = 4;
pub const PBB_ITAG_SZ: usize = 4;
pub const MPLS_HDR_SZ: usize = 4;
pub const VXLAN_HDR_SZ: usize = 8;
pub const ARP_HDR_SZ: usize = 28;

pub const IPV4_FLAG_MF: u16 = 0x2000;
pub const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;
pub const IPV6_FRAG_MF: u16 = 0x0001;
pub const IPV6_FRAG_OFFSET_MASK: u16 = 0xFFF8;

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl RawHeader for Ipv4HdrRaw {}

impl Ipv4HdrRaw {
    pub fn version(&self) -> Option<IpVersion> {
        IpVersion::from_first_byte(self.ver_hdr_len)
    }

    /// The declared header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & 0x0F) * 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.total_len)
    }

    pub fn ident(&self) -> u16 {
        u16::from_be_bytes(self.ident)
    }

    /// The fragment offset in bytes.
    pub fn frag_offset(&self) -> usize {
        let raw = u16::from_be_bytes(self.frag_and_flags);
        usize::from(raw & IPV4_FRAG_OFFSET_MASK) * 8
    }

    pub fn more_frags(&self) -> bool {
        u16::from_be_bytes(self.frag_and_flags) & IPV4_FLAG_MF != 0
    }

    pub fn is_fragment(&self) -> bool {
        self.more_frags() || self.frag_offset() != 0
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vsn_class_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl RawHeader for Ipv6HdrRaw {}

impl Ipv6HdrRaw {
    pub fn version(&self) -> Option<IpVersion> {
        IpVersion::from_first_byte(self.vsn_class_flow[0])
    }

    pub fn payload_len(&self) -> u16 {
        u16::from_be_bytes(self.payload_len)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct Ipv6FragHdrRaw {
    pub next_hdr: u8,
    pub reserved: u8,
    pub offset_flags: [u8; 2],
    pub ident: [u8; 4],
}

impl RawHeader for Ipv6FragHdrRaw {}

impl Ipv6FragHdrRaw {
    /// The fragment offset in bytes.
    pub fn frag_offset(&self) -> usize {
        let raw = u16::from_be_bytes(self.offset_flags);
        usize::from(raw & IPV6_FRAG_OFFSET_MASK)
    }

    pub fn more_frags(&self) -> bool {
        u16::from_be_bytes(self.offset_flags) & IPV6_FRAG_MF != 0
    }

    pub fn ident(&self) -> u32 {
        u32::from_be_bytes(self.ident)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub window_size: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl RawHeader for TcpHdrRaw {}

impl TcpHdrRaw {
    /// The declared header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.offset >> 4) * 4
    }

    pub fn flags(&self) -> vrdp_api::TcpFlags {
        vrdp_api::TcpFlags::from_bits_truncate(self.flags)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub len: [u8; 2],
    pub csum: [u8; 2],
}

impl RawHeader for UdpHdrRaw {}

impl UdpHdrRaw {
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dst_port)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct IcmpHdrRaw {
    pub ty: u8,
    pub code: u8,
    pub csum: [u8; 2],
    pub rest: [u8; 4],
}

impl RawHeader for IcmpHdrRaw {}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct SctpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub vtag: [u8; 4],
    pub csum: [u8; 4],
}

impl RawHeader for SctpHdrRaw {}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct EtherHdrRaw {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ether_type: [u8; 2],
}

impl RawHeader for EtherHdrRaw {}

impl EtherHdrRaw {
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// An 802.1Q tag as it follows an Ethernet header whose type is
/// VLAN: the TCI and the encapsulated type.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct VlanTagRaw {
    pub tci: [u8; 2],
    pub ether_type: [u8; 2],
}

impl RawHeader for VlanTagRaw {}

impl VlanTagRaw {
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// The 802.1ah backbone service instance tag.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct PbbItagRaw {
    pub flags_isid: [u8; 4],
}

impl RawHeader for PbbItagRaw {}

/// One MPLS label stack entry, or a pseudowire control word; both
/// are a single network-order 32-bit word.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct MplsWordRaw {
    pub word: [u8; 4],
}

impl RawHeader for MplsWordRaw {}

impl MplsWordRaw {
    pub fn value(&self) -> u32 {
        u32::from_be_bytes(self.word)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct VxlanHdrRaw {
    pub flags: u8,
    pub reserved: [u8; 3],
    pub vni: [u8; 3],
    pub reserved2: u8,
}

impl RawHeader for VxlanHdrRaw {}

impl VxlanHdrRaw {
    pub fn vni(&self) -> u32 {
        u32::from_be_bytes([0, self.vni[0], self.vni[1], self.vni[2]])
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct ArpHdrRaw {
    pub htype: [u8; 2],
    pub ptype: [u8; 2],
    pub hlen: u8,
    pub plen: u8,
    pub op: [u8; 2],
    pub sha: [u8; 6],
    pub spa: [u8; 4],
    pub tha: [u8; 6],
    pub tpa: [u8; 4],
}

impl RawHeader for ArpHdrRaw {}
