// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tunnel decapsulation.
//!
//! Given a cursor positioned at the payload of a UDP or GRE header,
//! [`decode_tunnel`] recognises MPLS-over-UDP, MPLS-over-GRE and
//! VXLAN, and walks through the encapsulation into the inner
//! Ethernet frame (PBB and stacked VLAN tags included) or straight
//! into the inner IP header. Whether an MPLS payload is L2 or L3 is
//! not visible on the wire; a [`TunnelClassify`] collaborator decides
//! that from the label and control word.

use super::classify::Stop;
use super::cursor::HdrCursor;
use super::headers::ArpHdrRaw;
use super::headers::EtherHdrRaw;
use super::headers::IPV4_HDR_SZ;
use super::headers::Ipv4HdrRaw;
use super::headers::Ipv6HdrRaw;
use super::headers::MPLS_HDR_SZ;
use super::headers::MplsWordRaw;
use super::headers::PbbItagRaw;
use super::headers::UDP_HDR_SZ;
use super::headers::VXLAN_HDR_SZ;
use super::headers::VlanTagRaw;
use super::headers::VxlanHdrRaw;
use core::fmt;
use core::fmt::Display;
use vrdp_api::ETHER_TYPE_ARP;
use vrdp_api::ETHER_TYPE_IPV4;
use vrdp_api::ETHER_TYPE_IPV6;
use vrdp_api::ETHER_TYPE_PBB;
use vrdp_api::ETHER_TYPE_VLAN;
use vrdp_api::Encap;
use vrdp_api::GRE_PROTO_MPLS;
use vrdp_api::InnerKind;
use vrdp_api::IpVersion;
use vrdp_api::TunnelClass;
use vrdp_api::VXLAN_UDP_PORT;
use vrdp_api::Vni;
use vrdp_api::is_mpls_udp_port;

/// The bottom-of-stack bit of an MPLS label stack entry.
pub const MPLS_BOS: u32 = 0x100;
pub const MPLS_LABEL_SHIFT: u32 = 12;

/// A label value which marks an outer label to be skipped.
pub const MPLS_OUTER_LABEL: u32 = 0xFFFFF;

/// The pseudowire control word following the label stack.
pub const MPLS_CW_SZ: usize = 4;

/// The IPv4, UDP and VXLAN headers wrapping the Ethernet frame of an
/// L2 multicast packet, after its control word.
pub const L2_MCAST_ENVELOPE_SZ: usize = IPV4_HDR_SZ + UDP_HDR_SZ + VXLAN_HDR_SZ;

/// The transport the tunnel arrived on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TunnelProto {
    /// GRE, with its protocol type.
    Gre(u16),
    /// UDP, with its destination port.
    Udp(u16),
}

/// Decides what an MPLS label carries.
///
/// `label` is the 20-bit label value of the label that identifies
/// the payload and `control_word` the 32 bits that follow the label
/// stack, whether or not the payload actually has a control word.
pub trait TunnelClassify {
    fn classify(&self, label: u32, control_word: u32) -> TunnelClass;
}

impl<F> TunnelClassify for F
where
    F: Fn(u32, u32) -> TunnelClass,
{
    fn classify(&self, label: u32, control_word: u32) -> TunnelClass {
        self(label, control_word)
    }
}

/// The inner network header, as an offset from the start of the
/// tunnel payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InnerL3 {
    Ipv4(usize),
    Ipv6(usize),
}

impl InnerL3 {
    fn new(version: IpVersion, off: usize) -> Self {
        match version {
            IpVersion::V4 => Self::Ipv4(off),
            IpVersion::V6 => Self::Ipv6(off),
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            Self::Ipv4(off) | Self::Ipv6(off) => *off,
        }
    }

    pub fn version(&self) -> IpVersion {
        match self {
            Self::Ipv4(_) => IpVersion::V4,
            Self::Ipv6(_) => IpVersion::V6,
        }
    }
}

/// A decoded tunnel.
///
/// Offsets and lengths are from the start of the tunnel payload,
/// i.e. the cursor position handed to [`decode_tunnel`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TunnelDesc {
    pub encap: Encap,
    /// The MPLS label, or the VXLAN VNI.
    pub label_or_vnid: u32,
    pub inner_kind: InnerKind,
    /// Encapsulation bytes in front of the inner packet's network
    /// header (or ARP header, or unknown Ethernet payload).
    pub bytes_consumed: usize,
    /// Bytes that must be contiguous to cover the encapsulation and
    /// the fixed part of the inner network header.
    pub pull_len: usize,
    pub inner_l3: Option<InnerL3>,
    /// The type of the innermost Ethernet payload, when the tunnel
    /// carries Ethernet.
    pub ether_type: Option<u16>,
}

impl TunnelDesc {
    pub fn vni(&self) -> Option<Vni> {
        match self.encap {
            Encap::Vxlan => Vni::new(self.label_or_vnid).ok(),
            Encap::Mpls => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TunnelResult {
    Decoded(TunnelDesc),
    NeedsSlowPath,
    Unhandled,
}

impl TunnelResult {
    pub fn decoded(&self) -> Option<&TunnelDesc> {
        match self {
            Self::Decoded(desc) => Some(desc),
            _ => None,
        }
    }
}

impl From<Stop> for TunnelResult {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::SlowPath => Self::NeedsSlowPath,
            Stop::Unhandled => Self::Unhandled,
        }
    }
}

impl Display for TunnelResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Decoded(desc) => write!(
                f,
                "{} {} ({:?}, consumed {})",
                desc.encap,
                desc.label_or_vnid,
                desc.inner_kind,
                desc.bytes_consumed
            ),
            Self::NeedsSlowPath => write!(f, "slow path"),
            Self::Unhandled => write!(f, "unhandled"),
        }
    }
}

/// Decode the tunnel whose payload starts at the position of `cur`.
///
/// The cursor itself is not moved. Running out of contiguous bytes
/// is [`TunnelResult::NeedsSlowPath`]; an outer transport which
/// carries no known tunnel, a rejected label or an L3 payload which
/// is not IP is [`TunnelResult::Unhandled`].
pub fn decode_tunnel(
    cur: &HdrCursor<'_>,
    proto: TunnelProto,
    hook: &dyn TunnelClassify,
) -> TunnelResult {
    let mut cur = *cur;
    let start = cur.consumed();

    let res = match proto {
        TunnelProto::Gre(GRE_PROTO_MPLS) => mpls(&mut cur, start, hook),
        TunnelProto::Udp(port) if is_mpls_udp_port(port) => {
            mpls(&mut cur, start, hook)
        }
        TunnelProto::Udp(VXLAN_UDP_PORT) => vxlan(&mut cur, start),
        _ => Err(Stop::Unhandled),
    };

    match res {
        Ok(desc) => TunnelResult::Decoded(desc),
        Err(stop) => stop.into(),
    }
}

fn mpls(
    cur: &mut HdrCursor<'_>,
    start: usize,
    hook: &dyn TunnelClassify,
) -> Result<TunnelDesc, Stop> {
    cur.ensure(MPLS_HDR_SZ + MPLS_CW_SZ)?;

    let mut entry = cur.view::<MplsWordRaw>()?.value();
    if entry & MPLS_BOS == 0 && entry >> MPLS_LABEL_SHIFT == MPLS_OUTER_LABEL
    {
        cur.ensure(MPLS_HDR_SZ + MPLS_CW_SZ)?;
        entry = cur.view::<MplsWordRaw>()?.value();
    }

    let label = entry >> MPLS_LABEL_SHIFT;
    let cw = cur.peek::<MplsWordRaw>()?.value();
    let inner_kind =
        hook.classify(label, cw).inner_kind().ok_or(Stop::Unhandled)?;

    let mut desc = TunnelDesc {
        encap: Encap::Mpls,
        label_or_vnid: label,
        inner_kind,
        bytes_consumed: 0,
        pull_len: 0,
        inner_l3: None,
        ether_type: None,
    };

    match inner_kind {
        InnerKind::L3 => {
            // The control word check above covers the first byte.
            let first = cur.rest().first().copied().ok_or(Stop::SlowPath)?;
            let version =
                IpVersion::from_first_byte(first).ok_or(Stop::Unhandled)?;
            desc.bytes_consumed = cur.consumed() - start;
            desc.inner_l3 = Some(InnerL3::new(version, desc.bytes_consumed));
            ip_header(cur, version)?;
            desc.pull_len = cur.consumed() - start;
            return Ok(desc);
        }

        InnerKind::L2Multicast => {
            cur.advance(MPLS_CW_SZ + L2_MCAST_ENVELOPE_SZ)?
        }
        InnerKind::L2ControlData => cur.advance(MPLS_CW_SZ)?,
        InnerKind::L2Unicast => {}
    }

    ethernet(cur, start, desc)
}

fn vxlan(cur: &mut HdrCursor<'_>, start: usize) -> Result<TunnelDesc, Stop> {
    let vx = cur.view::<VxlanHdrRaw>()?;
    let desc = TunnelDesc {
        encap: Encap::Vxlan,
        label_or_vnid: vx.vni(),
        inner_kind: InnerKind::L2Unicast,
        bytes_consumed: 0,
        pull_len: 0,
        inner_l3: None,
        ether_type: None,
    };

    ethernet(cur, start, desc)
}

fn ethernet(
    cur: &mut HdrCursor<'_>,
    start: usize,
    mut desc: TunnelDesc,
) -> Result<TunnelDesc, Stop> {
    let mut ether_type = cur.view::<EtherHdrRaw>()?.ether_type();

    if ether_type == ETHER_TYPE_PBB {
        cur.view::<PbbItagRaw>()?;
        ether_type = cur.view::<EtherHdrRaw>()?.ether_type();
    }

    // Each tag consumes bytes, so the buffer bounds the loop.
    while ether_type == ETHER_TYPE_VLAN {
        ether_type = cur.view::<VlanTagRaw>()?.ether_type();
    }

    desc.ether_type = Some(ether_type);
    desc.bytes_consumed = cur.consumed() - start;

    match ether_type {
        ETHER_TYPE_IPV4 => {
            desc.inner_l3 = Some(InnerL3::Ipv4(desc.bytes_consumed));
            ip_header(cur, IpVersion::V4)?;
        }

        ETHER_TYPE_IPV6 => {
            desc.inner_l3 = Some(InnerL3::Ipv6(desc.bytes_consumed));
            ip_header(cur, IpVersion::V6)?;
        }

        ETHER_TYPE_ARP => {
            cur.view::<ArpHdrRaw>()?;
        }

        _ => {}
    }

    desc.pull_len = cur.consumed() - start;
    Ok(desc)
}

fn ip_header(cur: &mut HdrCursor<'_>, version: IpVersion) -> Result<(), Stop> {
    match version {
        IpVersion::V4 => cur.view::<Ipv4HdrRaw>().map(|_| ())?,
        IpVersion::V6 => cur.view::<Ipv6HdrRaw>().map(|_| ())?,
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use vrdp_api::ETHER_TYPE_MPLS;

    const VX: TunnelProto = TunnelProto::Udp(VXLAN_UDP_PORT);

    fn label(val: u32, bos: bool) -> [u8; 4] {
        let mut entry = (val << MPLS_LABEL_SHIFT) | 0x40;
        if bos {
            entry |= MPLS_BOS;
        }
        entry.to_be_bytes()
    }

    fn ether(ety: u16) -> Vec<u8> {
        let mut v = vec![0x02, 0, 0, 0, 0, 1, 0x02, 0, 0, 0, 0, 2];
        v.extend(ety.to_be_bytes());
        v
    }

    fn ip4() -> Vec<u8> {
        let mut v = vec![0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0];
        v.extend([10, 0, 0, 1, 10, 0, 0, 2]);
        v
    }

    fn decode(
        buf: &[u8],
        proto: TunnelProto,
        class: TunnelClass,
    ) -> TunnelResult {
        let cur = HdrCursor::new(buf, buf.len()).unwrap();
        decode_tunnel(&cur, proto, &move |_: u32, _: u32| class)
    }

    #[test]
    fn unknown_transport() {
        let buf = [0u8; 64];
        let mpls = TunnelProto::Gre(ETHER_TYPE_MPLS);
        assert!(decode(&buf, mpls, TunnelClass::L3).decoded().is_none());
        assert_eq!(
            decode(&buf, TunnelProto::Gre(0x0800), TunnelClass::L3),
            TunnelResult::Unhandled
        );
        assert_eq!(
            decode(&buf, TunnelProto::Udp(53), TunnelClass::L3),
            TunnelResult::Unhandled
        );
    }

    #[test]
    fn mpls_l3() {
        let mut buf = label(17, true).to_vec();
        buf.extend(ip4());
        let res = decode(&buf, TunnelProto::Udp(6635), TunnelClass::L3);
        let desc = res.decoded().unwrap();
        assert_eq!(desc.encap, Encap::Mpls);
        assert_eq!(desc.label_or_vnid, 17);
        assert_eq!(desc.inner_kind, InnerKind::L3);
        assert_eq!(desc.bytes_consumed, 4);
        assert_eq!(desc.pull_len, 24);
        assert_eq!(desc.inner_l3, Some(InnerL3::Ipv4(4)));
        assert_eq!(desc.ether_type, None);
        assert_eq!(desc.vni(), None);
    }

    #[test]
    fn mpls_l3_not_ip() {
        let mut buf = label(17, true).to_vec();
        buf.extend([0x10; 40]);
        assert_eq!(
            decode(&buf, TunnelProto::Udp(6635), TunnelClass::L3),
            TunnelResult::Unhandled
        );
    }

    #[test]
    fn mpls_rejected() {
        let mut buf = label(17, true).to_vec();
        buf.extend(ip4());
        assert_eq!(
            decode(&buf, TunnelProto::Udp(51234), TunnelClass::Reject),
            TunnelResult::Unhandled
        );
    }

    #[test]
    fn mpls_outer_label_skipped() {
        let mut buf = label(MPLS_OUTER_LABEL, false).to_vec();
        buf.extend(label(99, true));
        buf.extend(ip4());

        let seen = core::cell::Cell::new(0);
        let hook = |l: u32, _: u32| {
            seen.set(l);
            TunnelClass::L3
        };
        let cur = HdrCursor::new(&buf, buf.len()).unwrap();
        let res = decode_tunnel(&cur, TunnelProto::Gre(GRE_PROTO_MPLS), &hook);
        let desc = res.decoded().unwrap();
        assert_eq!(seen.get(), 99);
        assert_eq!(desc.label_or_vnid, 99);
        assert_eq!(desc.inner_l3, Some(InnerL3::Ipv4(8)));

        // The second label and its control word must both be present.
        let cur = HdrCursor::new(&buf, 11).unwrap();
        assert_eq!(
            decode_tunnel(&cur, TunnelProto::Gre(GRE_PROTO_MPLS), &hook),
            TunnelResult::NeedsSlowPath
        );
    }

    #[test]
    fn mpls_control_word_required() {
        let buf = label(17, true);
        assert_eq!(
            decode(&buf, TunnelProto::Udp(6635), TunnelClass::L2Unicast),
            TunnelResult::NeedsSlowPath
        );
    }

    #[test]
    fn mpls_l2_kinds() {
        let mut unicast = label(5, true).to_vec();
        unicast.extend(ether(ETHER_TYPE_IPV4));
        unicast.extend(ip4());
        let res =
            decode(&unicast, TunnelProto::Udp(6635), TunnelClass::L2Unicast);
        let desc = res.decoded().unwrap();
        assert_eq!(desc.bytes_consumed, 4 + 14);
        assert_eq!(desc.inner_l3, Some(InnerL3::Ipv4(18)));

        let mut ctrl = label(5, true).to_vec();
        ctrl.extend([0; 4]);
        ctrl.extend(ether(ETHER_TYPE_IPV4));
        ctrl.extend(ip4());
        let res =
            decode(&ctrl, TunnelProto::Udp(6635), TunnelClass::L2ControlData);
        assert_eq!(res.decoded().unwrap().bytes_consumed, 4 + 4 + 14);

        let mut mcast = label(5, true).to_vec();
        mcast.extend([0; 4]);
        mcast.extend([0; L2_MCAST_ENVELOPE_SZ]);
        mcast.extend(ether(ETHER_TYPE_IPV4));
        mcast.extend(ip4());
        let res =
            decode(&mcast, TunnelProto::Udp(6635), TunnelClass::L2Multicast);
        let desc = res.decoded().unwrap();
        assert_eq!(desc.inner_kind, InnerKind::L2Multicast);
        assert_eq!(desc.bytes_consumed, 4 + 4 + 36 + 14);
        assert_eq!(desc.pull_len, 4 + 4 + 36 + 14 + 20);
    }

    #[test]
    fn vxlan_pbb_and_vlans() {
        let mut buf = vec![0x08, 0, 0, 0, 0x00, 0x1E, 0x61, 0];
        buf.extend(ether(ETHER_TYPE_PBB));
        buf.extend([0; 4]);
        buf.extend(ether(ETHER_TYPE_VLAN));
        buf.extend([0, 10, 0x81, 0x00]);
        buf.extend([0, 20, 0x86, 0xDD]);
        buf.extend([0x60; 40]);

        let res = decode(&buf, VX, TunnelClass::Reject);
        let desc = res.decoded().unwrap();
        assert_eq!(desc.encap, Encap::Vxlan);
        assert_eq!(desc.vni(), Some(Vni::new(7777u32).unwrap()));
        assert_eq!(desc.ether_type, Some(ETHER_TYPE_IPV6));
        let off = 8 + 14 + 4 + 14 + 4 + 4;
        assert_eq!(desc.bytes_consumed, off);
        assert_eq!(desc.inner_l3, Some(InnerL3::Ipv6(off)));
        assert_eq!(desc.pull_len, off + 40);
    }

    #[test]
    fn vxlan_arp_and_other() {
        let mut arp = vec![0x08, 0, 0, 0, 0, 0, 1, 0];
        arp.extend(ether(ETHER_TYPE_ARP));
        arp.extend([0; 28]);
        let res = decode(&arp, VX, TunnelClass::Reject);
        let desc = res.decoded().unwrap();
        assert_eq!(desc.inner_l3, None);
        assert_eq!(desc.bytes_consumed, 22);
        assert_eq!(desc.pull_len, 50);

        let mut lldp = vec![0x08, 0, 0, 0, 0, 0, 1, 0];
        lldp.extend(ether(0x88CC));
        let res = decode(&lldp, VX, TunnelClass::Reject);
        let desc = res.decoded().unwrap();
        assert_eq!(desc.inner_l3, None);
        assert_eq!(desc.ether_type, Some(0x88CC));
        assert_eq!(desc.pull_len, 22);
    }

    #[test]
    fn decode_is_relative_to_cursor() {
        let mut buf = vec![0xAA; 42];
        buf.extend(label(3, true));
        buf.extend(ip4());
        let mut cur = HdrCursor::new(&buf, buf.len()).unwrap();
        cur.advance(42).unwrap();
        let hook = |_: u32, _: u32| TunnelClass::L3;
        let res = decode_tunnel(&cur, TunnelProto::Udp(6635), &hook);
        assert_eq!(res.decoded().unwrap().inner_l3, Some(InnerL3::Ipv4(4)));
        assert_eq!(cur.consumed(), 42);
    }
}
