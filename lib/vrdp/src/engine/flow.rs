// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow hash used for load distribution.
//!
//! IP packets hash on the 5-tuple. Ports are only taken from TCP and
//! UDP, and never from a fragment: every fragment of a datagram
//! must land on the same next hop, and only the first one carries
//! the ports. Anything else hashes on the MAC pair.

use super::cursor::HdrCursor;
use super::headers::EtherHdrRaw;
use super::headers::IPV4_HDR_SZ;
use super::headers::Ipv4HdrRaw;
use super::headers::Ipv6HdrRaw;
use super::headers::UdpHdrRaw;
use core::fmt;
use core::fmt::Display;
use core::ops::Deref;
use vrdp_api::IpAddr;
use vrdp_api::IpVersion;
use vrdp_api::Ipv4Addr;
use vrdp_api::Ipv6Addr;
use vrdp_api::MacAddr;
use vrdp_api::PROTO_IPV6_FRAG;
use vrdp_api::PROTO_TCP;
use vrdp_api::PROTO_UDP;

pub const FLOW_KEY_V4_LEN: usize = 13;
pub const FLOW_KEY_V6_LEN: usize = 37;
pub const FLOW_KEY_L2_LEN: usize = 13;

/// The fields a packet is hashed on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FlowKey {
    V4 { src: Ipv4Addr, dst: Ipv4Addr, proto: u8, sport: u16, dport: u16 },
    V6 { src: Ipv6Addr, dst: Ipv6Addr, proto: u8, sport: u16, dport: u16 },
    L2 { src: MacAddr, dst: MacAddr, ether_type: u16 },
}

impl FlowKey {
    /// Build an IP key. The ports are dropped for anything but TCP
    /// and UDP. Returns `None` if the addresses are not of the same
    /// family.
    pub fn new_ip(
        src: IpAddr,
        dst: IpAddr,
        proto: u8,
        sport: u16,
        dport: u16,
    ) -> Option<Self> {
        let (sport, dport) =
            if has_ports(proto) { (sport, dport) } else { (0, 0) };

        match (src, dst) {
            (IpAddr::Ip4(src), IpAddr::Ip4(dst)) => {
                Some(Self::V4 { src, dst, proto, sport, dport })
            }
            (IpAddr::Ip6(src), IpAddr::Ip6(dst)) => {
                Some(Self::V6 { src, dst, proto, sport, dport })
            }
            _ => None,
        }
    }

    /// Pull the key out of the IP packet `pkt`, reading only its
    /// first `contig` bytes. Returns `None` when the packet is not
    /// `version` or is too short to hold what the key needs.
    pub fn from_ip(
        pkt: &[u8],
        version: IpVersion,
        contig: usize,
    ) -> Option<Self> {
        let mut cur = HdrCursor::new(pkt, contig).ok()?;
        let first = cur.rest().first().copied()?;
        if IpVersion::from_first_byte(first) != Some(version) {
            return None;
        }

        match version {
            IpVersion::V4 => {
                let ip = cur.view::<Ipv4HdrRaw>().ok()?;
                let src = Ipv4Addr::from(ip.src);
                let dst = Ipv4Addr::from(ip.dst);
                let proto = ip.proto;

                if ip.is_fragment() || !has_ports(proto) {
                    let (sport, dport) = (0, 0);
                    return Some(Self::V4 { src, dst, proto, sport, dport });
                }

                let opts = ip.hdr_len().checked_sub(IPV4_HDR_SZ)?;
                let l4 = cur.peek_at::<UdpHdrRaw>(opts).ok()?;
                let (sport, dport) = ports(l4);
                Some(Self::V4 { src, dst, proto, sport, dport })
            }

            IpVersion::V6 => {
                let ip = cur.view::<Ipv6HdrRaw>().ok()?;
                let src = Ipv6Addr::from(ip.src);
                let dst = Ipv6Addr::from(ip.dst);

                let (sport, dport) = (0, 0);
                if ip.next_hdr == PROTO_IPV6_FRAG {
                    let proto = 0;
                    return Some(Self::V6 { src, dst, proto, sport, dport });
                }

                let proto = ip.next_hdr;
                if !has_ports(proto) {
                    return Some(Self::V6 { src, dst, proto, sport, dport });
                }

                let (sport, dport) = ports(cur.peek::<UdpHdrRaw>().ok()?);
                Some(Self::V6 { src, dst, proto, sport, dport })
            }
        }
    }

    /// Pull the MAC pair key out of an Ethernet frame.
    pub fn from_ether(frame: &[u8], contig: usize) -> Option<Self> {
        let mut cur = HdrCursor::new(frame, contig).ok()?;
        let eth = cur.view::<EtherHdrRaw>().ok()?;
        Some(Self::L2 {
            src: MacAddr::from(eth.src),
            dst: MacAddr::from(eth.dst),
            ether_type: eth.ether_type(),
        })
    }

    /// The bytes which are hashed.
    pub fn key_bytes(&self) -> FlowKeyBytes {
        let key = match self {
            Self::V4 { src, dst, proto, sport, dport } => FlowKeyBytes::new(&[
                &src.bytes()[..],
                &dst.bytes()[..],
                &[*proto],
                &sport.to_be_bytes()[..],
                &dport.to_be_bytes()[..],
            ]),

            Self::V6 { src, dst, proto, sport, dport } => FlowKeyBytes::new(&[
                &src.bytes()[..],
                &dst.bytes()[..],
                &[*proto],
                &sport.to_be_bytes()[..],
                &dport.to_be_bytes()[..],
            ]),

            // Only the first byte of the ethertype takes part.
            Self::L2 { src, dst, ether_type } => FlowKeyBytes::new(&[
                &src.bytes()[..],
                &dst.bytes()[..],
                &ether_type.to_be_bytes()[..1],
            ]),
        };

        debug_assert_eq!(key.len(), self.key_len());
        key
    }

    fn key_len(&self) -> usize {
        match self {
            Self::V4 { .. } => FLOW_KEY_V4_LEN,
            Self::V6 { .. } => FLOW_KEY_V6_LEN,
            Self::L2 { .. } => FLOW_KEY_L2_LEN,
        }
    }

    pub fn hash(&self) -> u32 {
        crc32fast::hash(&self.key_bytes())
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::V4 { src, dst, proto, sport, dport } => {
                write!(f, "{proto}:{src}:{sport}:{dst}:{dport}")
            }
            Self::V6 { src, dst, proto, sport, dport } => {
                write!(f, "{proto}:[{src}]:{sport}:[{dst}]:{dport}")
            }
            Self::L2 { src, dst, ether_type } => {
                write!(f, "{src}:{dst}:0x{ether_type:04X}")
            }
        }
    }
}

/// A flow key laid out for hashing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlowKeyBytes {
    buf: [u8; FLOW_KEY_V6_LEN],
    len: usize,
}

impl FlowKeyBytes {
    // The largest key is FLOW_KEY_V6_LEN bytes.
    fn new(parts: &[&[u8]]) -> Self {
        let mut buf = [0u8; FLOW_KEY_V6_LEN];
        let mut len = 0;
        for part in parts {
            buf[len..len + part.len()].copy_from_slice(part);
            len += part.len();
        }
        Self { buf, len }
    }
}

impl Deref for FlowKeyBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf[..self.len]
    }
}

/// Hash an IP 5-tuple. Mixed address families hash as zero.
pub fn flow_hash(
    src: IpAddr,
    dst: IpAddr,
    proto: u8,
    sport: u16,
    dport: u16,
) -> u32 {
    FlowKey::new_ip(src, dst, proto, sport, dport).map_or(0, |k| k.hash())
}

fn has_ports(proto: u8) -> bool {
    proto == PROTO_TCP || proto == PROTO_UDP
}

// TCP and UDP both lead with the two ports.
fn ports(l4: &UdpHdrRaw) -> (u16, u16) {
    (u16::from_be_bytes(l4.src_port), u16::from_be_bytes(l4.dst_port))
}

#[cfg(test)]
mod test {
    use super::*;

    fn v4(a: [u8; 4]) -> IpAddr {
        Ipv4Addr::from(a).into()
    }

    #[test]
    fn key_layout() {
        let k = FlowKey::new_ip(v4([10, 0, 0, 1]), v4([10, 0, 0, 2]), 6, 1, 2)
            .unwrap();
        assert_eq!(k.key_bytes().len(), FLOW_KEY_V4_LEN);
        assert_eq!(
            &k.key_bytes()[..],
            &[10, 0, 0, 1, 10, 0, 0, 2, 6, 0, 1, 0, 2]
        );

        let v6: Ipv6Addr = "fd00::1".parse().unwrap();
        let k = FlowKey::new_ip(v6.into(), v6.into(), 17, 1, 2).unwrap();
        assert_eq!(k.key_bytes().len(), FLOW_KEY_V6_LEN);

        let k = FlowKey::L2 {
            src: MacAddr::from([2, 0, 0, 0, 0, 1]),
            dst: MacAddr::from([2, 0, 0, 0, 0, 2]),
            ether_type: 0x0806,
        };
        assert_eq!(k.key_bytes().len(), FLOW_KEY_L2_LEN);
        assert_eq!(k.key_bytes()[12], 0x08);
    }

    #[test]
    fn portless_protocols_drop_ports() {
        let a = flow_hash(v4([1, 1, 1, 1]), v4([2, 2, 2, 2]), 1, 100, 200);
        let b = flow_hash(v4([1, 1, 1, 1]), v4([2, 2, 2, 2]), 1, 0, 0);
        assert_eq!(a, b);

        let c = flow_hash(v4([1, 1, 1, 1]), v4([2, 2, 2, 2]), 6, 100, 200);
        assert_ne!(a, c);
    }

    #[test]
    fn mixed_families() {
        let v6: Ipv6Addr = "fd00::1".parse().unwrap();
        assert_eq!(FlowKey::new_ip(v4([1, 1, 1, 1]), v6.into(), 6, 1, 2), None);
        assert_eq!(flow_hash(v4([1, 1, 1, 1]), v6.into(), 6, 1, 2), 0);
    }

    #[rustfmt::skip]
    fn v4_udp(frag: [u8; 2]) -> Vec<u8> {
        vec![
            0x45, 0x00, 0x00, 0x1C,
            0x00, 0x01, frag[0], frag[1],
            0x40, 0x11, 0x00, 0x00,
            10, 0, 0, 1,
            10, 0, 0, 2,
            0x30, 0x39, 0x00, 0x35,
            0x00, 0x08, 0x00, 0x00,
        ]
    }

    #[test]
    fn from_ip_v4() {
        let pkt = v4_udp([0, 0]);
        let k = FlowKey::from_ip(&pkt, IpVersion::V4, pkt.len()).unwrap();
        assert_eq!(
            k,
            FlowKey::new_ip(v4([10, 0, 0, 1]), v4([10, 0, 0, 2]), 17, 12345, 53)
                .unwrap()
        );
        assert_eq!(format!("{k}"), "17:10.0.0.1:12345:10.0.0.2:53");

        // The ports must be contiguous.
        assert_eq!(FlowKey::from_ip(&pkt, IpVersion::V4, 23), None);
        assert_eq!(FlowKey::from_ip(&pkt, IpVersion::V6, pkt.len()), None);

        let frag = v4_udp([0x20, 0x00]);
        let k = FlowKey::from_ip(&frag, IpVersion::V4, 20).unwrap();
        assert_eq!(
            k,
            FlowKey::V4 {
                src: [10, 0, 0, 1].into(),
                dst: [10, 0, 0, 2].into(),
                proto: 17,
                sport: 0,
                dport: 0,
            }
        );
    }

    #[test]
    fn from_ether() {
        let mut frame = vec![2, 0, 0, 0, 0, 2, 2, 0, 0, 0, 0, 1, 0x08, 0x06];
        frame.extend([0; 28]);
        let k = FlowKey::from_ether(&frame, frame.len()).unwrap();
        let FlowKey::L2 { src, dst, ether_type } = k else {
            panic!("expected an L2 key");
        };
        assert_eq!(src, MacAddr::from([2, 0, 0, 0, 0, 1]));
        assert_eq!(dst, MacAddr::from([2, 0, 0, 0, 0, 2]));
        assert_eq!(ether_type, 0x0806);
        assert_eq!(FlowKey::from_ether(&frame, 13), None);
    }
}
