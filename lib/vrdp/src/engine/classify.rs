// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Network and transport header classification.
//!
//! [`classify`] walks an IP packet from the start of its network
//! header: IPv4 (with options) or IPv6 (with a Fragment extension
//! header), then the transport header, then for ICMP errors the
//! original datagram quoted in the ICMP payload. It reports where
//! things are and how many bytes must be contiguous to reach them.
//!
//! The walk is a decision over closed cases per layer:
//!
//! ```text
//! IP version -> next header -> transport kind -> ICMP type
//! ```
//!
//! Once the IP version is accepted, running out of contiguous bytes
//! always yields [`Verdict::NeedsSlowPath`], never
//! [`Verdict::Unhandled`]. The packet is recognised; the caller only
//! has to come back with more of it pulled up.

use super::cursor::CursorError;
use super::cursor::HdrCursor;
use super::headers::IPV4_HDR_SZ;
use super::headers::IcmpHdrRaw;
use super::headers::Ipv4HdrRaw;
use super::headers::Ipv6FragHdrRaw;
use super::headers::Ipv6HdrRaw;
use super::headers::SctpHdrRaw;
use super::headers::TCP_HDR_SZ;
use super::headers::TcpHdrRaw;
use super::headers::UdpHdrRaw;
use super::tcp::ClampDisposition;
use super::tcp::L2_OVERLAY_LEN;
use super::tcp::MssClamp;
use super::tcp::TCP_CSUM_OFF;
use crate::cfg::ClassifyCfg;
use core::fmt;
use core::fmt::Display;
use vrdp_api::IpVersion;
use vrdp_api::PROTO_ICMP;
use vrdp_api::PROTO_ICMPV6;
use vrdp_api::PROTO_IPV6_FRAG;
use vrdp_api::PROTO_SCTP;
use vrdp_api::PROTO_TCP;
use vrdp_api::PROTO_UDP;
use vrdp_api::TcpFlags;

pub const UDP_CSUM_OFF: usize = 6;
pub const ICMP_CSUM_OFF: usize = 2;
pub const SCTP_CSUM_OFF: usize = 8;

pub const ICMP6_ROUTER_SOL: u8 = 133;
pub const ICMP6_NEIGH_SOL: u8 = 135;

/// Bytes accounted after a Neighbor Solicitation header: the target
/// address plus a source link-layer address option, whether or not
/// that option is actually present.
pub const ICMP6_NEIGH_SOL_EXTRA: usize = 16 + 2 + 6;

/// Bytes accounted after a Router Solicitation header.
pub const ICMP6_ROUTER_SOL_EXTRA: usize = 8;

/// The transport header found by the classifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    Tcp,
    Udp,
    Icmp,
    Icmp6,
    Sctp,
    /// No transport header was pulled: the protocol is not one the
    /// classifier knows, or this is a non-first fragment.
    None,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
            Self::Icmp6 => "ICMPv6",
            Self::Sctp => "SCTP",
            Self::None => "None",
        };
        write!(f, "{s}")
    }
}

/// Fragmentation state of the outer datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FragInfo {
    /// Offset of this fragment's payload in the original datagram.
    pub offset: usize,
    pub more: bool,
}

/// The original datagram quoted by an ICMP error.
///
/// All offsets are from the start of the outer packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Embedded {
    pub network_header_offset: usize,
    pub transport_kind: TransportKind,
    pub transport_header_offset: usize,
    pub checksum_field_offset: Option<usize>,
}

/// The result of a successful fast-path classification.
///
/// All offsets are from the start of the packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Classified {
    /// Length of the network header(s), IPv4 options and the IPv6
    /// Fragment header included.
    pub network_header_len: usize,
    pub transport_kind: TransportKind,
    pub transport_header_offset: usize,
    /// The checksum field of the outer transport header. For an ICMP
    /// error this stays the ICMP checksum; the quoted datagram's is
    /// in [`Self::embedded`].
    pub checksum_field_offset: Option<usize>,
    pub tcp_options_len: usize,
    /// Bytes that must be contiguous to reach the transport header.
    pub tcp_pull_len: usize,
    /// Bytes that must be contiguous for everything located here.
    pub pull_len: usize,
    pub frag: Option<FragInfo>,
    pub embedded: Option<Embedded>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    FastPath(Classified),
    NeedsSlowPath,
    Unhandled,
}

impl Verdict {
    pub fn fast_path(&self) -> Option<&Classified> {
        match self {
            Self::FastPath(cls) => Some(cls),
            _ => None,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FastPath(cls) => write!(
                f,
                "fast path ({} at {}, pull {})",
                cls.transport_kind, cls.transport_header_offset, cls.pull_len
            ),
            Self::NeedsSlowPath => write!(f, "slow path"),
            Self::Unhandled => write!(f, "unhandled"),
        }
    }
}

/// Return `true` if the classifier pulls a transport header for
/// `proto` carried directly in an IP header of version `version`.
pub fn pulls_transport(version: IpVersion, proto: u8) -> bool {
    match version {
        IpVersion::V4 => {
            matches!(proto, PROTO_TCP | PROTO_UDP | PROTO_ICMP | PROTO_SCTP)
        }
        IpVersion::V6 => matches!(
            proto,
            PROTO_TCP | PROTO_UDP | PROTO_ICMPV6 | PROTO_SCTP | PROTO_IPV6_FRAG
        ),
    }
}

/// Is this ICMPv4 type an error carrying an original datagram?
pub fn is_icmp4_error(ty: u8) -> bool {
    // Destination Unreachable, Source Quench, Redirect, Time
    // Exceeded, Parameter Problem.
    matches!(ty, 3 | 4 | 5 | 11 | 12)
}

/// Is this ICMPv6 type an error carrying an original datagram?
pub fn is_icmp6_error(ty: u8) -> bool {
    ty < 128
}

/// Classify `pkt` with the default configuration.
///
/// `l3` names the network header at the start of `pkt`; `None` means
/// the caller has no IP header to offer and the packet is
/// [`Verdict::Unhandled`]. Only the first `contig` bytes of `pkt` are
/// ever read. The MSS clamp hook, when given, may rewrite the TCP
/// header of a SYN in place.
pub fn classify(
    pkt: &mut [u8],
    l3: Option<IpVersion>,
    contig: usize,
    mss: Option<&dyn MssClamp>,
) -> Verdict {
    Classifier::default().classify(pkt, l3, contig, mss)
}

/// A classifier with a fixed configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Classifier {
    cfg: ClassifyCfg,
}

impl Classifier {
    pub fn new(cfg: ClassifyCfg) -> Self {
        Self { cfg }
    }

    pub fn classify(
        &self,
        pkt: &mut [u8],
        l3: Option<IpVersion>,
        contig: usize,
        mss: Option<&dyn MssClamp>,
    ) -> Verdict {
        let Some(version) = l3 else {
            return Verdict::Unhandled;
        };

        let walk = match walk(pkt, version, contig) {
            Ok(walk) => walk,
            Err(stop) => return stop.into(),
        };

        if walk.syn && self.cfg.mss_adjust {
            // There is nowhere else to clamp: without a hook a SYN
            // must take the slow path.
            let Some(hook) = mss else {
                return Verdict::NeedsSlowPath;
            };

            let cls = &walk.cls;
            let start = cls.transport_header_offset;
            let end = start + TCP_HDR_SZ + cls.tcp_options_len;
            let Some(tcp) = pkt.get_mut(start..end) else {
                return Verdict::NeedsSlowPath;
            };

            let disp = hook.clamp(tcp, L2_OVERLAY_LEN, cls.network_header_len);
            if disp == ClampDisposition::SlowPath {
                return Verdict::NeedsSlowPath;
            }
        }

        Verdict::FastPath(walk.cls)
    }
}

/// Why a walk stopped short of a verdict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Stop {
    SlowPath,
    Unhandled,
}

impl From<CursorError> for Stop {
    fn from(_: CursorError) -> Self {
        Self::SlowPath
    }
}

impl From<Stop> for Verdict {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::SlowPath => Self::NeedsSlowPath,
            Stop::Unhandled => Self::Unhandled,
        }
    }
}

/// Whether a header belongs to the packet itself or to the datagram
/// quoted by an ICMP error. The quoted datagram is walked once and
/// never followed further.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Nesting {
    Outer,
    Embedded,
}

struct Walk {
    cls: Classified,
    syn: bool,
}

struct NetHdr {
    proto: u8,
    frag: Option<FragInfo>,
    has_transport: bool,
}

struct Transport {
    kind: TransportKind,
    off: usize,
    csum_off: Option<usize>,
    tcp_opts_len: usize,
    syn: bool,
    embedded: Option<Embedded>,
}

impl Transport {
    fn none(off: usize) -> Self {
        Self {
            kind: TransportKind::None,
            off,
            csum_off: None,
            tcp_opts_len: 0,
            syn: false,
            embedded: None,
        }
    }
}

fn walk(pkt: &[u8], version: IpVersion, contig: usize) -> Result<Walk, Stop> {
    // A contiguous length beyond the buffer is a caller bug; decline.
    let mut cur = HdrCursor::new(pkt, contig).map_err(|_| Stop::Unhandled)?;
    let net = ip_header(&mut cur, version, Nesting::Outer)?;
    let network_header_len = cur.consumed();

    let t = if net.has_transport {
        transport(&mut cur, version, net.proto, Nesting::Outer)?
    } else {
        Transport::none(network_header_len)
    };

    let cls = Classified {
        network_header_len,
        transport_kind: t.kind,
        transport_header_offset: t.off,
        checksum_field_offset: t.csum_off,
        tcp_options_len: t.tcp_opts_len,
        tcp_pull_len: network_header_len,
        pull_len: cur.consumed(),
        frag: net.frag,
        embedded: t.embedded,
    };

    Ok(Walk { cls, syn: t.syn })
}

fn ip_header(
    cur: &mut HdrCursor<'_>,
    version: IpVersion,
    nesting: Nesting,
) -> Result<NetHdr, Stop> {
    let first = cur.rest().first().copied().ok_or(Stop::SlowPath)?;
    if IpVersion::from_first_byte(first) != Some(version) {
        return Err(Stop::Unhandled);
    }

    match version {
        IpVersion::V4 => {
            let ip = cur.view::<Ipv4HdrRaw>()?;
            let hdr_len = ip.hdr_len();

            if hdr_len < IPV4_HDR_SZ {
                return Err(match nesting {
                    Nesting::Outer => Stop::Unhandled,
                    Nesting::Embedded => Stop::SlowPath,
                });
            }

            if nesting == Nesting::Outer
                && usize::from(ip.total_len()) < hdr_len
            {
                return Err(Stop::Unhandled);
            }

            cur.advance(hdr_len - IPV4_HDR_SZ)?;

            let frag = ip.is_fragment().then(|| FragInfo {
                offset: ip.frag_offset(),
                more: ip.more_frags(),
            });

            let has_transport = ip.frag_offset() == 0;
            Ok(NetHdr { proto: ip.proto, frag, has_transport })
        }

        IpVersion::V6 => {
            let ip = cur.view::<Ipv6HdrRaw>()?;
            let mut net =
                NetHdr { proto: ip.next_hdr, frag: None, has_transport: true };

            if net.proto == PROTO_IPV6_FRAG {
                let fh = cur.view::<Ipv6FragHdrRaw>()?;
                net.proto = fh.next_hdr;
                net.frag = Some(FragInfo {
                    offset: fh.frag_offset(),
                    more: fh.more_frags(),
                });
                net.has_transport = fh.frag_offset() == 0;
            }

            Ok(net)
        }
    }
}

fn transport(
    cur: &mut HdrCursor<'_>,
    version: IpVersion,
    proto: u8,
    nesting: Nesting,
) -> Result<Transport, Stop> {
    let off = cur.consumed();
    let mut t = Transport::none(off);

    match (version, proto) {
        (_, PROTO_TCP) => {
            let tcp = cur.view::<TcpHdrRaw>()?;
            t.kind = TransportKind::Tcp;
            t.csum_off = Some(off + TCP_CSUM_OFF);

            if nesting == Nesting::Outer {
                let opts = tcp.hdr_len().saturating_sub(TCP_HDR_SZ);
                cur.advance(opts)?;
                t.tcp_opts_len = opts;
                t.syn = tcp.flags().contains(TcpFlags::SYN);
            }
        }

        (_, PROTO_UDP) => {
            cur.view::<UdpHdrRaw>()?;
            t.kind = TransportKind::Udp;
            t.csum_off = Some(off + UDP_CSUM_OFF);
        }

        (_, PROTO_SCTP) => {
            cur.view::<SctpHdrRaw>()?;
            t.kind = TransportKind::Sctp;
            t.csum_off = Some(off + SCTP_CSUM_OFF);
        }

        (IpVersion::V4, PROTO_ICMP) => {
            let icmp = cur.view::<IcmpHdrRaw>()?;
            t.kind = TransportKind::Icmp;
            t.csum_off = Some(off + ICMP_CSUM_OFF);

            if nesting == Nesting::Outer && is_icmp4_error(icmp.ty) {
                t.embedded = embedded(cur, IpVersion::V4)?;
            }
        }

        (IpVersion::V6, PROTO_ICMPV6) => {
            let icmp = cur.view::<IcmpHdrRaw>()?;
            t.kind = TransportKind::Icmp6;
            t.csum_off = Some(off + ICMP_CSUM_OFF);

            if nesting == Nesting::Outer {
                match icmp.ty {
                    ICMP6_NEIGH_SOL => cur.advance(ICMP6_NEIGH_SOL_EXTRA)?,
                    ICMP6_ROUTER_SOL => cur.advance(ICMP6_ROUTER_SOL_EXTRA)?,
                    ty if is_icmp6_error(ty) => {
                        t.embedded = embedded(cur, IpVersion::V6)?;
                    }
                    _ => {}
                }
            }
        }

        _ => {}
    }

    Ok(t)
}

// Walk the datagram quoted after an ICMP error header. A quoted
// header that is not the expected IP version is skipped silently;
// running out of bytes is still a slow-path verdict.
fn embedded(
    cur: &mut HdrCursor<'_>,
    version: IpVersion,
) -> Result<Option<Embedded>, Stop> {
    let mut emb = *cur;
    let network_header_offset = emb.consumed();

    let net = match ip_header(&mut emb, version, Nesting::Embedded) {
        Ok(net) => net,
        Err(Stop::Unhandled) => return Ok(None),
        Err(stop) => return Err(stop),
    };

    let t = if net.has_transport {
        transport(&mut emb, version, net.proto, Nesting::Embedded)?
    } else {
        Transport::none(emb.consumed())
    };

    *cur = emb;
    Ok(Some(Embedded {
        network_header_offset,
        transport_kind: t.kind,
        transport_header_offset: t.off,
        checksum_field_offset: t.csum_off,
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::tcp::MtuClamp;

    #[rustfmt::skip]
    fn ip4(proto: u8, total_len: u16, frag: [u8; 2]) -> Vec<u8> {
        let tl = total_len.to_be_bytes();
        vec![
            // version + IHL, DSCP + ECN
            0x45, 0x00,
            // total length
            tl[0], tl[1],
            // ident
            0x00, 0x01,
            // flags + frag offset
            frag[0], frag[1],
            // TTL, protocol, checksum
            0x40, proto, 0x00, 0x00,
            // source
            10, 0, 0, 1,
            // dest
            10, 0, 0, 2,
        ]
    }

    #[rustfmt::skip]
    fn udp() -> Vec<u8> {
        vec![
            0x30, 0x39, 0x00, 0x35,
            0x00, 0x08, 0xBE, 0xEF,
        ]
    }

    #[rustfmt::skip]
    fn tcp(flags: u8, opts: &[u8]) -> Vec<u8> {
        let doff = ((20 + opts.len()) / 4) as u8;
        let mut v = vec![
            0xC0, 0x02, 0x00, 0x50,
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00,
            doff << 4, flags, 0xFA, 0xF0,
            0x12, 0x34, 0x00, 0x00,
        ];
        v.extend_from_slice(opts);
        v
    }

    fn classify_all(pkt: &mut [u8], l3: IpVersion) -> Verdict {
        let len = pkt.len();
        classify(pkt, Some(l3), len, None)
    }

    #[test]
    fn no_l3_is_unhandled() {
        let mut pkt = ip4(PROTO_UDP, 28, [0, 0]);
        let len = pkt.len();
        assert_eq!(classify(&mut pkt, None, len, None), Verdict::Unhandled);
    }

    #[test]
    fn version_mismatch_is_unhandled() {
        let mut pkt = ip4(PROTO_UDP, 28, [0, 0]);
        pkt.extend(udp());
        assert_eq!(classify_all(&mut pkt, IpVersion::V6), Verdict::Unhandled);
    }

    #[test]
    fn ip4_udp() {
        let mut pkt = ip4(PROTO_UDP, 28, [0, 0]);
        pkt.extend(udp());
        let cls = *classify_all(&mut pkt, IpVersion::V4).fast_path().unwrap();
        assert_eq!(cls.network_header_len, 20);
        assert_eq!(cls.transport_kind, TransportKind::Udp);
        assert_eq!(cls.transport_header_offset, 20);
        assert_eq!(cls.checksum_field_offset, Some(26));
        assert_eq!(cls.pull_len, 28);
        assert_eq!(cls.tcp_pull_len, 20);
        assert_eq!(cls.frag, None);
    }

    #[test]
    fn ip4_options_are_accounted() {
        let mut pkt = ip4(PROTO_UDP, 32, [0, 0]);
        pkt[0] = 0x46;
        // One NOP-padded option word.
        pkt.extend([1, 1, 1, 0]);
        pkt.extend(udp());
        let cls = *classify_all(&mut pkt, IpVersion::V4).fast_path().unwrap();
        assert_eq!(cls.network_header_len, 24);
        assert_eq!(cls.checksum_field_offset, Some(30));

        let mut short = pkt.clone();
        assert_eq!(
            classify(&mut short, Some(IpVersion::V4), 23, None),
            Verdict::NeedsSlowPath
        );
    }

    #[test]
    fn ip4_bad_ihl_is_unhandled() {
        let mut pkt = ip4(PROTO_UDP, 28, [0, 0]);
        pkt[0] = 0x44;
        pkt.extend(udp());
        assert_eq!(classify_all(&mut pkt, IpVersion::V4), Verdict::Unhandled);

        let mut pkt = ip4(PROTO_UDP, 12, [0, 0]);
        pkt.extend(udp());
        assert_eq!(classify_all(&mut pkt, IpVersion::V4), Verdict::Unhandled);
    }

    #[test]
    fn unknown_transport_resolves_without_pull() {
        let mut pkt = ip4(0x2F, 24, [0, 0]);
        pkt.extend([0, 0, 0x88, 0x47]);
        let cls = *classify_all(&mut pkt, IpVersion::V4).fast_path().unwrap();
        assert_eq!(cls.transport_kind, TransportKind::None);
        assert_eq!(cls.checksum_field_offset, None);
        assert_eq!(cls.pull_len, 20);
    }

    #[test]
    fn non_first_fragment_has_no_transport() {
        // Offset 185 * 8 = 1480, last fragment.
        let mut pkt = ip4(PROTO_UDP, 40, [0x00, 0xB9]);
        pkt.extend([0u8; 20]);
        let cls = *classify_all(&mut pkt, IpVersion::V4).fast_path().unwrap();
        assert_eq!(cls.transport_kind, TransportKind::None);
        assert_eq!(cls.frag, Some(FragInfo { offset: 1480, more: false }));
        assert_eq!(cls.pull_len, 20);
    }

    #[test]
    fn first_fragment_has_transport() {
        let mut pkt = ip4(PROTO_UDP, 28, [0x20, 0x00]);
        pkt.extend(udp());
        let cls = *classify_all(&mut pkt, IpVersion::V4).fast_path().unwrap();
        assert_eq!(cls.transport_kind, TransportKind::Udp);
        assert_eq!(cls.frag, Some(FragInfo { offset: 0, more: true }));
    }

    #[test]
    fn tcp_options_are_accounted() {
        let opts = [1, 1, 4, 2];
        let mut pkt = ip4(PROTO_TCP, 44, [0, 0]);
        pkt.extend(tcp(0x10, &opts));
        let cls = *classify_all(&mut pkt, IpVersion::V4).fast_path().unwrap();
        assert_eq!(cls.transport_kind, TransportKind::Tcp);
        assert_eq!(cls.tcp_options_len, 4);
        assert_eq!(cls.checksum_field_offset, Some(36));
        assert_eq!(cls.pull_len, 44);

        assert_eq!(
            classify(&mut pkt, Some(IpVersion::V4), 43, None),
            Verdict::NeedsSlowPath
        );
    }

    #[test]
    fn syn_without_hook_is_slow_path() {
        let mut pkt = ip4(PROTO_TCP, 44, [0, 0]);
        pkt.extend(tcp(0x02, &[2, 4, 0x23, 0x28]));
        assert_eq!(
            classify_all(&mut pkt, IpVersion::V4),
            Verdict::NeedsSlowPath
        );

        // Unless MSS adjustment is switched off.
        let classifier = Classifier::new(ClassifyCfg { mss_adjust: false });
        let len = pkt.len();
        let v = classifier.classify(&mut pkt, Some(IpVersion::V4), len, None);
        assert!(v.fast_path().is_some());
    }

    #[test]
    fn syn_with_hook_clamps_in_place() {
        let mut pkt = ip4(PROTO_TCP, 44, [0, 0]);
        pkt.extend(tcp(0x02, &[2, 4, 0x23, 0x28]));
        let hook = MtuClamp { mtu: 1500 };
        let len = pkt.len();
        let v = classify(&mut pkt, Some(IpVersion::V4), len, Some(&hook));
        assert!(v.fast_path().is_some());
        // 1500 - 62 - 20
        assert_eq!(&pkt[42..44], &1418u16.to_be_bytes());
    }

    #[test]
    fn hook_may_demand_slow_path() {
        let mut pkt = ip4(PROTO_TCP, 44, [0, 0]);
        pkt.extend(tcp(0x02, &[2, 4, 0x23, 0x28]));
        let hook = |_: &mut [u8], _: u16, _: usize| ClampDisposition::SlowPath;
        let len = pkt.len();
        assert_eq!(
            classify(&mut pkt, Some(IpVersion::V4), len, Some(&hook)),
            Verdict::NeedsSlowPath
        );
    }

    #[test]
    fn contig_beyond_buffer_is_unhandled() {
        let mut pkt = ip4(PROTO_UDP, 28, [0, 0]);
        pkt.extend(udp());
        assert_eq!(
            classify(&mut pkt, Some(IpVersion::V4), 100, None),
            Verdict::Unhandled
        );
    }

    #[test]
    fn pulls_transport_table() {
        assert!(pulls_transport(IpVersion::V4, PROTO_ICMP));
        assert!(!pulls_transport(IpVersion::V4, PROTO_ICMPV6));
        assert!(pulls_transport(IpVersion::V6, PROTO_IPV6_FRAG));
        assert!(!pulls_transport(IpVersion::V6, PROTO_ICMP));
        assert!(pulls_transport(IpVersion::V6, PROTO_SCTP));
    }
}
