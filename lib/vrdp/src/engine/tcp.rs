// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP MSS clamping.

use super::checksum;
use super::headers::TCP_HDR_SZ;
use vrdp_api::TCP_OPT_EOL;
use vrdp_api::TCP_OPT_MSS;
use vrdp_api::TCP_OPT_MSS_LEN;
use vrdp_api::TCP_OPT_NOP;
use vrdp_api::TcpFlags;

/// The encapsulation overhead of an L2 overlay, handed to the MSS
/// clamp hook by the classifier: outer Ethernet, IPv4 and UDP, the
/// MPLS label, the control word and the inner Ethernet header.
pub const L2_OVERLAY_LEN: u16 = 62;

/// Offset of the checksum field within the TCP header.
pub const TCP_CSUM_OFF: usize = 16;

/// What the classifier should do after the MSS clamp hook ran.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClampDisposition {
    /// Carry on with fast-path classification.
    Continue,
    /// The hook could not clamp here; use the slow path.
    SlowPath,
}

/// A hook which clamps the MSS of a TCP SYN in place.
///
/// `tcp` is the full TCP header, options included. `overhead` is the
/// encapsulation overhead the egress will add and `l3_hdr_len` is
/// the length of the network header(s) in front of `tcp`.
pub trait MssClamp {
    fn clamp(
        &self,
        tcp: &mut [u8],
        overhead: u16,
        l3_hdr_len: usize,
    ) -> ClampDisposition;
}

impl<F> MssClamp for F
where
    F: Fn(&mut [u8], u16, usize) -> ClampDisposition,
{
    fn clamp(
        &self,
        tcp: &mut [u8],
        overhead: u16,
        l3_hdr_len: usize,
    ) -> ClampDisposition {
        self(tcp, overhead, l3_hdr_len)
    }
}

/// Clamp against a fixed egress MTU, keeping the TCP checksum valid.
#[derive(Clone, Copy, Debug)]
pub struct MtuClamp {
    pub mtu: u16,
}

impl MssClamp for MtuClamp {
    fn clamp(
        &self,
        tcp: &mut [u8],
        overhead: u16,
        _l3_hdr_len: usize,
    ) -> ClampDisposition {
        if let Some(change) = clamp_mss(tcp, overhead, self.mtu) {
            fix_csum(tcp, &change);
        }
        ClampDisposition::Continue
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct MssChange {
    // Offset of the MSS value (not the option kind).
    val_off: usize,
    old: u16,
    new: u16,
}

/// Clamp the MSS option of the TCP SYN header `tcp` so that a full
/// segment fits in `mtu` once `overhead` bytes of encapsulation and
/// the fixed TCP header are added.
///
/// Returns `Some((old, new))` when the option was rewritten. The MSS
/// is never raised. `None` means no change: the header is short or
/// not a SYN, there is no well-formed MSS option within the declared
/// options length, the MSS already fits, or `mtu` is no larger than
/// `overhead` plus the fixed TCP header.
///
/// The TCP checksum is left untouched.
pub fn adjust_tcp_mss(
    tcp: &mut [u8],
    overhead: u16,
    mtu: u16,
) -> Option<(u16, u16)> {
    clamp_mss(tcp, overhead, mtu).map(|c| (c.old, c.new))
}

/// Like [`adjust_tcp_mss`], against the smallest of several egress
/// MTUs. No MTUs means no change.
pub fn adjust_tcp_mss_min_mtu(
    tcp: &mut [u8],
    overhead: u16,
    mtus: &[u16],
) -> Option<(u16, u16)> {
    let mtu = mtus.iter().copied().min()?;
    adjust_tcp_mss(tcp, overhead, mtu)
}

fn clamp_mss(tcp: &mut [u8], overhead: u16, mtu: u16) -> Option<MssChange> {
    if tcp.len() < TCP_HDR_SZ {
        return None;
    }

    if !TcpFlags::from_bits_truncate(tcp[13]).contains(TcpFlags::SYN) {
        return None;
    }

    let end = (usize::from(tcp[12] >> 4) * 4).min(tcp.len());
    let mut off = TCP_HDR_SZ;

    while off < end {
        match tcp[off] {
            TCP_OPT_EOL => return None,

            TCP_OPT_NOP => off += 1,

            TCP_OPT_MSS => {
                let mss_len = usize::from(TCP_OPT_MSS_LEN);
                if off + mss_len > end || tcp[off + 1] != TCP_OPT_MSS_LEN {
                    return None;
                }

                // An MTU that cannot carry the headers leaves nothing
                // sensible to clamp to.
                let hdrs = u32::from(overhead) + TCP_HDR_SZ as u32;
                if u32::from(mtu) <= hdrs {
                    return None;
                }

                let val_off = off + 2;
                let old = u16::from_be_bytes([tcp[val_off], tcp[val_off + 1]]);
                let max = mtu - hdrs as u16;

                if old <= max {
                    return None;
                }

                tcp[val_off..val_off + 2].copy_from_slice(&max.to_be_bytes());
                return Some(MssChange { val_off, old, new: max });
            }

            _ => {
                if off + 1 >= end {
                    return None;
                }

                // A zero length would never advance.
                off += usize::from(tcp[off + 1]).max(1);
            }
        }
    }

    None
}

// Incrementally fix the TCP checksum for a rewritten MSS value. The
// value may start at an odd offset, in which case it straddles two
// 16-bit words of the sum.
fn fix_csum(tcp: &mut [u8], change: &MssChange) {
    let start = change.val_off & !1;
    let end = ((change.val_off + 3) & !1).min(tcp.len());
    let n = end - start;

    let mut new = [0u8; 4];
    new[..n].copy_from_slice(&tcp[start..end]);
    let mut old = new;
    let rel = change.val_off - start;
    old[rel..rel + 2].copy_from_slice(&change.old.to_be_bytes());

    checksum::update_in_place(tcp, TCP_CSUM_OFF, &old[..n], &new[..n]);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::checksum::Checksum;
    use crate::engine::checksum::HeaderChecksum;

    #[rustfmt::skip]
    fn syn_with_opts(flags: u8, opts: &[u8]) -> Vec<u8> {
        assert_eq!(opts.len() % 4, 0);
        let doff = ((TCP_HDR_SZ + opts.len()) / 4) as u8;
        let mut hdr = vec![
            // source port, dest port
            0xC0, 0x02, 0x00, 0x50,
            // seq
            0x95, 0xAF, 0x94, 0x03,
            // ack
            0x00, 0x00, 0x00, 0x00,
            // data offset, flags
            doff << 4, flags,
            // window
            0xFA, 0xF0,
            // checksum
            0x00, 0x00,
            // urgent
            0x00, 0x00,
        ];
        hdr.extend_from_slice(opts);
        hdr
    }

    const MSS_9000: [u8; 4] = [TCP_OPT_MSS, 4, 0x23, 0x28];

    #[test]
    fn clamp_jumbo_mss() {
        let mut tcp = syn_with_opts(0x02, &MSS_9000);
        assert_eq!(adjust_tcp_mss(&mut tcp, 20, 1500), Some((9000, 1460)));
        assert_eq!(&tcp[22..24], &1460u16.to_be_bytes());

        let mut tcp = syn_with_opts(0x02, &MSS_9000);
        assert_eq!(adjust_tcp_mss(&mut tcp, 40, 1500), Some((9000, 1440)));
        assert_eq!(&tcp[22..24], &1440u16.to_be_bytes());
    }

    #[test]
    fn never_raises_mss() {
        let mut tcp = syn_with_opts(0x02, &[TCP_OPT_MSS, 4, 0x04, 0x00]);
        let before = tcp.clone();
        assert_eq!(adjust_tcp_mss(&mut tcp, 40, 9000), None);
        assert_eq!(tcp, before);

        // Exactly at the limit is not a change either.
        let mut tcp = syn_with_opts(0x02, &[TCP_OPT_MSS, 4, 0x05, 0xA0]);
        assert_eq!(adjust_tcp_mss(&mut tcp, 20, 1500), None);
    }

    #[test]
    fn small_mtu_leaves_mss() {
        let opts = [TCP_OPT_MSS, 4, 0x05, 0xB4];
        let mut tcp = syn_with_opts(0x02, &opts);
        let before = tcp.clone();
        assert_eq!(adjust_tcp_mss(&mut tcp, 62, 64), None);
        assert_eq!(adjust_tcp_mss(&mut tcp, 62, 82), None);
        assert_eq!(adjust_tcp_mss(&mut tcp, 1500, 1280), None);
        assert_eq!(tcp, before);

        // One byte past the headers is the smallest clamp.
        assert_eq!(adjust_tcp_mss(&mut tcp, 62, 83), Some((1460, 1)));
        assert_eq!(&tcp[22..24], &1u16.to_be_bytes());
    }

    #[test]
    fn no_syn_no_change() {
        let mut tcp = syn_with_opts(0x10, &MSS_9000);
        assert_eq!(adjust_tcp_mss(&mut tcp, 40, 1500), None);
        assert!(adjust_tcp_mss(&mut [0u8; 10], 40, 1500).is_none());
    }

    #[test]
    fn walks_nop_and_other_options() {
        #[rustfmt::skip]
        let opts = [
            // NOP, NOP, SACK permitted
            TCP_OPT_NOP, TCP_OPT_NOP, 4, 2,
            // window scale, NOP
            3, 3, 7, TCP_OPT_NOP,
            // MSS 9000
            TCP_OPT_MSS, 4, 0x23, 0x28,
        ];
        let mut tcp = syn_with_opts(0x02, &opts);
        assert_eq!(adjust_tcp_mss(&mut tcp, 62, 1500), Some((9000, 1418)));
        assert_eq!(&tcp[30..32], &1418u16.to_be_bytes());
    }

    #[test]
    fn stops_at_eol_and_bad_len() {
        let opts = [TCP_OPT_EOL, 0, 0, 0, TCP_OPT_MSS, 4, 0x23, 0x28];
        let mut tcp = syn_with_opts(0x02, &opts);
        assert_eq!(adjust_tcp_mss(&mut tcp, 40, 1500), None);

        let opts = [TCP_OPT_MSS, 3, 0x23, 0x28];
        let mut tcp = syn_with_opts(0x02, &opts);
        assert_eq!(adjust_tcp_mss(&mut tcp, 40, 1500), None);
    }

    #[test]
    fn bounded_by_data_offset() {
        // The MSS option lies beyond the declared header length.
        let mut tcp = syn_with_opts(0x02, &[]);
        tcp.extend_from_slice(&MSS_9000);
        assert_eq!(adjust_tcp_mss(&mut tcp, 40, 1500), None);
    }

    #[test]
    fn min_mtu() {
        let mut tcp = syn_with_opts(0x02, &MSS_9000);
        assert_eq!(
            adjust_tcp_mss_min_mtu(&mut tcp, 20, &[9000, 1500, 4000]),
            Some((9000, 1460))
        );
        let mut tcp = syn_with_opts(0x02, &MSS_9000);
        assert_eq!(adjust_tcp_mss_min_mtu(&mut tcp, 20, &[]), None);
    }

    // Sum the segment and a made-up pseudo-header; a valid checksum
    // folds to 0xFFFF.
    fn sums_valid(pseudo: &[u8], tcp: &[u8]) -> bool {
        let mut csum = Checksum::compute(pseudo);
        csum.add_bytes(tcp);
        csum.finalize() == 0xFFFF
    }

    #[test]
    fn mtu_clamp_keeps_checksum_valid() {
        let pseudo = [10, 0, 0, 1, 10, 0, 0, 2, 0, 6, 0, 28];
        // Put the MSS value at an odd offset.
        let opts = [TCP_OPT_NOP, TCP_OPT_MSS, 4, 0x23, 0x28, 0, 0, 0];
        let mut tcp = syn_with_opts(0x02, &opts);

        let mut csum = Checksum::compute(&pseudo);
        csum.add_bytes(&tcp);
        let hc = HeaderChecksum::from(csum);
        tcp[16..18].copy_from_slice(&hc.bytes());
        assert!(sums_valid(&pseudo, &tcp));

        let hook = MtuClamp { mtu: 1500 };
        assert_eq!(hook.clamp(&mut tcp, 40, 20), ClampDisposition::Continue);
        assert_eq!(&tcp[23..25], &1440u16.to_be_bytes());
        assert!(sums_valid(&pseudo, &tcp));
    }

    #[test]
    fn closure_hook() {
        let hook = |tcp: &mut [u8], overhead: u16, _l3: usize| {
            match adjust_tcp_mss(tcp, overhead, 1500) {
                Some(_) => ClampDisposition::Continue,
                None => ClampDisposition::SlowPath,
            }
        };
        let mut tcp = syn_with_opts(0x02, &MSS_9000);
        assert_eq!(hook.clamp(&mut tcp, 40, 20), ClampDisposition::Continue);
        assert_eq!(hook.clamp(&mut tcp, 40, 20), ClampDisposition::SlowPath);
    }
}
