// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! MSS clamping, on its own and through the classifier.

use itertools::iproduct;
use vrdp::engine::Verdict;
use vrdp::engine::adjust_tcp_mss;
use vrdp::engine::classify;
use vrdp::engine::tcp::L2_OVERLAY_LEN;
use vrdp::engine::tcp::MtuClamp;
use vrdp::engine::tcp::adjust_tcp_mss_min_mtu;
use vrdp_test_utils::*;

fn syn(mss: u16) -> Vec<u8> {
    tcp(40000, 443, TcpFlags::SYN, &mss_opt(mss))
}

fn mss_of(seg: &[u8]) -> u16 {
    u16::from_be_bytes([seg[22], seg[23]])
}

#[test]
fn jumbo_syn_clamped() {
    let mut seg = syn(9000);
    assert_eq!(adjust_tcp_mss(&mut seg, 20, 1500), Some((9000, 1460)));
    assert_eq!(mss_of(&seg), 1460);

    let mut seg = syn(9000);
    assert_eq!(adjust_tcp_mss(&mut seg, 40, 1500), Some((9000, 1440)));
    assert_eq!(mss_of(&seg), 1440);
}

// The result never exceeds the old value nor the MTU budget, and an
// MSS which already fits is left alone. An MTU with no room past the
// headers changes nothing.
#[test]
fn clamp_is_monotone() {
    let msses = [0, 536, 1000, 1400, 1418, 1460, 8960, 9000, u16::MAX];
    let overheads = [0, 20, 40, 62, 1500];
    let mtus = [0, 20, 64, 82, 83, 576, 1280, 1500, 9000];

    for (mss, overhead, mtu) in iproduct!(msses, overheads, mtus) {
        let mut seg = syn(mss);
        let hdrs = u32::from(overhead) + 20;
        let res = adjust_tcp_mss(&mut seg, overhead, mtu);

        if u32::from(mtu) <= hdrs {
            assert_eq!(res, None, "mss {mss} overhead {overhead} mtu {mtu}");
            assert_eq!(mss_of(&seg), mss);
            continue;
        }

        let max = mtu - hdrs as u16;
        assert!(max > 0);
        if mss <= max {
            assert_eq!(res, None, "mss {mss} overhead {overhead} mtu {mtu}");
            assert_eq!(mss_of(&seg), mss);
        } else {
            assert_eq!(res, Some((mss, max)));
            assert_eq!(mss_of(&seg), max);
        }
    }
}

#[test]
fn small_mtu_leaves_syn_alone() {
    let mut seg = syn(1460);
    assert_eq!(adjust_tcp_mss(&mut seg, L2_OVERLAY_LEN, 64), None);
    assert_eq!(mss_of(&seg), 1460);

    let mut pkt =
        ipv4(IP4_SRC, IP4_DST, PROTO_TCP, 5, V4Frag::default(), &syn(1460));
    fill_tcp4_csum(&mut pkt);
    let len = pkt.len();
    let hook = MtuClamp { mtu: 64 };
    let v = classify(&mut pkt, Some(IpVersion::V4), len, Some(&hook));
    assert!(matches!(v, Verdict::FastPath(_)));
    assert_eq!(mss_of(&pkt[20..]), 1460);
    assert!(tcp4_csum_ok(&pkt));
}

#[test]
fn smallest_mtu_wins() {
    let mut seg = syn(9000);
    let res = adjust_tcp_mss_min_mtu(&mut seg, 62, &[9000, 1500, 1600]);
    assert_eq!(res, Some((9000, 1418)));
}

// A SYN classified with the MTU hook leaves with a clamped MSS and a
// TCP checksum that still verifies.
#[test]
fn classify_clamps_and_keeps_checksum() {
    let opts = [mss_opt(8960), [1, 3, 3, 7]].concat();
    let seg = tcp(40000, 443, TcpFlags::SYN, &opts);
    let mut pkt =
        ipv4(IP4_SRC, IP4_DST, PROTO_TCP, 3, V4Frag::default(), &seg);
    fill_tcp4_csum(&mut pkt);
    assert!(tcp4_csum_ok(&pkt));

    let len = pkt.len();
    let hook = MtuClamp { mtu: 1500 };
    let v = classify(&mut pkt, Some(IpVersion::V4), len, Some(&hook));
    let cls = v.fast_path().unwrap();
    assert_eq!(cls.tcp_options_len, 8);

    let want = 1500 - L2_OVERLAY_LEN - 20;
    assert_eq!(mss_of(&pkt[20..]), want);
    assert!(tcp4_csum_ok(&pkt));
    assert!(ipv4_csum_ok(&pkt));
}

#[test]
fn syn_ack_is_clamped_too() {
    let seg = tcp(443, 40000, TcpFlags::SYN | TcpFlags::ACK, &mss_opt(9000));
    let mut pkt =
        ipv4(IP4_DST, IP4_SRC, PROTO_TCP, 4, V4Frag::default(), &seg);
    let len = pkt.len();
    let hook = MtuClamp { mtu: 1500 };
    let v = classify(&mut pkt, Some(IpVersion::V4), len, Some(&hook));
    assert!(matches!(v, Verdict::FastPath(_)));
    assert_eq!(mss_of(&pkt[20..]), 1418);
}
