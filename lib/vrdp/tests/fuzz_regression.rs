// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Replay the classifier corpus kept under `tests/resources`.
//!
//! Each case is a packet which once tripped up the classifier (most
//! found by the fuzz targets) along with the verdict it must get.
//! Every case is also replayed at each shorter contiguous length,
//! where it must never do better than the full packet does.

use serde::Deserialize;
use vrdp::api::IpVersion;
use vrdp::engine::TransportKind;
use vrdp::engine::Verdict;
use vrdp::engine::classify;

const REGRESSIONS: &str = include_str!("resources/classify/regressions.ron");

#[derive(Debug, Deserialize)]
enum Kind {
    Tcp,
    Udp,
    Icmp,
    Icmp6,
    Sctp,
}

fn transport_kind(kind: &Option<Kind>) -> TransportKind {
    match kind {
        Some(Kind::Tcp) => TransportKind::Tcp,
        Some(Kind::Udp) => TransportKind::Udp,
        Some(Kind::Icmp) => TransportKind::Icmp,
        Some(Kind::Icmp6) => TransportKind::Icmp6,
        Some(Kind::Sctp) => TransportKind::Sctp,
        None => TransportKind::None,
    }
}

#[derive(Debug, Deserialize)]
enum Expect {
    FastPath { transport: Option<Kind>, pull_len: usize },
    NeedsSlowPath,
    Unhandled,
}

#[derive(Debug, Deserialize)]
struct Case {
    name: String,
    l3: Option<IpVersion>,
    packet: Vec<u8>,
    #[serde(default)]
    contig: Option<usize>,
    expect: Expect,
}

fn cases() -> Vec<Case> {
    ron::from_str(REGRESSIONS).expect("failed to parse regression corpus")
}

fn check(case: &Case, got: &Verdict) {
    let name = &case.name;
    match (&case.expect, got) {
        (Expect::FastPath { transport, pull_len }, Verdict::FastPath(cls)) => {
            let want = transport_kind(transport);
            assert_eq!(cls.transport_kind, want, "{name}");
            assert_eq!(cls.pull_len, *pull_len, "{name}");
        }
        (Expect::NeedsSlowPath, Verdict::NeedsSlowPath) => {}
        (Expect::Unhandled, Verdict::Unhandled) => {}
        (want, got) => panic!("{name}: expected {want:?}, got {got}"),
    }
}

#[test]
fn corpus_parses() {
    let cases = cases();
    assert!(!cases.is_empty());
    assert!(cases.iter().all(|c| !c.name.is_empty()));
}

#[test]
fn corpus_verdicts() {
    for case in cases() {
        let mut pkt = case.packet.clone();
        let contig = case.contig.unwrap_or(pkt.len());
        let got = classify(&mut pkt, case.l3, contig, None);
        check(&case, &got);
    }
}

#[test]
fn corpus_under_truncation() {
    for case in cases() {
        let len = case.packet.len();
        let contig = case.contig.unwrap_or(len);
        if contig > len {
            continue;
        }

        let mut pkt = case.packet.clone();
        let full = classify(&mut pkt, case.l3, contig, None);

        for short in 0..contig {
            let got = classify(&mut pkt, case.l3, short, None);
            match (&full, &got) {
                (Verdict::FastPath(cls), Verdict::FastPath(_)) => {
                    assert!(short >= cls.pull_len, "{}: {short}", case.name);
                }
                (_, Verdict::FastPath(_)) => {
                    panic!("{}: fast path at {short} bytes only", case.name)
                }
                _ => {}
            }
        }
    }
}
