#![no_main]

use libfuzzer_sys::fuzz_target;
use vrdp::api::IpVersion;
use vrdp::engine::Verdict;
use vrdp::engine::classify;
use vrdp::engine::tcp::MssClamp;
use vrdp::engine::tcp::MtuClamp;

// The first byte picks the IP version and whether a clamp hook is
// offered, the second how much of the packet is contiguous.
fuzz_target!(|data: &[u8]| {
    let [ctl, frac, rest @ ..] = data else {
        return;
    };

    let l3 = if ctl & 1 == 0 { IpVersion::V4 } else { IpVersion::V6 };
    let hook = MtuClamp { mtu: 1500 };
    let hook: Option<&dyn MssClamp> =
        if ctl & 2 == 0 { None } else { Some(&hook) };

    let mut pkt = rest.to_vec();
    let contig = pkt.len() * usize::from(*frac) / 255;
    let verdict = classify(&mut pkt, Some(l3), contig, hook);

    if let Verdict::FastPath(cls) = verdict {
        assert!(cls.pull_len <= contig);
        assert!(cls.network_header_len <= cls.pull_len);
        assert!(cls.transport_header_offset <= cls.pull_len);

        // More contiguous bytes never change a fast-path answer.
        let len = pkt.len();
        let again = classify(&mut pkt, Some(l3), len, hook);
        assert_eq!(again.fast_path().map(|c| c.pull_len), Some(cls.pull_len));
    }
});
