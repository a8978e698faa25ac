#![no_main]

use libfuzzer_sys::fuzz_target;
use vrdp::api::TunnelClass;
use vrdp::engine::HdrCursor;
use vrdp::engine::TunnelResult;
use vrdp::engine::decode_tunnel;
use vrdp::engine::tunnel::TunnelProto;

const PROTOS: [TunnelProto; 4] = [
    TunnelProto::Gre(0x8847),
    TunnelProto::Udp(6635),
    TunnelProto::Udp(51234),
    TunnelProto::Udp(4789),
];

const CLASSES: [TunnelClass; 5] = [
    TunnelClass::L3,
    TunnelClass::L2Unicast,
    TunnelClass::L2Multicast,
    TunnelClass::L2ControlData,
    TunnelClass::Reject,
];

// The first byte picks the transport and the label classification.
fuzz_target!(|data: &[u8]| {
    let [ctl, rest @ ..] = data else {
        return;
    };

    let proto = PROTOS[usize::from(ctl & 0x3)];
    let class = CLASSES[usize::from(ctl >> 2) % CLASSES.len()];
    let hook = move |_label: u32, _cw: u32| class;

    let Ok(cur) = HdrCursor::new(rest, rest.len()) else {
        return;
    };

    if let TunnelResult::Decoded(desc) = decode_tunnel(&cur, proto, &hook) {
        assert!(desc.bytes_consumed <= desc.pull_len);
        assert!(desc.pull_len <= rest.len());
        if let Some(l3) = desc.inner_l3 {
            assert_eq!(l3.offset(), desc.bytes_consumed);
        }
    }
});
