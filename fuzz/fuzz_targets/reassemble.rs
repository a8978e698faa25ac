#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use vrdp::cfg::FragCfg;
use vrdp::engine::Assembly;
use vrdp::engine::FragAssembler;
use vrdp::engine::frag::WorkerIdentity;
use vrdp::provider::NullLog;
use vrdp::time::Moment;

struct Worker0;

impl WorkerIdentity for Worker0 {
    fn current_worker(&self) -> Option<usize> {
        Some(0)
    }
}

// The input is a run of packets, each prefixed by a one-byte length.
// Whatever they are, the partition must neither panic nor hand back a
// datagram larger than an IP datagram can be.
fuzz_target!(|data: &[u8]| {
    let cfg = FragCfg { buckets: 8, ..Default::default() };
    let Ok(mut fa) =
        FragAssembler::new(cfg, Arc::new(Worker0), Arc::new(NullLog))
    else {
        return;
    };
    let Some(part) = fa.partition_mut(0) else {
        return;
    };

    let mut rest = data;
    let mut now = 0;
    while let [len, tail @ ..] = rest {
        let len = usize::from(*len).min(tail.len());
        let (pkt, tail) = tail.split_at(len);
        rest = tail;
        now += 100;

        if let Ok(Assembly::Complete(dgram)) =
            part.assemble(pkt, Moment::from_millis(now))
        {
            assert!(dgram.len() <= 40 + 65535);
        }
    }

    // Each scan visits at least one bucket.
    let later = Moment::from_millis(now + 60_000);
    for _ in 0..cfg.buckets {
        part.scan_buckets(later);
    }
    assert_eq!(part.entries(), 0);
});
