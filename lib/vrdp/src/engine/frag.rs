// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IP fragment reassembly.
//!
//! The assembler is split into one [`FragPartition`] per forwarding
//! worker. A partition holds that worker's inbound queue and its
//! table of in-flight datagrams, and nothing else ever touches it:
//! the partitioning is what lets the hot path run without locks.
//! Handing out `&mut FragPartition` makes the borrow checker enforce
//! that within one process, and [`FragPartition::enqueue`] also
//! checks the calling worker against a [`WorkerIdentity`] so that a
//! caller with a confused idea of which worker it is gets an error
//! rather than a corrupted table.
//!
//! Every bucket table and queue is allocated in
//! [`FragAssembler::new`]. At runtime only the per-datagram entries
//! allocate, and a failure there drops the fragment.
//!
//! # Lifecycle of an entry
//!
//! ```text
//! Empty -> Accumulating -> Complete
//!                       \-> Stale (evicted by scan_buckets)
//! ```
//!
//! An entry is created by the first fragment of its datagram to
//! arrive, whatever its offset, and lives until the fragments cover
//! the whole datagram or [`FragPartition::scan_buckets`] finds it
//! older than the configured staleness TTL.

use super::checksum::ipv4_hdr_checksum;
use super::cursor::HdrCursor;
use super::headers::IPV4_FLAG_MF;
use super::headers::IPV4_FRAG_OFFSET_MASK;
use super::headers::IPV4_HDR_SZ;
use super::headers::IPV6_FRAG_HDR_SZ;
use super::headers::IPV6_HDR_SZ;
use super::headers::Ipv4HdrRaw;
use super::headers::Ipv6FragHdrRaw;
use super::headers::Ipv6HdrRaw;
use crate::cfg::CfgError;
use crate::cfg::FragCfg;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::time::Moment;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;
use thiserror::Error;
use vrdp_api::DropReason;
use vrdp_api::IpAddr;
use vrdp_api::IpVersion;
use vrdp_api::Ipv4Addr;
use vrdp_api::Ipv6Addr;
use vrdp_api::PROTO_IPV6_FRAG;

/// The most fragments a single datagram may arrive in.
pub const FRAG_MAX_PIECES: usize = 64;

/// The largest datagram payload that can be reassembled.
pub const FRAG_MAX_DATAGRAM: usize = 65535;

/// Offset of the IPv4 total length field.
const IPV4_TOTAL_LEN_OFF: usize = 2;
const IPV4_FRAG_OFF: usize = 6;
const IPV4_CSUM_OFF: usize = 10;
const IPV6_PAYLOAD_LEN_OFF: usize = 4;
const IPV6_NEXT_HDR_OFF: usize = 6;

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum FragError {
    #[error("enqueue on worker {owner}'s partition from {current:?}")]
    NotOwner { owner: usize, current: Option<usize> },

    #[error("fragment queue full at {0} packets")]
    QueueFull(usize),

    #[error("packet is not a fragment")]
    NotFragment,

    #[error("malformed fragment")]
    Malformed,

    #[error("datagram exceeds reassembly limits")]
    TooLarge,

    #[error("failed to allocate fragment storage")]
    NoMemory,
}

impl FragError {
    /// The reason the dropped packet should be accounted under.
    pub fn drop_reason(&self) -> DropReason {
        match self {
            Self::NotOwner { .. } | Self::QueueFull(_) | Self::TooLarge => {
                DropReason::Fragments
            }
            Self::NotFragment | Self::Malformed => DropReason::Malformed,
            Self::NoMemory => DropReason::NoMemory,
        }
    }
}

/// The assembler could not be built. The engine must not start.
#[derive(Debug, Error)]
pub enum FragInitError {
    #[error("bad fragment config: {0}")]
    BadConfig(#[from] CfgError),

    #[error("failed to allocate {what} for worker {worker}")]
    NoMemory { what: &'static str, worker: usize },
}

/// The source of the current worker's id.
pub trait WorkerIdentity: Send + Sync {
    /// The id of the worker running the caller, or `None` when the
    /// caller is not a forwarding worker at all.
    fn current_worker(&self) -> Option<usize>;
}

cfg_if! {
    if #[cfg(feature = "std")] {
        use core::cell::Cell;

        std::thread_local! {
            static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
        }

        /// Worker identity bound to the current thread.
        ///
        /// A forwarding thread calls [`ThreadWorkerId::bind`] once,
        /// before it touches its partition.
        #[derive(Clone, Copy, Debug, Default)]
        pub struct ThreadWorkerId;

        impl ThreadWorkerId {
            pub fn bind(worker: usize) {
                WORKER_ID.with(|id| id.set(Some(worker)));
            }

            pub fn unbind() {
                WORKER_ID.with(|id| id.set(None));
            }
        }

        impl WorkerIdentity for ThreadWorkerId {
            fn current_worker(&self) -> Option<usize> {
                WORKER_ID.with(|id| id.get())
            }
        }
    }
}

/// The identity of an original datagram.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FragKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub proto: u8,
    pub ident: u32,
}

impl FragKey {
    pub fn version(&self) -> IpVersion {
        self.src.version()
    }

    /// The hash used to pick the key's bucket.
    pub fn bucket_hash(&self) -> u32 {
        let mut h = crc32fast::Hasher::new();
        for addr in [self.src, self.dst] {
            match addr {
                IpAddr::Ip4(ip) => h.update(&ip.bytes()),
                IpAddr::Ip6(ip) => h.update(&ip.bytes()),
            }
        }
        h.update(&[self.proto]);
        h.update(&self.ident.to_be_bytes());
        h.finalize()
    }
}

/// A fragment, located within its packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fragment {
    pub key: FragKey,
    /// Offset of this fragment's payload in the original datagram.
    pub offset: usize,
    pub more: bool,
    /// Length of the network header(s), the IPv6 Fragment header
    /// included.
    pub hdr_len: usize,
    /// The fragment payload within the packet.
    pub payload: Range<usize>,
}

impl Fragment {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check the fragment's size against the reassembly rules.
    pub fn check_limits(&self) -> Result<(), FragError> {
        // Every fragment but the last carries a multiple of eight bytes.
        if self.more && self.payload_len() % 8 != 0 {
            return Err(FragError::Malformed);
        }

        if self.offset + self.payload_len() > FRAG_MAX_DATAGRAM {
            return Err(FragError::TooLarge);
        }

        Ok(())
    }
}

/// Locate the fragment carried by the IP packet `pkt`.
pub fn parse_fragment(pkt: &[u8]) -> Result<Fragment, FragError> {
    let info = locate_fragment(pkt)?;
    info.check_limits()?;
    Ok(info)
}

// Find the fragment fields without judging their sizes.
fn locate_fragment(pkt: &[u8]) -> Result<Fragment, FragError> {
    let mut cur =
        HdrCursor::new(pkt, pkt.len()).map_err(|_| FragError::Malformed)?;
    let first = pkt.first().copied().ok_or(FragError::Malformed)?;

    let info = match IpVersion::from_first_byte(first) {
        Some(IpVersion::V4) => {
            let ip =
                cur.view::<Ipv4HdrRaw>().map_err(|_| FragError::Malformed)?;
            let hdr_len = ip.hdr_len();
            let total = usize::from(ip.total_len());
            if hdr_len < IPV4_HDR_SZ || total < hdr_len || total > pkt.len() {
                return Err(FragError::Malformed);
            }

            if !ip.is_fragment() {
                return Err(FragError::NotFragment);
            }

            Fragment {
                key: FragKey {
                    src: Ipv4Addr::from(ip.src).into(),
                    dst: Ipv4Addr::from(ip.dst).into(),
                    proto: ip.proto,
                    ident: u32::from(ip.ident()),
                },
                offset: ip.frag_offset(),
                more: ip.more_frags(),
                hdr_len,
                payload: hdr_len..total,
            }
        }

        Some(IpVersion::V6) => {
            let ip =
                cur.view::<Ipv6HdrRaw>().map_err(|_| FragError::Malformed)?;
            if ip.next_hdr != PROTO_IPV6_FRAG {
                return Err(FragError::NotFragment);
            }

            let fh = cur
                .view::<Ipv6FragHdrRaw>()
                .map_err(|_| FragError::Malformed)?;
            let hdr_len = IPV6_HDR_SZ + IPV6_FRAG_HDR_SZ;
            let end = IPV6_HDR_SZ + usize::from(ip.payload_len());
            if end < hdr_len || end > pkt.len() {
                return Err(FragError::Malformed);
            }

            Fragment {
                key: FragKey {
                    src: Ipv6Addr::from(ip.src).into(),
                    dst: Ipv6Addr::from(ip.dst).into(),
                    proto: fh.next_hdr,
                    ident: fh.ident(),
                },
                offset: fh.frag_offset(),
                more: fh.more_frags(),
                hdr_len,
                payload: hdr_len..end,
            }
        }

        None => return Err(FragError::Malformed),
    };

    Ok(info)
}

/// The outcome of feeding one fragment to the assembler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Assembly {
    /// The datagram is still missing fragments.
    Pending,
    /// The fragment completed its datagram.
    Complete(Vec<u8>),
}

/// What one call to [`FragPartition::scan_buckets`] did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanStats {
    /// Fragments held by the entries visited.
    pub visited: usize,
    pub evicted: usize,
    /// The bucket the next scan starts from.
    pub next_index: usize,
}

#[derive(Debug)]
struct Piece {
    offset: usize,
    data: Vec<u8>,
}

impl Piece {
    fn end(&self) -> usize {
        self.offset + self.data.len()
    }
}

#[derive(Debug)]
struct FragEntry {
    key: FragKey,
    first_seen: Moment,
    /// The network header of the offset-zero fragment.
    head: Option<Vec<u8>>,
    /// The datagram payload length, known once the last fragment
    /// has arrived.
    total: Option<usize>,
    /// Pieces in arrival order.
    pieces: heapless::Vec<Piece, FRAG_MAX_PIECES>,
}

impl FragEntry {
    fn new(key: FragKey, now: Moment) -> Self {
        Self {
            key,
            first_seen: now,
            head: None,
            total: None,
            pieces: heapless::Vec::new(),
        }
    }

    fn add(&mut self, pkt: &[u8], info: &Fragment) -> Result<(), FragError> {
        let end = info.offset + info.payload_len();

        if !info.more {
            match self.total {
                Some(total) if total != end => return Err(FragError::Malformed),
                _ => self.total = Some(end),
            }
        }

        if let Some(total) = self.total {
            if self.pieces.iter().any(|p| p.end() > total) || end > total {
                return Err(FragError::Malformed);
            }
        }

        if self.pieces.is_full() {
            return Err(FragError::TooLarge);
        }

        if info.offset == 0 && self.head.is_none() {
            let hdr = &pkt[..info.hdr_len];
            self.head = Some(copy(hdr)?);
        }

        let data = copy(&pkt[info.payload.clone()])?;
        self.pieces
            .push(Piece { offset: info.offset, data })
            .map_err(|_| FragError::TooLarge)
    }

    /// Do the pieces cover `[0, total)` without a gap?
    fn is_complete(&self) -> bool {
        let (Some(total), Some(_)) = (self.total, &self.head) else {
            return false;
        };

        let mut spans: heapless::Vec<(usize, usize), FRAG_MAX_PIECES> =
            self.pieces.iter().map(|p| (p.offset, p.end())).collect();
        spans.sort_unstable();

        let mut covered = 0;
        for (start, end) in spans {
            if start > covered {
                return false;
            }
            covered = covered.max(end);
        }

        covered >= total
    }

    /// Build the reassembled datagram. Where fragments overlap, the
    /// bytes that arrived first win.
    fn reassemble(self) -> Result<Vec<u8>, FragError> {
        let (Some(total), Some(head)) = (self.total, self.head) else {
            return Err(FragError::Malformed);
        };

        let mut out = match self.key.version() {
            IpVersion::V4 => ipv4_head(&head, total)?,
            IpVersion::V6 => ipv6_head(&head, self.key.proto, total)?,
        };

        let base = out.len();
        out.try_reserve_exact(total).map_err(|_| FragError::NoMemory)?;
        out.resize(base + total, 0);

        for piece in self.pieces.iter().rev() {
            out[base + piece.offset..base + piece.end()]
                .copy_from_slice(&piece.data);
        }

        Ok(out)
    }
}

fn copy(bytes: &[u8]) -> Result<Vec<u8>, FragError> {
    let mut v = Vec::new();
    v.try_reserve_exact(bytes.len()).map_err(|_| FragError::NoMemory)?;
    v.extend_from_slice(bytes);
    Ok(v)
}

// The first fragment's header with the fragment fields cleared and
// the length and checksum rewritten.
fn ipv4_head(head: &[u8], total: usize) -> Result<Vec<u8>, FragError> {
    let total_len =
        u16::try_from(head.len() + total).map_err(|_| FragError::TooLarge)?;
    let mut out = copy(head)?;

    out[IPV4_TOTAL_LEN_OFF..IPV4_TOTAL_LEN_OFF + 2]
        .copy_from_slice(&total_len.to_be_bytes());

    let ff = &out[IPV4_FRAG_OFF..IPV4_FRAG_OFF + 2];
    let flags = u16::from_be_bytes([ff[0], ff[1]]);
    let flags = flags & !(IPV4_FLAG_MF | IPV4_FRAG_OFFSET_MASK);
    out[IPV4_FRAG_OFF..IPV4_FRAG_OFF + 2].copy_from_slice(&flags.to_be_bytes());

    let csum = ipv4_hdr_checksum(&out);
    out[IPV4_CSUM_OFF..IPV4_CSUM_OFF + 2].copy_from_slice(&csum.bytes());
    Ok(out)
}

// The base header alone: the Fragment header is dropped and its
// next header takes its place.
fn ipv6_head(
    head: &[u8],
    proto: u8,
    total: usize,
) -> Result<Vec<u8>, FragError> {
    let payload_len = u16::try_from(total).map_err(|_| FragError::TooLarge)?;
    let mut out = copy(&head[..IPV6_HDR_SZ])?;
    out[IPV6_NEXT_HDR_OFF] = proto;
    out[IPV6_PAYLOAD_LEN_OFF..IPV6_PAYLOAD_LEN_OFF + 2]
        .copy_from_slice(&payload_len.to_be_bytes());
    Ok(out)
}

#[derive(Debug, Default)]
struct Bucket {
    entries: Vec<FragEntry>,
}

/// One worker's share of the assembler.
pub struct FragPartition {
    worker: usize,
    cfg: FragCfg,
    identity: Arc<dyn WorkerIdentity>,
    log: Arc<dyn LogProvider>,
    buckets: Box<[Bucket]>,
    queue: VecDeque<Vec<u8>>,
    scan_index: usize,
}

impl FragPartition {
    fn new(
        worker: usize,
        cfg: FragCfg,
        identity: Arc<dyn WorkerIdentity>,
        log: Arc<dyn LogProvider>,
    ) -> Result<Self, FragInitError> {
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(cfg.buckets).map_err(|_| {
            FragInitError::NoMemory { what: "bucket table", worker }
        })?;
        buckets.resize_with(cfg.buckets, Bucket::default);

        let mut queue = VecDeque::new();
        queue.try_reserve_exact(cfg.queue_depth).map_err(|_| {
            FragInitError::NoMemory { what: "fragment queue", worker }
        })?;

        Ok(Self {
            worker,
            cfg,
            identity,
            log,
            buckets: buckets.into_boxed_slice(),
            queue,
            scan_index: 0,
        })
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// The number of datagrams being reassembled.
    pub fn entries(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    /// The number of packets waiting in the inbound queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The keys of the datagrams being reassembled.
    #[cfg(any(feature = "test-help", test))]
    pub fn pending_keys(&self) -> Vec<FragKey> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.key))
            .collect()
    }

    /// Queue a fragment for this worker.
    ///
    /// Only the worker which owns this partition may enqueue. On any
    /// error the packet is dropped; [`FragError::drop_reason`] says
    /// how to account for it.
    pub fn enqueue(&mut self, pkt: Vec<u8>) -> Result<(), FragError> {
        let current = self.identity.current_worker();
        if current != Some(self.worker) {
            let err = FragError::NotOwner { owner: self.worker, current };
            self.log.log(LogLevel::Error, &format!("dropping fragment: {err}"));
            return Err(err);
        }

        if self.queue.len() >= self.cfg.queue_depth {
            return Err(FragError::QueueFull(self.cfg.queue_depth));
        }

        self.queue.push_back(pkt);
        Ok(())
    }

    /// Assemble every queued packet, in arrival order, handing each
    /// completed datagram to `sink`. Returns the number completed.
    pub fn drain<F>(&mut self, now: Moment, mut sink: F) -> usize
    where
        F: FnMut(Vec<u8>),
    {
        let mut done = 0;
        while let Some(pkt) = self.queue.pop_front() {
            match self.assemble(&pkt, now) {
                Ok(Assembly::Complete(dgram)) => {
                    done += 1;
                    sink(dgram);
                }

                Ok(Assembly::Pending) => {}

                Err(e) => {
                    let msg = format!(
                        "worker {} dropping fragment ({}): {e}",
                        self.worker,
                        e.drop_reason()
                    );
                    self.log.log(LogLevel::Warn, &msg);
                }
            }
        }
        done
    }

    /// Add one fragment to its datagram.
    ///
    /// A malformed fragment, or one which pushes its datagram past
    /// the reassembly limits, also discards everything held for that
    /// datagram.
    pub fn assemble(
        &mut self,
        pkt: &[u8],
        now: Moment,
    ) -> Result<Assembly, FragError> {
        let info = locate_fragment(pkt)?;
        let idx = info.key.bucket_hash() as usize % self.buckets.len();
        let bucket = &mut self.buckets[idx];
        let found = bucket.entries.iter().position(|e| e.key == info.key);

        if let Err(e) = info.check_limits() {
            if let Some(pos) = found {
                bucket.entries.swap_remove(pos);
            }
            return Err(e);
        }

        let pos = match found {
            Some(pos) => pos,
            None => {
                bucket
                    .entries
                    .try_reserve(1)
                    .map_err(|_| FragError::NoMemory)?;
                bucket.entries.push(FragEntry::new(info.key, now));
                bucket.entries.len() - 1
            }
        };

        let entry = &mut bucket.entries[pos];
        if let Err(e) = entry.add(pkt, &info) {
            if e != FragError::NoMemory {
                bucket.entries.swap_remove(pos);
            }
            return Err(e);
        }

        if !entry.is_complete() {
            return Ok(Assembly::Pending);
        }

        let entry = bucket.entries.swap_remove(pos);
        entry.reassemble().map(Assembly::Complete)
    }

    /// Evict stale entries, visiting buckets from where the last
    /// scan stopped.
    ///
    /// The scan stops after the bucket which takes the number of
    /// fragments visited past the configured budget.
    pub fn scan_buckets(&mut self, now: Moment) -> ScanStats {
        let n = self.buckets.len();
        let start = self.scan_index;
        let ttl = self.cfg.stale_ttl;
        let mut stats = ScanStats::default();

        let mut j = 0;
        while j < n {
            let bucket = &mut self.buckets[(start + j) % n];
            j += 1;

            if !bucket.entries.is_empty() {
                let held: usize =
                    bucket.entries.iter().map(|e| e.pieces.len()).sum();
                stats.visited += held;
                let before = bucket.entries.len();
                bucket.entries.retain(|e| !ttl.is_expired(e.first_seen, now));
                stats.evicted += before - bucket.entries.len();
            }

            if stats.visited > self.cfg.scan_budget {
                break;
            }
        }

        self.scan_index = (start + j) % n;
        stats.next_index = self.scan_index;

        if stats.evicted > 0 {
            let msg = format!(
                "worker {} evicted {} stale datagram(s)",
                self.worker, stats.evicted
            );
            self.log.log(LogLevel::Note, &msg);
        }

        stats
    }
}

/// The fragment assembler: one partition per worker.
pub struct FragAssembler {
    cfg: FragCfg,
    partitions: Vec<FragPartition>,
}

impl FragAssembler {
    pub fn new(
        cfg: FragCfg,
        identity: Arc<dyn WorkerIdentity>,
        log: Arc<dyn LogProvider>,
    ) -> Result<Self, FragInitError> {
        if let Err(e) = cfg.validate() {
            log.log(LogLevel::Error, &format!("fragment assembler: {e}"));
            return Err(e.into());
        }

        let mut partitions = Vec::new();
        if partitions.try_reserve_exact(cfg.workers).is_err() {
            let err = FragInitError::NoMemory { what: "partitions", worker: 0 };
            log.log(LogLevel::Error, &format!("fragment assembler: {err}"));
            return Err(err);
        }

        for worker in 0..cfg.workers {
            let part = FragPartition::new(
                worker,
                cfg,
                identity.clone(),
                log.clone(),
            );

            match part {
                Ok(part) => partitions.push(part),
                Err(e) => {
                    let msg = format!("fragment assembler: {e}");
                    log.log(LogLevel::Error, &msg);
                    return Err(e);
                }
            }
        }

        Ok(Self { cfg, partitions })
    }

    pub fn cfg(&self) -> &FragCfg {
        &self.cfg
    }

    /// Hand each worker its own partition.
    pub fn partitions_mut(&mut self) -> &mut [FragPartition] {
        &mut self.partitions
    }

    pub fn partition_mut(
        &mut self,
        worker: usize,
    ) -> Option<&mut FragPartition> {
        self.partitions.get_mut(worker)
    }
}

impl Drop for FragAssembler {
    fn drop(&mut self) {
        // Queued packets go before the tables they would have been
        // assembled into.
        for part in self.partitions.iter_mut() {
            part.queue.clear();
        }

        for part in self.partitions.iter_mut() {
            part.buckets = Box::default();
        }
    }
}
