// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The engine in vrdp.
//!
//! The leaf is the header cursor; the classifier and tunnel decoder
//! are built on it, and the fragment engine feeds reassembled
//! datagrams back into the classifier.

pub mod checksum;
pub mod classify;
pub mod cursor;
pub mod flow;
pub mod frag;
pub mod headers;
pub mod tcp;
pub mod tunnel;

pub use classify::Classified;
pub use classify::Classifier;
pub use classify::TransportKind;
pub use classify::Verdict;
pub use classify::classify;
pub use cursor::HdrCursor;
pub use flow::FlowKey;
pub use flow::flow_hash;
pub use frag::Assembly;
pub use frag::FragAssembler;
pub use frag::FragPartition;
pub use tcp::adjust_tcp_mss;
pub use tunnel::TunnelResult;
pub use tunnel::decode_tunnel;
