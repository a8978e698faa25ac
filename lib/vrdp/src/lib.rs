// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet classification, tunnel decoding and fragment
//! reassembly core of a virtual-router dataplane.
//!
//! Every parser in here reads through [`engine::cursor::HdrCursor`],
//! which refuses to look past the contiguous part of a buffer. A
//! short buffer is never an error: it is a request to come back on
//! the slow path with more of the packet pulled up.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub mod cfg;
pub mod engine;
pub mod provider;
pub mod time;

pub use vrdp_api as api;
