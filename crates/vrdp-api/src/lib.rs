// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Value types shared between the vrdp engine and its callers.
//!
//! Nothing in here parses packets. These are the addresses,
//! protocol numbers, encapsulation descriptors and drop reasons
//! that flow in and out of the engine's operations.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod drop;
pub mod encap;
pub mod ip;
pub mod mac;
pub mod tcp;

pub use drop::*;
pub use encap::*;
pub use ip::*;
pub use mac::*;
pub use tcp::*;
