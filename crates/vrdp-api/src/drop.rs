// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Why the engine refused to carry a packet any further.
///
/// The caller frees the packet and feeds the reason into whatever
/// accounting it keeps.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum DropReason {
    /// A fragment could not be queued or stored.
    Fragments,
    /// A runtime allocation failed.
    NoMemory,
    /// The packet was recognised but its headers are inconsistent.
    Malformed,
    Misc,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Fragments => "fragments",
            Self::NoMemory => "no memory",
            Self::Malformed => "malformed",
            Self::Misc => "misc",
        };
        write!(f, "{s}")
    }
}
