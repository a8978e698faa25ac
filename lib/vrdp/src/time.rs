// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments and TTLs.
//!
//! The engine never reads a clock itself. Callers pass `now` into
//! every operation that ages state, which keeps the fragment scan
//! deterministic under test.

use core::ops::Add;
use core::time::Duration;
use serde::Deserialize;
use serde::Serialize;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;
/// The conversion from nanoseconds to milliseconds.
pub const NANOS_TO_MILLIS: u64 = NANOS / MILLIS;

/// A moment in time, with millisecond resolution, measured from an
/// arbitrary fixed epoch.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    millis: u64,
}

impl Moment {
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Compute the delta between `self - earlier` as milliseconds.
    ///
    /// A moment from the future yields zero rather than wrapping.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.millis.saturating_sub(earlier.millis)
    }

    /// Read the monotonic clock.
    #[cfg(feature = "std")]
    pub fn now() -> Self {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        let delta = epoch.elapsed();
        Self {
            millis: delta.as_secs() * MILLIS + u64::from(delta.subsec_millis()),
        }
    }
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let ms = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Moment { millis: self.millis.saturating_add(ms) }
    }
}

/// The Time To Live in milliseconds.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Ttl(u64);

impl Ttl {
    pub fn as_seconds(&self) -> u64 {
        self.0 / MILLIS
    }

    pub fn as_milliseconds(&self) -> u64 {
        self.0
    }

    /// Is something that started at `earlier` expired?
    pub fn is_expired(&self, earlier: Moment, now: Moment) -> bool {
        now.delta_as_millis(earlier) >= self.0
    }

    /// Create a new TTL based on seconds.
    pub const fn new_seconds(seconds: u64) -> Self {
        Ttl(seconds * MILLIS)
    }

    pub const fn new_millis(millis: u64) -> Self {
        Ttl(millis)
    }
}
