// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine configuration.
//!
//! Everything in here is fixed when the engine is built. There is no
//! way to change a bucket count or a TTL on a running assembler.

use crate::time::Ttl;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const FRAG_DEF_WORKERS: usize = 1;
pub const FRAG_DEF_BUCKETS: usize = 1024;
pub const FRAG_DEF_SCAN_BUDGET: usize = 1024;
pub const FRAG_DEF_QUEUE_DEPTH: usize = 256;
pub const FRAG_DEF_STALE_SECS: u64 = 5;
pub const FRAG_DEF_STALE_TTL: Ttl = Ttl::new_seconds(FRAG_DEF_STALE_SECS);

/// The largest bucket table a single worker may ask for.
pub const FRAG_MAX_BUCKETS: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum CfgError {
    #[cfg(feature = "std")]
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("bucket count {0} exceeds maximum of {FRAG_MAX_BUCKETS}")]
    TooManyBuckets(usize),
}

/// Fragment reassembly engine configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FragCfg {
    /// The number of forwarding workers, one partition each.
    pub workers: usize,
    /// Buckets per worker.
    pub buckets: usize,
    /// Fragments visited per call to `scan_buckets`.
    pub scan_budget: usize,
    /// Packets a worker's inbound queue holds before refusing more.
    pub queue_depth: usize,
    /// Age, from first arrival, after which an incomplete datagram
    /// is evicted.
    pub stale_ttl: Ttl,
}

impl Default for FragCfg {
    fn default() -> Self {
        Self {
            workers: FRAG_DEF_WORKERS,
            buckets: FRAG_DEF_BUCKETS,
            scan_budget: FRAG_DEF_SCAN_BUDGET,
            queue_depth: FRAG_DEF_QUEUE_DEPTH,
            stale_ttl: FRAG_DEF_STALE_TTL,
        }
    }
}

impl FragCfg {
    pub fn validate(&self) -> Result<(), CfgError> {
        if self.workers == 0 {
            return Err(CfgError::Zero("workers"));
        }

        if self.buckets == 0 {
            return Err(CfgError::Zero("buckets"));
        }

        if self.buckets > FRAG_MAX_BUCKETS {
            return Err(CfgError::TooManyBuckets(self.buckets));
        }

        if self.scan_budget == 0 {
            return Err(CfgError::Zero("scan_budget"));
        }

        if self.queue_depth == 0 {
            return Err(CfgError::Zero("queue_depth"));
        }

        Ok(())
    }
}

/// Classifier configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ClassifyCfg {
    /// Clamp the MSS of TCP SYNs. When set, a SYN without a clamp
    /// hook goes to the slow path.
    pub mss_adjust: bool,
}

impl Default for ClassifyCfg {
    fn default() -> Self {
        Self { mss_adjust: true }
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(default)]
pub struct VrdpCfg {
    pub frag: FragCfg,
    pub classify: ClassifyCfg,
}

impl VrdpCfg {
    pub fn validate(&self) -> Result<(), CfgError> {
        self.frag.validate()
    }

    /// Parse and validate a configuration written in RON. Fields left
    /// out take their defaults.
    #[cfg(feature = "std")]
    pub fn from_ron(s: &str) -> Result<Self, CfgError> {
        let cfg: Self = ron::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}
