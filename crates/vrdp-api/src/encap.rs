// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// UDP destination ports which carry MPLS.
pub const MPLS_UDP_PORTS: [u16; 2] = [6635, 51234];

/// The UDP destination port which carries VXLAN.
pub const VXLAN_UDP_PORT: u16 = 4789;

/// The GRE protocol value which carries MPLS.
pub const GRE_PROTO_MPLS: u16 = 0x8847;

/// Return `true` if `port` is one of the MPLS-over-UDP ports.
pub fn is_mpls_udp_port(port: u16) -> bool {
    MPLS_UDP_PORTS.contains(&port)
}

/// The outer encapsulation of a tunnelled packet.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Encap {
    Mpls,
    Vxlan,
}

impl Display for Encap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Mpls => write!(f, "MPLS"),
            Self::Vxlan => write!(f, "VXLAN"),
        }
    }
}

/// What a tunnel carries once the encapsulation has been removed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum InnerKind {
    /// An IP packet with no Ethernet framing.
    L3,
    /// An Ethernet frame.
    L2Unicast,
    /// An Ethernet frame wrapped in a control word and a VXLAN envelope.
    L2Multicast,
    /// An Ethernet frame preceded by a control word.
    L2ControlData,
}

/// The answer of a tunnel classification collaborator for a given
/// MPLS label and control word.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TunnelClass {
    Reject,
    L3,
    L2Unicast,
    L2Multicast,
    L2ControlData,
}

impl TunnelClass {
    /// The inner kind for an accepted classification.
    pub const fn inner_kind(self) -> Option<InnerKind> {
        match self {
            Self::Reject => None,
            Self::L3 => Some(InnerKind::L3),
            Self::L2Unicast => Some(InnerKind::L2Unicast),
            Self::L2Multicast => Some(InnerKind::L2Multicast),
            Self::L2ControlData => Some(InnerKind::L2ControlData),
        }
    }
}

/// A VXLAN Network Identifier.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Vni {
    inner: u32,
}

impl Vni {
    const MAX: u32 = (1 << 24) - 1;

    pub fn new<N: Into<u32>>(val: N) -> Result<Self, String> {
        let val = val.into();
        if val > Self::MAX {
            return Err(format!("VNI value exceeds maximum: {val}"));
        }

        Ok(Self { inner: val })
    }

    /// Return the three network-order bytes of the VNI.
    pub fn bytes(&self) -> [u8; 3] {
        let b = self.inner.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> u32 {
        vni.inner
    }
}

impl Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}
