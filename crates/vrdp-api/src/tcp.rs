// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

pub const TCP_OPT_EOL: u8 = 0;
pub const TCP_OPT_NOP: u8 = 1;
pub const TCP_OPT_MSS: u8 = 2;
pub const TCP_OPT_MSS_LEN: u8 = 4;

bitflags! {
/// The control bits of a TCP header (byte 13).
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TcpFlags: u8 {
    const FIN = 1 << 0;
    const SYN = 1 << 1;
    const RST = 1 << 2;
    const PSH = 1 << 3;
    const ACK = 1 << 4;
    const URG = 1 << 5;
    const ECE = 1 << 6;
    const CWR = 1 << 7;
}
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn syn_ack_bits() {
        let flags = TcpFlags::from_bits_truncate(0x12);
        assert!(flags.contains(TcpFlags::SYN));
        assert!(flags.contains(TcpFlags::ACK));
        assert!(!flags.contains(TcpFlags::FIN));
    }
}
