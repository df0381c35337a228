// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locators: where a remote endpoint can be reached.
//!
//! The reliability core treats locators as opaque `(kind, port, address)`
//! tuples handed to the transport; only the conversions below look inside.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const LOCATOR_KIND_INVALID: i32 = -1;
pub const LOCATOR_KIND_RESERVED: i32 = 0;
pub const LOCATOR_KIND_UDPV4: i32 = 1;
pub const LOCATOR_KIND_UDPV6: i32 = 2;
pub const LOCATOR_PORT_INVALID: u32 = 0;

/// RTPS Locator_t (24 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    /// IPv4 addresses occupy the last 4 bytes.
    pub address: [u8; 16],
}

impl Locator {
    pub const INVALID: Locator = Locator {
        kind: LOCATOR_KIND_INVALID,
        port: LOCATOR_PORT_INVALID,
        address: [0; 16],
    };

    pub fn udpv4(ip: [u8; 4], port: u32) -> Self {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&ip);
        Self {
            kind: LOCATOR_KIND_UDPV4,
            port,
            address,
        }
    }

    pub fn udpv6(ip: [u8; 16], port: u32) -> Self {
        Self {
            kind: LOCATOR_KIND_UDPV6,
            port,
            address: ip,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind >= 0 && self.port != LOCATOR_PORT_INVALID
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match self.kind {
            LOCATOR_KIND_UDPV4 => {
                let ip = Ipv4Addr::new(
                    self.address[12],
                    self.address[13],
                    self.address[14],
                    self.address[15],
                );
                Some(SocketAddr::new(IpAddr::V4(ip), port))
            }
            LOCATOR_KIND_UDPV6 => Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.address)), port)),
            _ => None,
        }
    }
}

impl From<SocketAddr> for Locator {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Locator::udpv4(v4.ip().octets(), u32::from(v4.port())),
            SocketAddr::V6(v6) => Locator::udpv6(v6.ip().octets(), u32::from(v6.port())),
        }
    }
}

impl Default for Locator {
    fn default() -> Self {
        Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_mapped_to_last_bytes() {
        let addr: SocketAddr = "192.168.1.100:7410".parse().expect("valid addr");
        let locator = Locator::from(addr);
        assert_eq!(locator.kind, LOCATOR_KIND_UDPV4);
        assert_eq!(locator.port, 7410);
        assert_eq!(&locator.address[..12], &[0u8; 12]);
        assert_eq!(&locator.address[12..], &[192, 168, 1, 100]);
        assert_eq!(locator.to_socket_addr(), Some(addr));
    }

    #[test]
    fn test_ipv6_roundtrip() {
        let addr: SocketAddr = "[fe80::1]:7400".parse().expect("valid addr");
        let locator = Locator::from(addr);
        assert_eq!(locator.kind, LOCATOR_KIND_UDPV6);
        assert_eq!(locator.to_socket_addr(), Some(addr));
    }

    #[test]
    fn test_invalid_locator() {
        assert!(!Locator::INVALID.is_valid());
        assert_eq!(Locator::INVALID.to_socket_addr(), None);
        assert!(Locator::udpv4([127, 0, 0, 1], 7400).is_valid());
    }
}
