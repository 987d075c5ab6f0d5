//! IPv4 addressing and static routing

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Transport five-tuple used to classify flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiveTuple {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

impl FiveTuple {
    /// The tuple of traffic flowing the other way.
    pub fn reversed(&self) -> Self {
        Self {
            source_address: self.destination_address,
            destination_address: self.source_address,
            protocol: self.protocol,
            source_port: self.destination_port,
            destination_port: self.source_port,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.source_address,
            self.source_port,
            self.destination_address,
            self.destination_port,
            self.protocol
        )
    }
}

pub fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - p),
    }
}

pub fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, prefix_len: u8) -> bool {
    let mask = prefix_mask(prefix_len);
    u32::from(a) & mask == u32::from(b) & mask
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub device: u32,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
    pub device: u32,
}

/// Result of a route lookup: the outgoing device and the neighbour to hand
/// the packet to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NextHop {
    pub device: u32,
    pub address: Ipv4Addr,
}

#[derive(Clone, Debug, Default)]
pub struct Ipv4Stack {
    addresses: Vec<InterfaceAddress>,
    routes: Vec<Route>,
}

impl Ipv4Stack {
    pub fn add_address(&mut self, device: u32, address: Ipv4Addr, prefix_len: u8) {
        self.addresses.push(InterfaceAddress {
            device,
            address,
            prefix_len,
        });
    }

    pub fn addresses(&self) -> &[InterfaceAddress] {
        &self.addresses
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn owns(&self, address: Ipv4Addr) -> bool {
        self.addresses.iter().any(|a| a.address == address)
    }

    pub fn address_for_device(&self, device: u32) -> Option<Ipv4Addr> {
        self.addresses
            .iter()
            .find(|a| a.device == device)
            .map(|a| a.address)
    }

    /// Device whose connected subnet contains `address`.
    fn connected_device(&self, address: Ipv4Addr) -> Option<u32> {
        self.addresses
            .iter()
            .filter(|a| same_subnet(a.address, address, a.prefix_len))
            .max_by_key(|a| a.prefix_len)
            .map(|a| a.device)
    }

    /// Install a route towards `destination/prefix_len` via `gateway`. The
    /// outgoing device is the one whose subnet contains the gateway.
    pub fn add_route(&mut self, destination: Ipv4Addr, prefix_len: u8, gateway: Ipv4Addr) -> Result<()> {
        let device = self.connected_device(gateway).ok_or_else(|| {
            EngineError::InvalidParameter(format!("gateway {} is not on a connected subnet", gateway))
        })?;
        let network = Ipv4Addr::from(u32::from(destination) & prefix_mask(prefix_len));
        self.routes
            .retain(|r| !(r.destination == network && r.prefix_len == prefix_len));
        self.routes.push(Route {
            destination: network,
            prefix_len,
            gateway,
            device,
        });
        Ok(())
    }

    pub fn add_host_route(&mut self, destination: Ipv4Addr, gateway: Ipv4Addr) -> Result<()> {
        self.add_route(destination, 32, gateway)
    }

    pub fn set_default_route(&mut self, gateway: Ipv4Addr) -> Result<()> {
        self.add_route(Ipv4Addr::UNSPECIFIED, 0, gateway)
    }

    /// Longest-prefix match over connected subnets and static routes.
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<NextHop> {
        let connected = self
            .addresses
            .iter()
            .filter(|a| same_subnet(a.address, destination, a.prefix_len))
            .map(|a| {
                (
                    a.prefix_len,
                    NextHop {
                        device: a.device,
                        address: destination,
                    },
                )
            });
        let routed = self
            .routes
            .iter()
            .filter(|r| same_subnet(r.destination, destination, r.prefix_len))
            .map(|r| {
                (
                    r.prefix_len,
                    NextHop {
                        device: r.device,
                        address: r.gateway,
                    },
                )
            });

        // Connected entries come first so they win prefix ties
        let mut best: Option<(u8, NextHop)> = None;
        for (prefix_len, hop) in connected.chain(routed) {
            if best.map_or(true, |(p, _)| prefix_len > p) {
                best = Some((prefix_len, hop));
            }
        }
        best.map(|(_, hop)| hop)
    }
}

/// Sequential allocator over a network, in the style of an address helper:
/// hosts are handed out from `.1` upward and `new_network` advances to the
/// next network of the same size.
#[derive(Clone, Debug)]
pub struct Ipv4AddressHelper {
    network: u32,
    prefix_len: u8,
    next_host: u32,
}

impl Ipv4AddressHelper {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            network: u32::from(network) & prefix_mask(prefix_len),
            prefix_len,
            next_host: 1,
        }
    }

    /// Start allocating at a later host number, e.g. to skip a gateway.
    pub fn with_first_host(mut self, host: u32) -> Self {
        self.next_host = host;
        self
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let host_bits = 32 - u32::from(self.prefix_len);
        let broadcast = if host_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << host_bits) - 1
        };
        if self.next_host >= broadcast {
            return Err(EngineError::AddressPoolExhausted(format!(
                "{}/{}",
                self.network(),
                self.prefix_len
            )));
        }
        let address = Ipv4Addr::from(self.network | self.next_host);
        self.next_host += 1;
        Ok(address)
    }

    pub fn new_network(&mut self) {
        let step = 1u32 << (32 - u32::from(self.prefix_len)).min(31);
        self.network = self.network.wrapping_add(step);
        self.next_host = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_reversed_tuple() {
        let t = FiveTuple {
            source_address: ip("1.0.0.1"),
            destination_address: ip("7.0.0.2"),
            protocol: PROTO_TCP,
            source_port: 49153,
            destination_port: 50000,
        };
        let r = t.reversed();
        assert_eq!(r.source_address, ip("7.0.0.2"));
        assert_eq!(r.destination_port, 49153);
        assert_eq!(r.reversed(), t);
    }

    #[test]
    fn test_helper_allocates_sequentially() {
        let mut helper = Ipv4AddressHelper::new(ip("11.0.0.0"), 16);
        assert_eq!(helper.allocate().unwrap(), ip("11.0.0.1"));
        assert_eq!(helper.allocate().unwrap(), ip("11.0.0.2"));
        helper.new_network();
        assert_eq!(helper.allocate().unwrap(), ip("11.1.0.1"));
    }

    #[test]
    fn test_helper_exhaustion() {
        let mut helper = Ipv4AddressHelper::new(ip("10.0.0.0"), 30);
        helper.allocate().unwrap();
        helper.allocate().unwrap();
        assert!(matches!(
            helper.allocate(),
            Err(EngineError::AddressPoolExhausted(_))
        ));
    }

    #[test]
    fn test_longest_prefix_match() {
        let mut stack = Ipv4Stack::default();
        stack.add_address(0, ip("1.0.0.1"), 8);
        stack.add_address(1, ip("11.0.0.1"), 16);
        stack.add_route(ip("7.0.0.0"), 8, ip("1.0.0.2")).unwrap();
        stack.add_host_route(ip("17.0.0.2"), ip("11.0.0.2")).unwrap();

        let hop = stack.lookup(ip("7.0.0.5")).unwrap();
        assert_eq!(hop, NextHop { device: 0, address: ip("1.0.0.2") });

        let hop = stack.lookup(ip("17.0.0.2")).unwrap();
        assert_eq!(hop, NextHop { device: 1, address: ip("11.0.0.2") });

        let hop = stack.lookup(ip("1.0.0.2")).unwrap();
        assert_eq!(hop, NextHop { device: 0, address: ip("1.0.0.2") });

        assert!(stack.lookup(ip("17.0.0.3")).is_none());
    }

    #[test]
    fn test_default_route_requires_connected_gateway() {
        let mut stack = Ipv4Stack::default();
        stack.add_address(2, ip("7.0.0.2"), 8);
        assert!(stack.set_default_route(ip("9.9.9.9")).is_err());
        stack.set_default_route(ip("7.0.0.1")).unwrap();
        let hop = stack.lookup(ip("1.0.0.1")).unwrap();
        assert_eq!(hop, NextHop { device: 2, address: ip("7.0.0.1") });
    }
}
