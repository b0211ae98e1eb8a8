use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Address family, kept distinct from `std::net`'s so the wire layout used
/// for hashing is explicit rather than inherited from `SocketAddr`'s own
/// (unspecified) `Hash` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// A peer address: family, port, and raw IP bytes.
///
/// Equality and hashing are defined over exactly these fields and nothing
/// else -- no padding, no `SocketAddr` flow info -- so that two addresses
/// that the wire protocol considers identical always land in the same
/// bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    family: Family,
    port: u16,
    ip: [u8; 16],
}

impl Address {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => {
                let mut ip = [0u8; 16];
                ip[..4].copy_from_slice(&v4.ip().octets());
                Address {
                    family: Family::V4,
                    port: v4.port(),
                    ip,
                }
            }
            SocketAddr::V6(v6) => Address {
                family: Family::V6,
                port: v6.port(),
                ip: v6.ip().octets(),
            },
        }
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        match self.family {
            Family::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.ip[..4]);
                SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), self.port)
            }
            Family::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.ip)), self.port),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::from_socket_addr(addr)
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.to_socket_addr()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

/// Hashes exactly (family, port little-endian, ip-bytes), matching the byte
/// layout the peer table is keyed on. Deliberately avoids `Hasher::write_u16`
/// and friends, whose default implementations use native-endian order.
impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let family_tag: u8 = match self.family {
            Family::V4 => 4,
            Family::V6 => 6,
        };
        state.write(&[family_tag]);
        state.write(&self.port.to_le_bytes());
        match self.family {
            Family::V4 => state.write(&self.ip[..4]),
            Family::V6 => state.write(&self.ip[..16]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fnv::FnvBuildHasher;
    use std::hash::BuildHasher;

    fn hash_of(addr: Address) -> u64 {
        let build = FnvBuildHasher::default();
        let mut hasher = build.build_hasher();
        addr.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn v4_roundtrip() {
        let sa: SocketAddr = "127.0.0.1:9034".parse().unwrap();
        let addr = Address::from_socket_addr(sa);
        assert_eq!(addr.to_socket_addr(), sa);
    }

    #[test]
    fn equal_addresses_hash_equal() {
        let a = Address::from_socket_addr("10.0.0.1:1234".parse().unwrap());
        let b = Address::from_socket_addr("10.0.0.1:1234".parse().unwrap());
        assert_eq!(a, b);
        assert_eq!(hash_of(a), hash_of(b));
    }

    #[test]
    fn different_ports_hash_differently() {
        let a = Address::from_socket_addr("10.0.0.1:1234".parse().unwrap());
        let b = Address::from_socket_addr("10.0.0.1:1235".parse().unwrap());
        assert_ne!(hash_of(a), hash_of(b));
    }
}
