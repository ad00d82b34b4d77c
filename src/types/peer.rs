use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// Fixed-width link address identifying a node.
///
/// Six bytes, the width of a radio MAC address. Hosts running over UDP
/// pack an IPv4 socket address into the same space (see
/// [`PeerId::from_socket_addr`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerId([u8; 6]);

impl PeerId {
    /// Width of the address in bytes.
    pub const LEN: usize = 6;

    /// Broadcast address.
    pub const BROADCAST: Self = Self([0xFF; 6]);

    /// Create from raw address bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Pack an IPv4 socket address: four address octets then the port, big-endian.
    ///
    /// Returns `None` for IPv6 addresses.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => {
                let mut bytes = [0u8; 6];
                bytes[..4].copy_from_slice(&v4.ip().octets());
                bytes[4..].copy_from_slice(&v4.port().to_be_bytes());
                Some(Self(bytes))
            }
            SocketAddr::V6(_) => None,
        }
    }

    /// Inverse of [`PeerId::from_socket_addr`].
    #[must_use]
    pub fn to_socket_addr(&self) -> SocketAddr {
        let [a, b, c, d, p0, p1] = self.0;
        SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(a, b, c, d),
            u16::from_be_bytes([p0, p1]),
        ))
    }
}

impl From<[u8; 6]> for PeerId {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Error parsing a `PeerId` from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer address: {0}")]
pub struct ParsePeerIdError(String);

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    /// Parse `AA:BB:CC:DD:EE:FF` (colon or dash separated, case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in &mut bytes {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParsePeerIdError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParsePeerIdError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParsePeerIdError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}
