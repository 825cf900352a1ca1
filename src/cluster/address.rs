//! Integer keys for `(IPv4 address, port)` pairs.
//!
//! Connections are deduplicated by an [`AddressKey`]: the four octets of a
//! dotted-quad address followed by the 16-bit port, packed into a `u64`.

use std::fmt;

/// Packs a dotted-quad IPv4 address and a port into one integer.
///
/// Returns 0 for an empty address, a zero port, or an address that is not
/// made of digits and exactly three dots. Octets are not range checked;
/// oversized octets carry into their neighbours and all arithmetic wraps
/// modulo 2^64.
///
/// # Examples
///
/// ```
/// use shardmux::cluster::address::encode_address;
///
/// assert_eq!(encode_address("10.0.0.5", 7000), 0x0A00_0005_1B58);
/// assert_eq!(encode_address("10.0.0", 7000), 0);
/// ```
pub fn encode_address(ip: &str, port: u16) -> u64 {
    if ip.is_empty() || port == 0 {
        return 0;
    }

    let mut result: u64 = 0;
    let mut octet: u64 = 0;
    let mut dots = 0;

    for c in ip.bytes() {
        match c {
            b'0'..=b'9' => {
                octet = octet.wrapping_mul(10).wrapping_add(u64::from(c - b'0'));
            }
            b'.' => {
                dots += 1;
                if dots > 3 {
                    return 0;
                }
                result = result.wrapping_mul(256).wrapping_add(octet);
                octet = 0;
            }
            _ => return 0,
        }
    }

    if dots != 3 {
        return 0;
    }

    result
        .wrapping_mul(256)
        .wrapping_add(octet)
        .wrapping_mul(65536)
        .wrapping_add(u64::from(port))
}

/// A connection identity derived from `(IPv4 address, port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey(u64);

impl AddressKey {
    /// Encodes an address, returning `None` where [`encode_address`]
    /// yields the zero sentinel.
    pub fn new(ip: &str, port: u16) -> Option<Self> {
        match encode_address(ip, port) {
            0 => None,
            key => Some(Self(key)),
        }
    }

    /// Returns the packed integer.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the port stored in the low 16 bits.
    pub fn port(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_boundaries() {
        assert_eq!(encode_address("255.255.255.255", 65535), 0xFFFF_FFFF_FFFF);
        assert_eq!(encode_address("0.0.0.0", 65535), 65535);
        assert_eq!(encode_address("0.0.0.0", 1), 1);
        assert_eq!(encode_address("127.0.0.1", 7000), 0x7F00_0001_1B58);
    }

    #[test]
    fn test_encode_rejects_malformed() {
        assert_eq!(encode_address("", 7000), 0);
        assert_eq!(encode_address("10.0.0.5", 0), 0);
        assert_eq!(encode_address("1.2.3", 7000), 0);
        assert_eq!(encode_address("1.2.3.4.", 7000), 0);
        assert_eq!(encode_address("1.2.3.4.5", 7000), 0);
        assert_eq!(encode_address("a.b.c.d", 7000), 0);
        assert_eq!(encode_address("10.0.0.5:7000", 7000), 0);
        assert_eq!(encode_address(" 10.0.0.5", 7000), 0);
    }

    #[test]
    fn test_encode_oversized_octet_carries() {
        // 0.0.1.0 and 0.0.0.256 pack to the same value.
        assert_eq!(
            encode_address("0.0.0.256", 1),
            encode_address("0.0.1.0", 1)
        );
        assert_ne!(encode_address("0.0.0.256", 1), 0);
    }

    #[test]
    fn test_encode_wraps_instead_of_panicking() {
        let huge = "99999999999999999999.0.0.0";
        let _ = encode_address(huge, 7000);
    }

    #[test]
    fn test_distinct_pairs() {
        let a = encode_address("10.0.0.5", 7000);
        let b = encode_address("10.0.0.5", 7001);
        let c = encode_address("10.0.0.6", 7000);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_address_key() {
        let key = AddressKey::new("10.0.0.5", 7000).unwrap();
        assert_eq!(key.as_u64(), encode_address("10.0.0.5", 7000));
        assert_eq!(key.port(), 7000);
        assert_eq!(key.to_string(), "0x0a0000051b58");
        assert!(AddressKey::new("0.0.0.0", 0).is_none());
        assert!(AddressKey::new("localhost", 7000).is_none());
    }
}
