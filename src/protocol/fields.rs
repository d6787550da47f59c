//! Field encodings shared by requests and responses
// (c) 2024 the OpenSPA developers

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{Error, Result};

/// Size of the random nonce carried in every PDU
pub const NONCE_SIZE: usize = 3;

/// Random per-PDU nonce
pub type Nonce = [u8; NONCE_SIZE];

/// Generates a nonce from the OS CSPRNG
#[must_use]
pub fn generate_nonce() -> Nonce {
    let mut nonce = Nonce::default();
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// The IANA protocol numbers a grant can be made for.
///
/// See <https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml>
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[strum(ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
#[repr(u8)]
pub enum Protocol {
    /// Internet Control Message Protocol
    #[strum(serialize = "ICMP")]
    #[value(name = "icmp")]
    Icmp = 1,
    /// IP in IP encapsulation
    #[strum(serialize = "IPv4")]
    #[value(name = "ipv4")]
    Ipv4 = 4,
    /// Transmission Control Protocol
    #[strum(serialize = "TCP")]
    #[value(name = "tcp")]
    Tcp = 6,
    /// User Datagram Protocol
    #[strum(serialize = "UDP")]
    #[value(name = "udp")]
    Udp = 17,
    /// ICMP for IPv6
    #[strum(serialize = "ICMPv6")]
    #[value(name = "icmpv6")]
    Icmpv6 = 58,
}

impl Protocol {
    /// Whether this protocol addresses ports at all.
    /// Ports are mandatory (non-zero) for these; otherwise they may be zero and are ignored.
    #[must_use]
    pub fn ports_required(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }

    /// Wire representation
    #[must_use]
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Protocol {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        use strum::VariantArray as _;
        Protocol::VARIANTS
            .iter()
            .find(|p| p.number() == value)
            .copied()
            .ok_or_else(|| Error::invalid_field("protocol", format!("unsupported protocol {value}")))
    }
}

impl TryFrom<String> for Protocol {
    type Error = strum::ParseError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Protocol::from_str(&value)
    }
}

impl From<Protocol> for String {
    fn from(value: Protocol) -> Self {
        value.to_string()
    }
}

/// Checks the port invariants for a protocol.
///
/// For TCP and UDP both ports must be non-zero and `start <= end`.
/// Other protocols ignore ports, so anything goes.
pub fn validate_ports(protocol: Protocol, start: u16, end: u16) -> Result<()> {
    if !protocol.ports_required() {
        return Ok(());
    }
    if start == 0 {
        return Err(Error::invalid_field(
            "start port",
            format!("port 0 is not valid for {protocol}"),
        ));
    }
    if end == 0 {
        return Err(Error::invalid_field(
            "end port",
            format!("port 0 is not valid for {protocol}"),
        ));
    }
    if start > end {
        return Err(Error::invalid_field(
            "end port",
            format!("end port {end} precedes start port {start}"),
        ));
    }
    Ok(())
}

// FIXED-WIDTH HELPERS ///////////////////////////////////////////////////////////////////////////

/// Takes exactly N bytes from the front of `data`
pub(crate) fn take<const N: usize>(data: &[u8], what: &'static str) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|b| <[u8; N]>::try_from(b).ok())
        .ok_or_else(|| Error::too_short(what, N, data.len()))
}

/// Requires a value to be exactly N bytes
pub(crate) fn exact<const N: usize>(data: &[u8], what: &'static str) -> Result<[u8; N]> {
    <[u8; N]>::try_from(data).map_err(|_| {
        Error::InvalidBytes(format!("{what}: need exactly {N} bytes, got {}", data.len()))
    })
}

/// Unix timestamp, seconds, big-endian signed 64-bit
#[must_use]
pub fn encode_timestamp(t: i64) -> [u8; 8] {
    t.to_be_bytes()
}

/// Inverse of [`encode_timestamp`]
pub fn decode_timestamp(data: &[u8]) -> Result<i64> {
    Ok(i64::from_be_bytes(exact::<8>(data, "timestamp")?))
}

/// Big-endian u16
#[must_use]
pub fn encode_port(p: u16) -> [u8; 2] {
    p.to_be_bytes()
}

/// Inverse of [`encode_port`]
pub fn decode_port(data: &[u8]) -> Result<u16> {
    Ok(u16::from_be_bytes(exact::<2>(data, "port")?))
}

/// Parses a device identifier, with or without dashes, into its 16 binary bytes
pub fn encode_uuid(s: &str) -> Result<[u8; 16]> {
    let u = Uuid::try_parse(s.trim())
        .map_err(|e| Error::invalid_field("device id", format!("{s:?} is not a UUID: {e}")))?;
    Ok(*u.as_bytes())
}

/// Formats 16 binary bytes as a canonical dashed lowercase UUID
pub fn decode_uuid(data: &[u8]) -> Result<String> {
    let b = exact::<16>(data, "device id")?;
    Ok(Uuid::from_bytes(b).hyphenated().to_string())
}

/// 16-byte IP encoding: IPv6 as-is, IPv4 as the mapped address `::ffff:a.b.c.d`
#[must_use]
pub fn encode_ip(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Inverse of [`encode_ip`]. Mapped addresses come back as IPv4.
pub fn decode_ip(data: &[u8]) -> Result<IpAddr> {
    let b = exact::<16>(data, "ip address")?;
    let v6 = Ipv6Addr::from(b);
    Ok(match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    })
}

/// 4-byte IPv4 encoding (container entries)
pub fn decode_ipv4(data: &[u8]) -> Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(exact::<4>(data, "ipv4 address")?))
}

/// 16-byte IPv6 encoding (container entries)
pub fn decode_ipv6(data: &[u8]) -> Result<Ipv6Addr> {
    Ok(Ipv6Addr::from(exact::<16>(data, "ipv6 address")?))
}

/// Minimal big-endian unsigned integer, 1 to 4 bytes
#[must_use]
pub fn encode_varint(v: u32) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Inverse of [`encode_varint`]. Non-minimal encodings are tolerated.
pub fn decode_varint(data: &[u8]) -> Result<u32> {
    if data.is_empty() || data.len() > 4 {
        return Err(Error::InvalidBytes(format!(
            "varint: need 1 to 4 bytes, got {}",
            data.len()
        )));
    }
    Ok(data.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

#[cfg(test)]
mod test {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn protocol_numbers() {
        for (n, p) in [
            (1u8, Protocol::Icmp),
            (4, Protocol::Ipv4),
            (6, Protocol::Tcp),
            (17, Protocol::Udp),
            (58, Protocol::Icmpv6),
        ] {
            assert_eq!(Protocol::try_from(n).unwrap(), p);
            assert_eq!(p.number(), n);
        }
        assert!(Protocol::try_from(0u8).is_err());
        assert!(Protocol::try_from(41u8).is_err());
    }

    #[test]
    fn protocol_strings() {
        assert_eq!(Protocol::from_str("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::from_str("IcmPv6").unwrap(), Protocol::Icmpv6);
        assert_eq!(Protocol::Udp.to_string(), "UDP");
        assert!(Protocol::from_str("sctp").is_err());
        let j = serde_json::to_string(&Protocol::Icmp).unwrap();
        assert_eq!(j, "\"ICMP\"");
        let p: Protocol = serde_json::from_str("\"udp\"").unwrap();
        assert_eq!(p, Protocol::Udp);
    }

    #[test]
    fn port_rules() {
        validate_ports(Protocol::Tcp, 80, 80).unwrap();
        validate_ports(Protocol::Udp, 1, 65535).unwrap();
        validate_ports(Protocol::Icmp, 0, 0).unwrap();
        validate_ports(Protocol::Icmpv6, 0, 0).unwrap();
        validate_ports(Protocol::Ipv4, 12, 3).unwrap();
        assert!(matches!(
            validate_ports(Protocol::Udp, 0, 10),
            Err(Error::InvalidField { .. })
        ));
        assert!(matches!(
            validate_ports(Protocol::Tcp, 10, 0),
            Err(Error::InvalidField { .. })
        ));
        assert!(matches!(
            validate_ports(Protocol::Tcp, 10, 9),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn timestamps() {
        for t in [0, 1, -1, 1_700_000_000, i64::MIN, i64::MAX] {
            assert_eq!(decode_timestamp(&encode_timestamp(t)).unwrap(), t);
        }
        assert_eq!(
            encode_timestamp(0x0102_0304_0506_0708),
            [1, 2, 3, 4, 5, 6, 7, 8]
        );
        assert!(decode_timestamp(&[0; 7]).is_err());
    }

    #[test]
    fn ports() {
        for p in [0u16, 1, 80, 443, 0x1234, u16::MAX] {
            assert_eq!(decode_port(&encode_port(p)).unwrap(), p);
        }
        assert_eq!(encode_port(0x1234), [0x12, 0x34]);
        for _ in 0..1000 {
            let p = fastrand::u16(..);
            assert_eq!(decode_port(&encode_port(p)).unwrap(), p);
        }
    }

    #[test]
    fn uuids() {
        let dashed = "8f97e69c-1bb1-4d2f-8cb0-24f2e874254d";
        let dashless = "8f97e69c1bb14d2f8cb024f2e874254d";
        let a = encode_uuid(dashed).unwrap();
        let b = encode_uuid(dashless).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], 0x8f);
        assert_eq!(a[15], 0x4d);
        assert_eq!(decode_uuid(&a).unwrap(), dashed);
        assert_eq!(decode_uuid(&b).unwrap(), dashed);

        let upper = "8F97E69C-1BB1-4D2F-8CB0-24F2E874254D";
        assert_eq!(decode_uuid(&encode_uuid(upper).unwrap()).unwrap(), dashed);

        assert!(encode_uuid("not-a-uuid").is_err());
        assert!(decode_uuid(&[0; 15]).is_err());
    }

    #[test]
    fn ipv4_mapped() {
        let wire = encode_ip(ip("1.2.3.4"));
        assert_eq!(
            wire,
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 1, 2, 3, 4]
        );
        let back = decode_ip(&wire).unwrap();
        assert!(back.is_ipv4());
        assert_eq!(back, ip("1.2.3.4"));
    }

    #[test]
    fn ipv6_plain() {
        let v6 = ip("2001:db8::1");
        let wire = encode_ip(v6);
        assert_eq!(wire[0], 0x20);
        assert_eq!(decode_ip(&wire).unwrap(), v6);
        assert!(decode_ip(&wire[..15]).is_err());
    }

    #[test]
    fn varints() {
        assert_eq!(encode_varint(0), vec![0]);
        assert_eq!(encode_varint(59), vec![59]);
        assert_eq!(encode_varint(300), vec![0x01, 0x2c]);
        assert_eq!(encode_varint(0x0001_0000), vec![1, 0, 0]);
        assert_eq!(encode_varint(u32::MAX), vec![0xff; 4]);
        for v in [0, 1, 255, 256, 65535, 65536, 1 << 24, u32::MAX] {
            assert_eq!(decode_varint(&encode_varint(v)).unwrap(), v);
        }
        assert_eq!(decode_varint(&[0, 0, 1]).unwrap(), 1);
        assert!(decode_varint(&[]).is_err());
        assert!(decode_varint(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn nonce_is_random() {
        // 1 in 2^24 chance of a false failure
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn take_bytes() {
        let data = [1u8, 2, 3];
        assert_eq!(take::<2>(&data, "x").unwrap(), [1, 2]);
        assert!(take::<4>(&data, "x").is_err());
    }
}
