//! CLI helper - Address family
// (c) 2024 the OpenSPA developers

use std::fmt::Display;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::str::FromStr;

use figment::error::Actual;
use serde::Serialize;

use crate::util::cli::IntOrString;

/// Representation of an IP address family, or no preference
///
/// This is a local type with special parsing semantics to take part in the config/CLI system.
/// It may be written as `any`, `4` or `6`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(into = "String")]
pub enum AddressFamily {
    /// Whatever the name service returns first
    #[default]
    #[value(name = "any")]
    Any,
    /// IPv4
    #[value(name = "4")]
    V4,
    /// IPv6
    #[value(name = "6")]
    V6,
}

impl AddressFamily {
    /// Whether the given address belongs to this family
    #[must_use]
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }
}

impl From<IpAddr> for AddressFamily {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl From<AddressFamily> for String {
    fn from(value: AddressFamily) -> Self {
        value.to_string()
    }
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Any => write!(f, "any"),
            AddressFamily::V4 => write!(f, "4"),
            AddressFamily::V6 => write!(f, "6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = figment::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(AddressFamily::Any),
            "4" | "inet" | "ipv4" => Ok(AddressFamily::V4),
            "6" | "inet6" | "ipv6" => Ok(AddressFamily::V6),
            _ => Err(figment::error::Kind::InvalidType(
                Actual::Str(s.into()),
                "any, 4 or 6".into(),
            )
            .into()),
        }
    }
}

impl TryFrom<u64> for AddressFamily {
    type Error = figment::Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(AddressFamily::V4),
            6 => Ok(AddressFamily::V6),
            _ => Err(figment::error::Kind::InvalidValue(
                Actual::Unsigned(value.into()),
                "any, 4 or 6".into(),
            )
            .into()),
        }
    }
}

impl<'de> serde::Deserialize<'de> for AddressFamily {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(IntOrString(PhantomData))
    }
}

#[cfg(test)]
mod test {
    use std::net::IpAddr;

    use super::AddressFamily;

    #[test]
    fn serialize() {
        assert_eq!(serde_json::to_string(&AddressFamily::V4).unwrap(), r#""4""#);
        assert_eq!(serde_json::to_string(&AddressFamily::V6).unwrap(), r#""6""#);
        assert_eq!(
            serde_json::to_string(&AddressFamily::Any).unwrap(),
            r#""any""#
        );
    }

    #[test]
    fn deser_str() {
        let a: AddressFamily = serde_json::from_str(r#" "4" "#).unwrap();
        assert_eq!(a, AddressFamily::V4);
        let a: AddressFamily = serde_json::from_str(r#" "6" "#).unwrap();
        assert_eq!(a, AddressFamily::V6);
        let a: AddressFamily = serde_json::from_str(r#" "ANY" "#).unwrap();
        assert_eq!(a, AddressFamily::Any);
    }

    #[test]
    fn deser_int() {
        let a: AddressFamily = serde_json::from_str("4").unwrap();
        assert_eq!(a, AddressFamily::V4);
        let a: AddressFamily = serde_json::from_str("6").unwrap();
        assert_eq!(a, AddressFamily::V6);
    }

    #[test]
    fn deser_invalid() {
        let _ = serde_json::from_str::<AddressFamily>("true").unwrap_err();
        let _ = serde_json::from_str::<AddressFamily>("5").unwrap_err();
        let _ = serde_json::from_str::<AddressFamily>(r#" "5" "#).unwrap_err();
        let _ = serde_json::from_str::<AddressFamily>("-1").unwrap_err();
        let _ = serde_json::from_str::<AddressFamily>(r#" "string" "#).unwrap_err();
    }

    #[test]
    fn matching() {
        let v4 = IpAddr::from([192, 0, 2, 1]);
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(AddressFamily::Any.matches(&v4));
        assert!(AddressFamily::Any.matches(&v6));
        assert!(AddressFamily::V4.matches(&v4));
        assert!(!AddressFamily::V4.matches(&v6));
        assert!(AddressFamily::V6.matches(&v6));
        assert_eq!(AddressFamily::from(v6), AddressFamily::V6);
    }
}
