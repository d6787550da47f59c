// CLI argument helper - PortRange
// (c) 2024 the OpenSPA developers

use std::{fmt::Display, str::FromStr};

/// An inclusive range of port numbers to open.
///
/// Written either as a single port (`22`) or as a range (`5000-5010`).
/// Port 0 stands for "no port", which is only meaningful for portless protocols such as ICMP,
/// and may not form part of a range.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PortRange {
    /// First number in the range
    pub begin: u16,
    /// Last number in the range, inclusive.
    pub end: u16,
}

impl Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.begin == self.end {
            write!(f, "{}", self.begin)
        } else {
            write!(f, "{}-{}", self.begin, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u16>() {
            return Ok(Self { begin: n, end: n });
        }
        let Some((a, b)) = s.split_once('-') else {
            return Err(format!(
                "invalid port `{s}` (expected a port number [0..65535] or a range `a-b`)"
            ));
        };
        let (Ok(aa), Ok(bb)) = (a.trim().parse::<u16>(), b.trim().parse::<u16>()) else {
            return Err(format!("invalid port range `{s}`"));
        };
        if aa > bb {
            return Err(format!("invalid port range `{s}` (must be increasing)"));
        }
        if aa == 0 {
            return Err(format!(
                "invalid port range `{s}` (port 0 means \"none\" so cannot be part of a range)"
            ));
        }
        Ok(Self { begin: aa, end: bb })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    type Uut = super::PortRange;

    #[test]
    fn output() {
        assert_eq!(Uut { begin: 123, end: 123 }.to_string(), "123");
        assert_eq!(Uut { begin: 123, end: 456 }.to_string(), "123-456");
    }
    #[test]
    fn parse_single() {
        let uut = Uut::from_str("1234").unwrap();
        assert_eq!(uut, Uut { begin: 1234, end: 1234 });
        let uut = Uut::from_str("0").unwrap();
        assert_eq!(uut, Uut::default());
    }
    #[test]
    fn parse_range() {
        let uut = Uut::from_str("1234-2345").unwrap();
        assert_eq!(uut.begin, 1234);
        assert_eq!(uut.end, 2345);
    }
    #[test]
    fn invalid() {
        let _ = Uut::from_str("1000-999").expect_err("should have failed");
        let _ = Uut::from_str("-500").expect_err("should have failed");
        let _ = Uut::from_str("0-1000").expect_err("should have failed");
        let _ = Uut::from_str("70000").expect_err("should have failed");
        let _ = Uut::from_str("ssh").expect_err("should have failed");
    }
}
