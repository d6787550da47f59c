//! PDU header
// (c) 2024 the OpenSPA developers
//!
//! Both header formats share their first byte:
//!
//! ```text
//!  7 6 5 4   3    2 1 0
//! +-------+------+-----+
//! |version| resp | rsv |
//! +-------+------+-----+
//! ```
//!
//! * Version 1 is two bytes: the control byte, then the 6-bit cipher suite.
//! * Version 2 is eight bytes: the control byte, a transaction id, the 6-bit cipher suite,
//!   a reserved (zero) byte, then the 32-bit big-endian [ADK proof](crate::adk)
//!   (0 when absent).

use crate::crypto::CipherSuiteId;

use super::error::{Error, Result};

const RESPONSE_BIT: u8 = 0x08;
const CIPHER_SUITE_MASK: u8 = 0x3F;

/// Direction of a PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PduType {
    /// Client to server
    Request,
    /// Server to client
    Response,
}

/// Protocol versions we speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Version {
    /// Fixed-layout bodies behind a 2-byte header
    #[strum(serialize = "1")]
    V1 = 1,
    /// Container bodies behind an 8-byte header
    #[strum(serialize = "2")]
    V2 = 2,
}

impl Version {
    /// Length of the header for this version
    #[must_use]
    pub fn header_len(self) -> usize {
        match self {
            Version::V1 => 2,
            Version::V2 => 8,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Version::V1),
            2 => Ok(Version::V2),
            v => Err(Error::UnsupportedVersion(v)),
        }
    }
}

/// A decoded header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version; determines the header length and body format
    pub version: Version,
    /// Request or response
    pub pdu_type: PduType,
    /// Correlates a response with its request (version 2 only; always 0 in version 1)
    pub transaction_id: u8,
    /// Cipher suite protecting the body
    pub cipher_suite: CipherSuiteId,
    /// Anti-DoS knocking proof (version 2 only; 0 means none)
    pub adk_proof: u32,
}

impl Header {
    /// Validating constructor from raw header values
    pub fn new(version: u8, pdu_type: PduType, cipher_suite: u8) -> Result<Self> {
        if version == 0 || version > 0x0F {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Self {
            version: Version::try_from(version)?,
            pdu_type,
            transaction_id: 0,
            cipher_suite: CipherSuiteId::try_from(cipher_suite)?,
            adk_proof: 0,
        })
    }

    /// Sets the transaction id (builder style)
    #[must_use]
    pub fn with_transaction_id(mut self, id: u8) -> Self {
        self.transaction_id = id;
        self
    }

    /// Length of this header on the wire
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.version.header_len()
    }

    fn control_byte(&self) -> u8 {
        let mut b = (self.version as u8) << 4;
        if self.pdu_type == PduType::Response {
            b |= RESPONSE_BIT;
        }
        b
    }

    /// Serializes the header
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let suite = u8::from(self.cipher_suite) & CIPHER_SUITE_MASK;
        match self.version {
            Version::V1 => vec![self.control_byte(), suite],
            Version::V2 => {
                let mut v = vec![self.control_byte(), self.transaction_id, suite, 0];
                v.extend_from_slice(&self.adk_proof.to_be_bytes());
                v
            }
        }
    }

    /// Parses a header from the front of `data`.
    ///
    /// Returns the header and its length; the body starts immediately after.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let control = *data
            .first()
            .ok_or_else(|| Error::too_short("header", 1, 0))?;
        let version = Version::try_from(control >> 4)?;
        let len = version.header_len();
        if data.len() < len {
            return Err(Error::too_short("header", len, data.len()));
        }
        let pdu_type = if control & RESPONSE_BIT == 0 {
            PduType::Request
        } else {
            PduType::Response
        };
        let (transaction_id, suite, adk_proof) = match version {
            Version::V1 => (0, data[1], 0),
            Version::V2 => (
                data[1],
                data[2],
                u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ),
        };
        let header = Self {
            version,
            pdu_type,
            transaction_id,
            cipher_suite: CipherSuiteId::try_from(suite & CIPHER_SUITE_MASK)?,
            adk_proof,
        };
        Ok((header, len))
    }
}

#[cfg(test)]
mod test {
    use super::{Header, PduType, Version};
    use crate::{crypto::CipherSuiteId, protocol::Error};

    #[test]
    fn version_bounds() {
        assert_eq!(
            Header::new(0, PduType::Request, 1).unwrap_err(),
            Error::UnsupportedVersion(0)
        );
        assert_eq!(
            Header::new(16, PduType::Request, 1).unwrap_err(),
            Error::UnsupportedVersion(16)
        );
        assert_eq!(
            Header::new(9, PduType::Request, 1).unwrap_err(),
            Error::UnsupportedVersion(9)
        );
        let _ = Header::new(1, PduType::Request, 1).unwrap();
        let _ = Header::new(2, PduType::Request, 1).unwrap();
    }

    #[test]
    fn cipher_suite_bounds() {
        for bad in [0u8, 2, 64] {
            assert_eq!(
                Header::new(1, PduType::Request, bad).unwrap_err(),
                Error::UnsupportedCipherSuite(bad)
            );
        }
        let h = Header::new(1, PduType::Request, 1).unwrap();
        assert_eq!(h.cipher_suite, CipherSuiteId::RsaSha256Aes256Cbc);
    }

    #[test]
    fn v1_wire_format() {
        let req = Header::new(1, PduType::Request, 1).unwrap();
        assert_eq!(req.encode(), vec![0x10, 0x01]);
        let resp = Header::new(1, PduType::Response, 1).unwrap();
        assert_eq!(resp.encode(), vec![0x18, 0x01]);
    }

    #[test]
    fn v2_wire_format() {
        let h = Header::new(2, PduType::Response, 1)
            .unwrap()
            .with_transaction_id(0xAB);
        assert_eq!(h.encode(), vec![0x28, 0xAB, 0x01, 0, 0, 0, 0, 0]);
        assert_eq!(h.encoded_len(), 8);
    }

    #[test]
    fn adk_proof_position() {
        let h = Header {
            adk_proof: 123_456_789,
            ..Header::new(2, PduType::Request, 1).unwrap()
        };
        let wire = h.encode();
        assert_eq!(&wire[3..], &[0x00, 0x07, 0x5B, 0xCD, 0x15]);
        assert_eq!(Header::decode(&wire).unwrap().0.adk_proof, 123_456_789);

        // Version 1 has nowhere to put it
        let (v1, _) = Header::decode(&[0x10, 0x01]).unwrap();
        assert_eq!(v1.adk_proof, 0);
    }

    #[test]
    fn round_trip() {
        for version in [1, 2] {
            for pdu_type in [PduType::Request, PduType::Response] {
                let h = Header::new(version, pdu_type, 1)
                    .unwrap()
                    .with_transaction_id(if version == 2 { 7 } else { 0 });
                let mut wire = h.encode();
                wire.extend_from_slice(&[0xDE, 0xAD]);
                let (decoded, len) = Header::decode(&wire).unwrap();
                assert_eq!(decoded, h);
                assert_eq!(len, h.encoded_len());
            }
        }
    }

    #[test]
    fn decode_rejects() {
        assert!(matches!(
            Header::decode(&[]),
            Err(Error::InvalidBytes(_))
        ));
        assert_eq!(
            Header::decode(&[0x30, 0x01]).unwrap_err(),
            Error::UnsupportedVersion(3)
        );
        assert_eq!(
            Header::decode(&[0x00, 0x01]).unwrap_err(),
            Error::UnsupportedVersion(0)
        );
        assert_eq!(
            Header::decode(&[0x10, 0x02]).unwrap_err(),
            Error::UnsupportedCipherSuite(2)
        );
        // v2 header cut short
        assert!(matches!(
            Header::decode(&[0x20, 0x00, 0x01]),
            Err(Error::InvalidBytes(_))
        ));
        assert_eq!(Version::V2.header_len(), 8);
    }
}
