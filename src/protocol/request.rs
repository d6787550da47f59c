//! Request PDU (client to server)
// (c) 2024 the OpenSPA developers
//!
//! Version 1 plaintext body, before encryption:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 8 | timestamp |
//! | 8 | 16 | client device UUID |
//! | 24 | 3 | nonce |
//! | 27 | 1 | protocol |
//! | 28 | 2 | start port |
//! | 30 | 2 | end port |
//! | 32 | 16 | client public IP |
//! | 48 | 16 | server public IP |
//! | 64 | 4 | misc: bit 31 behind NAT, bits 0..9 trailer length |
//! | 68 | n | trailer container |
//! | 68+n | 256 | signature over `header ‖ body[..68+n]` |

use std::net::IpAddr;

use uuid::Uuid;

use super::{
    error::{Error, Result},
    fields::{
        decode_ip, decode_ipv4, decode_ipv6, decode_port, decode_timestamp, encode_ip,
        encode_port, encode_timestamp, encode_uuid, exact, generate_nonce, validate_ports, Nonce,
        Protocol,
    },
    header::{Header, PduType, Version},
    seal::{self, append_trailer, extract_trailer, required, Opened},
    tags,
    tlv::{Container, Tag},
};
use crate::crypto::{CipherSuite, CipherSuiteId, CipherSuites, Peer};

/// Length of the fixed part of a version 1 request body
pub const REQUEST_FIXED_LEN: usize = 68;

/// Largest trailer a version 1 request can describe (10-bit length field)
pub const MAX_TRAILER_LEN: usize = 0x3FF;

const MISC_BEHIND_NAT: u32 = 1 << 31;
const MISC_TRAILER_MASK: u32 = 0x3FF;

/// What the client is asking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestData {
    /// Client device identifier. Any UUID text form is accepted; decoded requests carry the
    /// canonical dashed lowercase form.
    pub device_id: String,
    /// Protocol to open
    pub protocol: Protocol,
    /// First port of the range (ignored for protocols without ports)
    pub start_port: u16,
    /// Last port of the range, inclusive
    pub end_port: u16,
    /// The client's public address; the firewall opens for this address
    pub client_ip: IpAddr,
    /// The server's public address, as the client sees it
    pub server_ip: IpAddr,
    /// Whether the client sits behind NAT
    pub behind_nat: bool,
}

impl RequestData {
    /// Checks the device id, port range and address families
    pub fn validate(&self) -> Result<()> {
        let _ = encode_uuid(&self.device_id)?;
        validate_ports(self.protocol, self.start_port, self.end_port)?;
        if self.client_ip.is_ipv4() != self.server_ip.is_ipv4() {
            return Err(Error::invalid_field(
                "server ip",
                format!(
                    "{} and {} are different address families",
                    self.client_ip, self.server_ip
                ),
            ));
        }
        Ok(())
    }
}

/// A complete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// PDU header
    pub header: Header,
    /// Unix seconds at creation
    pub timestamp: i64,
    /// Random per-request value
    pub nonce: Nonce,
    /// The request itself
    pub data: RequestData,
    /// Extra application data, signed along with the body
    pub trailer: Container,
}

impl Request {
    /// Creates a request stamped with the current time and a fresh nonce
    pub fn new(version: Version, cipher_suite: CipherSuiteId, data: RequestData) -> Result<Self> {
        data.validate()?;
        let transaction_id = match version {
            Version::V1 => 0,
            Version::V2 => rand::random(),
        };
        Ok(Self {
            header: Header {
                version,
                pdu_type: PduType::Request,
                transaction_id,
                cipher_suite,
                adk_proof: 0,
            },
            timestamp: chrono::Utc::now().timestamp(),
            nonce: generate_nonce(),
            data,
            trailer: Container::new(),
        })
    }

    /// Attaches a trailer (builder style)
    #[must_use]
    pub fn with_trailer(mut self, trailer: Container) -> Self {
        self.trailer = trailer;
        self
    }

    /// Puts an ADK proof in the header. Only version 2 headers can carry one.
    pub fn with_adk_proof(mut self, proof: u32) -> Result<Self> {
        if self.header.version == Version::V1 {
            return Err(Error::invalid_field(
                "adk proof",
                "version 1 headers have no room for it",
            ));
        }
        self.header.adk_proof = proof;
        Ok(self)
    }

    /// Signs with the client's key, encrypts to the server, and serializes
    pub fn encode(&self, suite: &dyn CipherSuite) -> Result<Vec<u8>> {
        if suite.id() != self.header.cipher_suite {
            return Err(Error::Crypto(format!(
                "header names cipher suite {} but {} was supplied",
                self.header.cipher_suite,
                suite.id()
            )));
        }
        self.data.validate()?;
        match self.header.version {
            Version::V1 => seal::seal_v1(&self.header, &self.body_v1()?, suite, &Peer::Server),
            Version::V2 => {
                seal::seal_v2(&self.header, &self.inner_v2()?.encode(), suite, &Peer::Server)
            }
        }
    }

    fn body_v1(&self) -> Result<Vec<u8>> {
        let trailer = self.trailer.encode();
        if trailer.len() > MAX_TRAILER_LEN {
            return Err(Error::invalid_field(
                "signature offset",
                format!(
                    "trailer of {} bytes exceeds {MAX_TRAILER_LEN}",
                    trailer.len()
                ),
            ));
        }
        let mut misc = u32::try_from(trailer.len())
            .map_err(|e| Error::invalid_field("signature offset", e.to_string()))?;
        if self.data.behind_nat {
            misc |= MISC_BEHIND_NAT;
        }

        let mut body = Vec::with_capacity(REQUEST_FIXED_LEN + trailer.len());
        body.extend_from_slice(&encode_timestamp(self.timestamp));
        body.extend_from_slice(&encode_uuid(&self.data.device_id)?);
        body.extend_from_slice(&self.nonce);
        body.push(self.data.protocol.number());
        body.extend_from_slice(&encode_port(self.data.start_port));
        body.extend_from_slice(&encode_port(self.data.end_port));
        body.extend_from_slice(&encode_ip(self.data.client_ip));
        body.extend_from_slice(&encode_ip(self.data.server_ip));
        body.extend_from_slice(&misc.to_be_bytes());
        debug_assert_eq!(body.len(), REQUEST_FIXED_LEN);
        body.extend_from_slice(&trailer);
        Ok(body)
    }

    fn inner_v2(&self) -> Result<Container> {
        let mut c = Container::new();
        c.set(tags::TIMESTAMP, encode_timestamp(self.timestamp));
        c.set(tags::CLIENT_DEVICE_UUID, encode_uuid(&self.data.device_id)?);
        c.set(tags::FIREWALL_PROTOCOL, [self.data.protocol.number()]);
        c.set(tags::FIREWALL_PORT_START, encode_port(self.data.start_port));
        c.set(tags::FIREWALL_PORT_END, encode_port(self.data.end_port));
        match self.data.client_ip {
            IpAddr::V4(ip) => c.set(tags::CLIENT_PUBLIC_IPV4, ip.octets()),
            IpAddr::V6(ip) => c.set(tags::CLIENT_PUBLIC_IPV6, ip.octets()),
        }
        match self.data.server_ip {
            IpAddr::V4(ip) => c.set(tags::SERVER_PUBLIC_IPV4, ip.octets()),
            IpAddr::V6(ip) => c.set(tags::SERVER_PUBLIC_IPV6, ip.octets()),
        }
        let info = if self.data.behind_nat {
            tags::IP_INFO_BEHIND_NAT
        } else {
            0
        };
        c.set(tags::IP_INFO, [info]);
        c.set(tags::NONCE, self.nonce);
        append_trailer(&mut c, &self.trailer)?;
        Ok(c)
    }

    /// Parses, decrypts and verifies a request.
    ///
    /// The signature is checked against the public key of the device named inside the body.
    pub fn decode(data: &[u8], suites: &CipherSuites) -> Result<Self> {
        let opened = seal::open(data, PduType::Request, suites)?;
        let request = match opened.header.version {
            Version::V1 => Self::decode_v1(&opened)?,
            Version::V2 => Self::decode_v2(&opened)?,
        };
        request.data.validate()?;
        Ok(request)
    }

    fn decode_v1(opened: &Opened) -> Result<Self> {
        let pt = &opened.plaintext;
        if pt.len() < REQUEST_FIXED_LEN {
            return Err(Error::too_short("request body", REQUEST_FIXED_LEN, pt.len()));
        }
        let misc = u32::from_be_bytes(exact::<4>(&pt[64..68], "misc")?);
        let trailer_len = usize::try_from(misc & MISC_TRAILER_MASK)
            .map_err(|e| Error::InvalidBytes(e.to_string()))?;
        let signed_len = REQUEST_FIXED_LEN + trailer_len;
        let expected = signed_len + opened.suite.signature_len();
        if pt.len() != expected {
            return Err(Error::InvalidBytes(format!(
                "request body is {} bytes but its signature offset implies {expected}",
                pt.len()
            )));
        }
        let (body, signature) = pt.split_at(signed_len);

        let device = Uuid::from_bytes(exact::<16>(&body[8..24], "device id")?);
        opened.verify(&Peer::Client(device), body, signature)?;

        Ok(Self {
            header: opened.header,
            timestamp: decode_timestamp(&body[0..8])?,
            nonce: exact::<3>(&body[24..27], "nonce")?,
            data: RequestData {
                device_id: device.hyphenated().to_string(),
                protocol: Protocol::try_from(body[27])?,
                start_port: decode_port(&body[28..30])?,
                end_port: decode_port(&body[30..32])?,
                client_ip: decode_ip(&body[32..48])?,
                server_ip: decode_ip(&body[48..64])?,
                behind_nat: misc & MISC_BEHIND_NAT != 0,
            },
            trailer: Container::parse(&body[REQUEST_FIXED_LEN..]),
        })
    }

    fn decode_v2(opened: &Opened) -> Result<Self> {
        let (inner_bytes, signature) = opened.split_v2()?;
        let inner = Container::parse(&inner_bytes);

        let device = Uuid::from_bytes(exact::<16>(
            &required(&inner, tags::CLIENT_DEVICE_UUID, "client device uuid")?,
            "client device uuid",
        )?);
        opened.verify(&Peer::Client(device), &inner_bytes, &signature)?;

        let [protocol] = exact::<1>(
            &required(&inner, tags::FIREWALL_PROTOCOL, "firewall protocol")?,
            "firewall protocol",
        )?;
        let behind_nat = match inner.get(tags::IP_INFO) {
            Some(info) => exact::<1>(&info, "ip info")?[0] & tags::IP_INFO_BEHIND_NAT != 0,
            None => false,
        };

        Ok(Self {
            header: opened.header,
            timestamp: decode_timestamp(&required(&inner, tags::TIMESTAMP, "timestamp")?)?,
            nonce: exact::<3>(&required(&inner, tags::NONCE, "nonce")?, "nonce")?,
            data: RequestData {
                device_id: device.hyphenated().to_string(),
                protocol: Protocol::try_from(protocol)?,
                start_port: optional_port(&inner, tags::FIREWALL_PORT_START)?,
                end_port: optional_port(&inner, tags::FIREWALL_PORT_END)?,
                client_ip: ip_entry(
                    &inner,
                    tags::CLIENT_PUBLIC_IPV4,
                    tags::CLIENT_PUBLIC_IPV6,
                    "client public ip",
                )?,
                server_ip: ip_entry(
                    &inner,
                    tags::SERVER_PUBLIC_IPV4,
                    tags::SERVER_PUBLIC_IPV6,
                    "server public ip",
                )?,
                behind_nat,
            },
            trailer: extract_trailer(&inner),
        })
    }
}

/// Ports are omitted by some senders for protocols that have none
fn optional_port(c: &Container, tag: Tag) -> Result<u16> {
    c.get(tag).map_or(Ok(0), |b| decode_port(&b))
}

fn ip_entry(
    c: &Container,
    v4: Tag,
    v6: Tag,
    name: &'static str,
) -> Result<IpAddr> {
    if let Some(b) = c.get(v4) {
        Ok(IpAddr::V4(decode_ipv4(&b)?))
    } else if let Some(b) = c.get(v6) {
        Ok(IpAddr::V6(decode_ipv6(&b)?))
    } else {
        Err(Error::MissingField(name))
    }
}
