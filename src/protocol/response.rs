//! Response PDU (server to client)
// (c) 2024 the OpenSPA developers
//!
//! Version 1 plaintext body, before encryption:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 8 | timestamp |
//! | 8 | 3 | nonce |
//! | 11 | 1 | protocol |
//! | 12 | 2 | start port |
//! | 14 | 2 | end port |
//! | 16 | 2 | duration (seconds; 0 = no grant) |
//! | 18 | 1 | signature method |
//! | 19 | 5 | reserved |
//! | 24 | n | trailer container |
//! | 24+n | 256 | signature over `header ‖ body[..24+n]` |

use super::{
    error::{Error, Result},
    fields::{
        decode_port, decode_timestamp, decode_varint, encode_port, encode_timestamp,
        encode_varint, exact, generate_nonce, validate_ports, Nonce, Protocol,
    },
    header::{Header, PduType, Version},
    request::Request,
    seal::{self, append_trailer, extract_trailer, required, Opened},
    tags,
    tlv::Container,
};
use crate::crypto::{CipherSuite, CipherSuites, Peer};

/// Length of the fixed part of a version 1 response body
pub const RESPONSE_FIXED_LEN: usize = 24;

const SIGNATURE_METHOD_OFFSET: usize = 18;

/// What the server granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseData {
    /// Protocol opened
    pub protocol: Protocol,
    /// First port of the range
    pub start_port: u16,
    /// Last port of the range, inclusive
    pub end_port: u16,
    /// Seconds the hole stays open; 0 means nothing was granted
    pub duration: u16,
}

/// A complete response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// PDU header
    pub header: Header,
    /// Unix seconds at creation
    pub timestamp: i64,
    /// Random per-response value. Not correlated with the request's nonce.
    pub nonce: Nonce,
    /// The grant
    pub data: ResponseData,
    /// Extra application data, signed along with the body
    pub trailer: Container,
}

impl Response {
    /// Creates the response to `request`, echoing its version, transaction id, cipher suite,
    /// protocol and ports. Responses carry no ADK proof.
    #[must_use]
    pub fn for_request(request: &Request, duration: u16) -> Self {
        Self {
            header: Header {
                pdu_type: PduType::Response,
                adk_proof: 0,
                ..request.header
            },
            timestamp: chrono::Utc::now().timestamp(),
            nonce: generate_nonce(),
            data: ResponseData {
                protocol: request.data.protocol,
                start_port: request.data.start_port,
                end_port: request.data.end_port,
                duration,
            },
            trailer: Container::new(),
        }
    }

    /// Attaches a trailer (builder style)
    #[must_use]
    pub fn with_trailer(mut self, trailer: Container) -> Self {
        self.trailer = trailer;
        self
    }

    /// Signs with the server's key, encrypts to `recipient`, and serializes
    pub fn encode(&self, suite: &dyn CipherSuite, recipient: &Peer) -> Result<Vec<u8>> {
        if suite.id() != self.header.cipher_suite {
            return Err(Error::Crypto(format!(
                "header names cipher suite {} but {} was supplied",
                self.header.cipher_suite,
                suite.id()
            )));
        }
        validate_ports(self.data.protocol, self.data.start_port, self.data.end_port)?;
        match self.header.version {
            Version::V1 => seal::seal_v1(&self.header, &self.body_v1(suite), suite, recipient),
            Version::V2 => {
                seal::seal_v2(&self.header, &self.inner_v2()?.encode(), suite, recipient)
            }
        }
    }

    fn body_v1(&self, suite: &dyn CipherSuite) -> Vec<u8> {
        let trailer = self.trailer.encode();
        let mut body = Vec::with_capacity(RESPONSE_FIXED_LEN + trailer.len());
        body.extend_from_slice(&encode_timestamp(self.timestamp));
        body.extend_from_slice(&self.nonce);
        body.push(self.data.protocol.number());
        body.extend_from_slice(&encode_port(self.data.start_port));
        body.extend_from_slice(&encode_port(self.data.end_port));
        body.extend_from_slice(&self.data.duration.to_be_bytes());
        body.push(suite.id().signature_method());
        body.extend_from_slice(&[0u8; 5]);
        debug_assert_eq!(body.len(), RESPONSE_FIXED_LEN);
        body.extend_from_slice(&trailer);
        body
    }

    fn inner_v2(&self) -> Result<Container> {
        let mut c = Container::new();
        c.set(tags::TIMESTAMP, encode_timestamp(self.timestamp));
        c.set(tags::NONCE, self.nonce);
        c.set(tags::FIREWALL_PROTOCOL, [self.data.protocol.number()]);
        c.set(tags::FIREWALL_PORT_START, encode_port(self.data.start_port));
        c.set(tags::FIREWALL_PORT_END, encode_port(self.data.end_port));
        c.set(tags::DURATION, encode_varint(self.data.duration.into()));
        append_trailer(&mut c, &self.trailer)?;
        Ok(c)
    }

    /// Parses, decrypts and verifies a response against the server's public key
    pub fn decode(data: &[u8], suites: &CipherSuites) -> Result<Self> {
        let opened = seal::open(data, PduType::Response, suites)?;
        let response = match opened.header.version {
            Version::V1 => Self::decode_v1(&opened)?,
            Version::V2 => Self::decode_v2(&opened)?,
        };
        validate_ports(
            response.data.protocol,
            response.data.start_port,
            response.data.end_port,
        )?;
        Ok(response)
    }

    fn decode_v1(opened: &Opened) -> Result<Self> {
        let pt = &opened.plaintext;
        let sig_len = opened.suite.signature_len();
        if pt.len() < RESPONSE_FIXED_LEN + sig_len {
            return Err(Error::too_short(
                "response body",
                RESPONSE_FIXED_LEN + sig_len,
                pt.len(),
            ));
        }
        let (body, signature) = pt.split_at(pt.len() - sig_len);

        let method = body[SIGNATURE_METHOD_OFFSET];
        if method != opened.header.cipher_suite.signature_method() {
            return Err(Error::UnsupportedSignatureMethod(method));
        }
        opened.verify(&Peer::Server, body, signature)?;

        Ok(Self {
            header: opened.header,
            timestamp: decode_timestamp(&body[0..8])?,
            nonce: exact::<3>(&body[8..11], "nonce")?,
            data: ResponseData {
                protocol: Protocol::try_from(body[11])?,
                start_port: decode_port(&body[12..14])?,
                end_port: decode_port(&body[14..16])?,
                duration: u16::from_be_bytes(exact::<2>(&body[16..18], "duration")?),
            },
            trailer: Container::parse(&body[RESPONSE_FIXED_LEN..]),
        })
    }

    fn decode_v2(opened: &Opened) -> Result<Self> {
        let (inner_bytes, signature) = opened.split_v2()?;
        opened.verify(&Peer::Server, &inner_bytes, &signature)?;
        let inner = Container::parse(&inner_bytes);

        let [protocol] = exact::<1>(
            &required(&inner, tags::FIREWALL_PROTOCOL, "firewall protocol")?,
            "firewall protocol",
        )?;
        let duration = decode_varint(&required(&inner, tags::DURATION, "duration")?)?;
        let duration = u16::try_from(duration).map_err(|_| {
            Error::invalid_field("duration", format!("{duration} seconds is out of range"))
        })?;
        let port = |tag| inner.get(tag).map_or(Ok(0), |b| decode_port(&b));

        Ok(Self {
            header: opened.header,
            timestamp: decode_timestamp(&required(&inner, tags::TIMESTAMP, "timestamp")?)?,
            nonce: exact::<3>(&required(&inner, tags::NONCE, "nonce")?, "nonce")?,
            data: ResponseData {
                protocol: Protocol::try_from(protocol)?,
                start_port: port(tags::FIREWALL_PORT_START)?,
                end_port: port(tags::FIREWALL_PORT_END)?,
                duration,
            },
            trailer: extract_trailer(&inner),
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Response, RESPONSE_FIXED_LEN};
    use crate::{
        crypto::{test_keys, CipherSuiteId, CipherSuites, KeyRing, Peer, RsaSuite},
        protocol::{
            fields::{encode_timestamp, encode_varint},
            request::{Request, RequestData},
            tags,
            tlv::Container,
            Error, Protocol, Version,
        },
    };

    fn request(version: Version) -> Request {
        let data = RequestData {
            device_id: test_keys::DEVICE_ID.into(),
            protocol: Protocol::Tcp,
            start_port: 22,
            end_port: 22,
            client_ip: "1.2.3.4".parse().unwrap(),
            server_ip: "8.8.8.8".parse().unwrap(),
            behind_nat: false,
        };
        Request::new(version, CipherSuiteId::RsaSha256Aes256Cbc, data).unwrap()
    }

    fn client() -> CipherSuites {
        CipherSuites::new().with(test_keys::client_suite())
    }

    fn to_client() -> Peer {
        Peer::Client(test_keys::device())
    }

    #[test]
    fn v1_round_trip() {
        let resp = Response::for_request(&request(Version::V1), 3600);
        let wire = resp
            .encode(test_keys::server_suite().as_ref(), &to_client())
            .unwrap();
        assert_eq!(&wire[..2], &[0x18, 0x01]);
        // header + wrapped key + iv + AES(24 + 256 padded to 288)
        assert_eq!(wire.len(), 2 + 256 + 16 + 288);
        let decoded = Response::decode(&wire, &client()).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(decoded.data.duration, 3600);
        assert_eq!(decoded.data.start_port, 22);
    }

    #[test]
    fn v1_trailer() {
        let mut trailer = Container::new();
        trailer.set(0x99, b"motd");
        let resp = Response::for_request(&request(Version::V1), 0).with_trailer(trailer);
        let wire = resp
            .encode(test_keys::server_suite().as_ref(), &to_client())
            .unwrap();
        let decoded = Response::decode(&wire, &client()).unwrap();
        assert_eq!(decoded.trailer.get(0x99).unwrap(), b"motd");
        assert_eq!(decoded.data.duration, 0);
    }

    #[test]
    fn v2_round_trip() {
        let req = request(Version::V2);
        let resp = Response::for_request(&req, u16::MAX);
        assert_eq!(resp.header.transaction_id, req.header.transaction_id);
        let wire = resp
            .encode(test_keys::server_suite().as_ref(), &to_client())
            .unwrap();
        assert_eq!(wire[0], 0x28);
        assert_eq!(wire[1], req.header.transaction_id);
        let decoded = Response::decode(&wire, &client()).unwrap();
        assert_eq!(decoded, resp);
    }

    /// Seals a hand-built version 2 inner container as the server would
    fn seal_inner(header: &crate::protocol::Header, inner: &Container) -> Vec<u8> {
        super::seal::seal_v2(
            header,
            &inner.encode(),
            test_keys::server_suite().as_ref(),
            &to_client(),
        )
        .unwrap()
    }

    fn inner_v2(protocol: Protocol, duration: &[u8]) -> Container {
        let mut c = Container::new();
        c.set(tags::TIMESTAMP, encode_timestamp(1_700_000_000));
        c.set(tags::NONCE, [1, 2, 3]);
        c.set(tags::FIREWALL_PROTOCOL, [protocol.number()]);
        c.set(tags::DURATION, duration);
        c
    }

    #[test]
    fn v2_absent_ports() {
        let header = Response::for_request(&request(Version::V2), 0).header;

        let wire = seal_inner(&header, &inner_v2(Protocol::Icmp, &[0x0e, 0x10]));
        let decoded = Response::decode(&wire, &client()).unwrap();
        assert_eq!(decoded.data.start_port, 0);
        assert_eq!(decoded.data.end_port, 0);
        assert_eq!(decoded.data.duration, 3600);

        // Port-bearing protocols may not leave them out
        let wire = seal_inner(&header, &inner_v2(Protocol::Tcp, &[0x0e, 0x10]));
        assert!(matches!(
            Response::decode(&wire, &client()),
            Err(Error::InvalidField {
                field: "start port",
                ..
            })
        ));
    }

    #[test]
    fn v2_duration_range() {
        let header = Response::for_request(&request(Version::V2), 0).header;

        let wire = seal_inner(&header, &inner_v2(Protocol::Icmp, &[0xff, 0xff]));
        assert_eq!(
            Response::decode(&wire, &client()).unwrap().data.duration,
            u16::MAX
        );

        let too_long = encode_varint(u32::from(u16::MAX) + 1);
        assert_eq!(too_long, [0x01, 0x00, 0x00]);
        let wire = seal_inner(&header, &inner_v2(Protocol::Icmp, &too_long));
        assert!(matches!(
            Response::decode(&wire, &client()),
            Err(Error::InvalidField {
                field: "duration",
                ..
            })
        ));
    }

    #[test]
    fn unsupported_signature_method() {
        // Hand-build a v1 body with method 0x02 and seal it properly
        let resp = Response::for_request(&request(Version::V1), 10);
        let server = test_keys::server_suite();
        let mut body = resp.body_v1(server.as_ref());
        body[18] = 0x02;
        let wire =
            super::seal::seal_v1(&resp.header, &body, server.as_ref(), &to_client()).unwrap();
        assert_eq!(
            Response::decode(&wire, &client()).unwrap_err(),
            Error::UnsupportedSignatureMethod(2)
        );
        assert_eq!(body.len(), RESPONSE_FIXED_LEN);
    }

    #[test]
    fn forged_by_client_key() {
        // A response signed with something other than the server's key
        let ring = KeyRing::new().with(
            Peer::Client(test_keys::device()),
            test_keys::public(test_keys::CLIENT_PUBLIC),
        );
        let forger = RsaSuite::new(
            test_keys::private(test_keys::CLIENT_PRIVATE),
            Arc::new(ring),
        )
        .unwrap();
        for version in [Version::V1, Version::V2] {
            let resp = Response::for_request(&request(version), 60);
            let wire = resp.encode(&forger, &to_client()).unwrap();
            assert_eq!(
                Response::decode(&wire, &client()).unwrap_err(),
                Error::SignatureInvalid
            );
        }
    }

    #[test]
    fn request_is_not_a_response() {
        let wire = request(Version::V1)
            .encode(test_keys::client_suite().as_ref())
            .unwrap();
        assert!(matches!(
            Response::decode(&wire, &client()),
            Err(Error::InvalidField {
                field: "pdu type",
                ..
            })
        ));
    }
}
