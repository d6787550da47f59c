// (c) 2024 the OpenSPA developers

//! Protocol definitions
//!
#![allow(clippy::doc_markdown)]
//! # The OpenSPA protocol
//!
//! OpenSPA is a **Single Packet Authorization** protocol.
//! A client proves who it is with exactly one UDP datagram; if the server agrees,
//! it opens a firewall hole for the requested protocol and port range, from the
//! client's public address only, for a limited time.
//!
//! The exchange looks like this:
//!
//! 1. The client works out its public IP address (see [`ipresolver`](crate::ipresolver))
//!    and whether it is behind NAT.
//! 1. It builds a [`Request`], signs it with its own RSA key, encrypts it to the
//!    server's RSA key, and sends it to the server (UDP port [`DEFAULT_SERVER_PORT`] by default).
//! 1. The server decrypts and verifies the request, checks it is fresh, asks its
//!    authorization policy how long to grant, and hands the grant to the
//!    [firewall tracker](crate::firewall).
//! 1. The server replies with a [`Response`] carrying the granted duration, signed by the
//!    server and encrypted to the client. A denied request gets no reply at all.
//!
//! There is no session. Every PDU stands alone, and the codec holds no state.
//!
//! ## Wire format
//!
//! Every PDU is `header ‖ body`, and never larger than [`MAX_PDU_SIZE`] bytes.
//!
//! * The [header] is not encrypted. It names the protocol version, the direction
//!   and the [cipher suite](crate::crypto).
//! * The body is signed, then encrypted; the signature covers the header too.
//!
//! Version 1 bodies have a fixed layout (see [`request`] and [`response`]) followed by
//! an optional [container](tlv) trailer.
//! Version 2 bodies are entirely [container](tlv) based; see [`tags`].
//!
//! ## Security properties
//!
//! * Only holders of a registered private key can get a hole opened.
//! * An eavesdropper learns nothing but the sizes and timing of datagrams.
//! * Replays are rejected by the server, which refuses stale timestamps and
//!   datagrams it has already seen.
//! * The response is authenticated, so a client cannot be fooled into believing
//!   it was granted access.
//!
//! ## See Also
//! * [RFC 5652 §6.3, content-encryption padding](https://www.rfc-editor.org/rfc/rfc5652#section-6.3)
//! * [RFC 4291 §2.5.5.2, IPv4-mapped IPv6 addresses](https://www.rfc-editor.org/rfc/rfc4291#section-2.5.5.2)
//! * [IANA protocol numbers](https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml)

mod error;
pub use error::{Error, Result};

mod fields;
pub use fields::{
    decode_ip, decode_ipv4, decode_ipv6, decode_port, decode_timestamp, decode_uuid,
    decode_varint, encode_ip, encode_port, encode_timestamp, encode_uuid, encode_varint,
    generate_nonce, validate_ports, Nonce, Protocol, NONCE_SIZE,
};

pub mod header;
pub use header::{Header, PduType, Version};

pub mod request;
pub use request::{Request, RequestData};

pub mod response;
pub use response::{Response, ResponseData};

mod seal;

pub mod tags;
pub mod tlv;

/// Largest PDU we will send or accept (a typical MTU, less IP and UDP headers)
pub const MAX_PDU_SIZE: usize = 1408;

/// UDP port the server listens on unless configured otherwise
pub const DEFAULT_SERVER_PORT: u16 = 22211;

static_assertions::const_assert_eq!(
    request::REQUEST_FIXED_LEN,
    8 + 16 + NONCE_SIZE + 1 + 2 + 2 + 16 + 16 + 4
);
static_assertions::const_assert_eq!(
    response::RESPONSE_FIXED_LEN,
    8 + NONCE_SIZE + 1 + 2 + 2 + 2 + 1 + 5
);
