// Sign-then-encrypt framing shared by requests and responses
// (c) 2024 the OpenSPA developers

use std::sync::Arc;

use tracing::trace;

use super::{
    error::{Error, Result},
    header::{Header, PduType, Version},
    tags,
    tlv::{Container, Tag},
    MAX_PDU_SIZE,
};
use crate::crypto::{CipherSuite, CipherSuites, Peer};

fn check_size(wire: Vec<u8>) -> Result<Vec<u8>> {
    if wire.len() > MAX_PDU_SIZE {
        return Err(Error::PduTooLarge(wire.len()));
    }
    Ok(wire)
}

/// Version 1: `header ‖ secure(body ‖ sign(header ‖ body))`
pub(super) fn seal_v1(
    header: &Header,
    body: &[u8],
    suite: &dyn CipherSuite,
    recipient: &Peer,
) -> Result<Vec<u8>> {
    let mut wire = header.encode();
    let mut signed = wire.clone();
    signed.extend_from_slice(body);
    let signature = suite.sign(&signed)?;

    let mut plaintext = Vec::with_capacity(body.len() + signature.len());
    plaintext.extend_from_slice(body);
    plaintext.extend_from_slice(&signature);
    wire.extend_from_slice(&suite.secure(recipient, &plaintext)?);
    check_size(wire)
}

/// Version 2: `header ‖ TLV{01: secure(TLV{02: inner, 03: sign(header ‖ inner)})}`
pub(super) fn seal_v2(
    header: &Header,
    inner: &[u8],
    suite: &dyn CipherSuite,
    recipient: &Peer,
) -> Result<Vec<u8>> {
    let mut wire = header.encode();
    let mut signed = wire.clone();
    signed.extend_from_slice(inner);
    let signature = suite.sign(&signed)?;

    let mut secure = Container::new();
    secure.set(tags::CONTAINER, inner);
    secure.set(tags::SIGNATURE, signature);

    let mut outer = Container::new();
    outer.set(
        tags::ENCRYPTED_CONTAINER,
        suite.secure(recipient, &secure.encode())?,
    );
    wire.extend_from_slice(&outer.encode());
    check_size(wire)
}

/// A decrypted but not yet verified PDU
#[derive(Debug)]
pub(super) struct Opened {
    pub(super) header: Header,
    pub(super) header_bytes: Vec<u8>,
    pub(super) suite: Arc<dyn CipherSuite>,
    pub(super) plaintext: Vec<u8>,
}

/// Parses the header, finds the suite and decrypts the body
pub(super) fn open(data: &[u8], expected: PduType, suites: &CipherSuites) -> Result<Opened> {
    if data.len() > MAX_PDU_SIZE {
        return Err(Error::PduTooLarge(data.len()));
    }
    let (header, header_len) = Header::decode(data)?;
    if header.pdu_type != expected {
        return Err(Error::invalid_field(
            "pdu type",
            format!("expected {expected}, got {}", header.pdu_type),
        ));
    }
    let suite = suites.get(header.cipher_suite)?;
    let body = &data[header_len..];
    let plaintext = match header.version {
        Version::V1 => suite.unlock(body)?,
        Version::V2 => {
            let outer = Container::parse(body);
            let envelope = outer
                .get(tags::ENCRYPTED_CONTAINER)
                .ok_or(Error::MissingField("encrypted container"))?;
            suite.unlock(&envelope)?
        }
    };
    trace!(
        "opened {} v{} ({} bytes plaintext)",
        header.pdu_type,
        header.version,
        plaintext.len()
    );
    Ok(Opened {
        header,
        header_bytes: data[..header_len].to_vec(),
        suite,
        plaintext,
    })
}

impl Opened {
    /// Checks `signature` over `header ‖ body`
    pub(super) fn verify(&self, signer: &Peer, body: &[u8], signature: &[u8]) -> Result<()> {
        let mut signed = self.header_bytes.clone();
        signed.extend_from_slice(body);
        if self.suite.verify(signer, &signed, signature)? {
            Ok(())
        } else {
            Err(Error::SignatureInvalid)
        }
    }

    /// Version 2: splits the secure container into (inner container bytes, signature)
    pub(super) fn split_v2(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let secure = Container::parse(&self.plaintext);
        let inner = secure
            .get(tags::CONTAINER)
            .ok_or(Error::MissingField("container"))?;
        let signature = secure
            .get(tags::SIGNATURE)
            .ok_or(Error::MissingField("signature"))?;
        Ok((inner, signature))
    }
}

/// Fetches a mandatory container entry
pub(super) fn required(c: &Container, tag: Tag, name: &'static str) -> Result<Vec<u8>> {
    c.get(tag).ok_or(Error::MissingField(name))
}

/// Appends the caller's trailer to a version 2 inner container.
/// Trailer tags must not collide with the protocol's own.
pub(super) fn append_trailer(inner: &mut Container, trailer: &Container) -> Result<()> {
    for node in trailer.iter() {
        if node.tag < tags::FIRST_USER_TAG {
            return Err(Error::invalid_field(
                "trailer",
                format!("tag {:#06x} is reserved", node.tag),
            ));
        }
        inner.set(node.tag, &node.value);
    }
    Ok(())
}

/// Collects the application entries of a version 2 inner container
pub(super) fn extract_trailer(inner: &Container) -> Container {
    let mut trailer = Container::new();
    for node in inner.iter().filter(|n| n.tag >= tags::FIRST_USER_TAG) {
        trailer.set(node.tag, &node.value);
    }
    trailer
}
