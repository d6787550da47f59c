//! Container tags used by version 2 bodies
// (c) 2024 the OpenSPA developers

use super::tlv::Tag;

/// Outer container: the encrypted secure container
pub const ENCRYPTED_CONTAINER: Tag = 0x01;
/// Secure container: the signed inner container
pub const CONTAINER: Tag = 0x02;
/// Secure container: signature over `header ‖ inner container`
pub const SIGNATURE: Tag = 0x03;

/// Unix seconds, 8 bytes big-endian
pub const TIMESTAMP: Tag = 0x04;
/// 16 binary bytes
pub const CLIENT_DEVICE_UUID: Tag = 0x05;
/// 1 byte IANA protocol number
pub const FIREWALL_PROTOCOL: Tag = 0x06;
/// 2 bytes big-endian
pub const FIREWALL_PORT_START: Tag = 0x07;
/// 2 bytes big-endian
pub const FIREWALL_PORT_END: Tag = 0x08;
/// 16 bytes
pub const CLIENT_PUBLIC_IPV6: Tag = 0x09;
/// 16 bytes
pub const SERVER_PUBLIC_IPV6: Tag = 0x0A;
/// 4 bytes
pub const CLIENT_PUBLIC_IPV4: Tag = 0x0B;
/// 4 bytes
pub const SERVER_PUBLIC_IPV4: Tag = 0x0C;
/// 1 byte; bit 0 is the client-behind-NAT flag
pub const IP_INFO: Tag = 0x0D;
/// Random bytes
pub const NONCE: Tag = 0x0E;
/// Granted seconds, minimal big-endian
pub const DURATION: Tag = 0x0F;

/// Lowest tag available to applications for their own trailer entries
pub const FIRST_USER_TAG: Tag = 0x10;

/// Bit in [`IP_INFO`] marking a client behind NAT
pub const IP_INFO_BEHIND_NAT: u8 = 0x01;
