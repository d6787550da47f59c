// (c) 2024 the OpenSPA developers
//! # OpenSPA: Single Packet Authorization
//!
//! A client that wants to reach a protected service sends the server one signed, encrypted
//! UDP datagram. If the server knows the client's key and its policy agrees, it opens the
//! firewall for the requested protocol and ports, from the client's public address only,
//! for a limited time, and answers with the duration it granted.
//!
//! The library is organised as:
//! * [`protocol`]: the PDU codec, with the wire format documented there
//! * [`crypto`]: cipher suites and key handling
//! * [`adk`]: the optional anti-DoS knocking proof
//! * [`firewall`]: the connection tracker and rule triggers
//! * [`server`] and [`client`]: the two ends
//! * [`ipresolver`]: public, outbound and NAT address discovery
//! * [`config`]: layered configuration
//!
//! The `openspa` binary is a thin wrapper around [`cli()`].

mod cli;
pub use cli::{cli, ExitStatus};

pub mod adk;
pub mod client;
pub mod config;
pub mod crypto;
pub mod firewall;
pub mod ipresolver;
pub mod protocol;
pub mod server;
/// Utilities
pub mod util;

/// Build-time info
pub mod build_info {
    /// Version string, including the git hash for untagged builds
    pub const VERSION_STRING: &str = env!("OPENSPA_VERSION_STRING");
    /// Short git hash of the build, or `unknown`
    pub const GIT_HASH: &str = env!("OPENSPA_BUILD_GIT_HASH");
}
