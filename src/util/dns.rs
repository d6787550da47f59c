// DNS helpers
// (c) 2024 the OpenSPA developers

use std::net::IpAddr;

use anyhow::Context as _;

use super::AddressFamily;

/// DNS lookup helper
///
/// Results can be restricted to a given address family.
/// Only the first matching result is returned.
/// If there are no matching records of the required type, returns an error.
/// A literal IP address is returned as-is, if it is of the right family.
pub fn lookup_host_by_family(host: &str, desired: AddressFamily) -> anyhow::Result<IpAddr> {
    let candidates = if let Ok(ip) = host.parse::<IpAddr>() {
        vec![ip]
    } else {
        dns_lookup::lookup_host(host).with_context(|| format!("host name lookup for {host} failed"))?
    };
    candidates
        .into_iter()
        .find(|addr| desired.matches(addr))
        .ok_or(anyhow::anyhow!("host {host} found, but not as {desired:?}"))
}
