// (c) 2024 the OpenSPA developers

//! Discovers the client's addresses.
//!
//! * The _outbound_ address is the one the kernel picks when talking to the internet.
//!   We find it by connecting a UDP socket (which sends nothing) and reading its local address.
//! * The _public_ address is the one the rest of the world sees. We ask an Echo-IP service,
//!   which replies with JSON such as `{"ip":"203.0.113.9"}`.
//!
//! If the two differ, the client is behind NAT.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context as _;
use reqwest::StatusCode;
use tracing::debug;

use crate::util::AddressFamily;

const ROUTE_TARGET_V4: &str = "1.1.1.1:80";
const ROUTE_TARGET_V6: &str = "[2606:4700:4700::1111]:80";

/// Default time limit for the Echo-IP request
pub const ECHO_IP_TIMEOUT: Duration = Duration::from_secs(10);

/// What we learned about our addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Local address of the default route
    pub outbound: IpAddr,
    /// Address seen by the Echo-IP service
    pub public: IpAddr,
    /// Whether the two differ
    pub behind_nat: bool,
}

/// NAT check: if the outbound address is not the public address, something is translating
#[must_use]
pub fn behind_nat(outbound: IpAddr, public: IpAddr) -> bool {
    outbound != public
}

/// Extracts the address from an Echo-IP response.
///
/// A JSON object with an `ip` (or `ipv4`) member is expected; member names are matched
/// case-insensitively. A bare address in plain text is accepted too.
pub fn parse_echo_response(status: StatusCode, body: &str) -> anyhow::Result<IpAddr> {
    anyhow::ensure!(status.is_success(), "Echo-IP service returned {status}");
    let body = body.trim();
    if let Ok(ip) = body.parse::<IpAddr>() {
        return Ok(ip);
    }
    let json: serde_json::Value =
        serde_json::from_str(body).context("Echo-IP response was neither JSON nor an address")?;
    let object = json
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Echo-IP response was not a JSON object"))?;
    let field = ["ip", "ipv4"]
        .iter()
        .find_map(|want| {
            object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(want))
                .map(|(_, v)| v)
        })
        .ok_or_else(|| anyhow::anyhow!("Echo-IP response has no ip field"))?;
    let text = field
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Echo-IP ip field is not a string"))?;
    text.trim()
        .parse()
        .with_context(|| format!("Echo-IP returned an invalid address {text:?}"))
}

/// Asks the Echo-IP service at `url` for our public address, which must be of `family`
pub async fn public_ip(
    client: &reqwest::Client,
    url: &str,
    family: AddressFamily,
) -> anyhow::Result<IpAddr> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Echo-IP request to {url} failed"))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .context("failed to read Echo-IP response")?;
    debug!("Echo-IP response {status}: {body}");
    let ip = parse_echo_response(status, &body)?;
    anyhow::ensure!(
        family.matches(&ip),
        "Echo-IP service at {url} returned {ip}, which is not an IPv{family} address"
    );
    Ok(ip)
}

/// Finds the local address the kernel uses to reach the internet, for the given family
/// (`Any` means IPv4)
pub async fn outbound_ip(family: AddressFamily) -> anyhow::Result<IpAddr> {
    let (bind, target) = match family {
        AddressFamily::Any | AddressFamily::V4 => ("0.0.0.0:0", ROUTE_TARGET_V4),
        AddressFamily::V6 => ("[::]:0", ROUTE_TARGET_V6),
    };
    let bind: SocketAddr = bind.parse()?;
    let target: SocketAddr = target.parse()?;
    let socket = tokio::net::UdpSocket::bind(bind).await?;
    socket
        .connect(target)
        .await
        .with_context(|| format!("no route to {target}"))?;
    Ok(socket.local_addr()?.ip())
}

/// Builds the HTTP client used for Echo-IP requests.
/// A specific family pins the client's local address, so the service sees that family.
pub fn http_client(family: AddressFamily) -> anyhow::Result<reqwest::Client> {
    let local: Option<IpAddr> = match family {
        AddressFamily::Any => None,
        AddressFamily::V4 => Some(Ipv4Addr::UNSPECIFIED.into()),
        AddressFamily::V6 => Some(Ipv6Addr::UNSPECIFIED.into()),
    };
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .timeout(ECHO_IP_TIMEOUT)
        .local_address(local)
        .build()
        .context("failed to build HTTP client")
}

/// Discovers our public and outbound addresses in `family`, and whether we are behind NAT
pub async fn resolve(echo_ip_url: &str, family: AddressFamily) -> anyhow::Result<Resolution> {
    let client = http_client(family)?;
    let public = public_ip(&client, echo_ip_url, family).await?;
    let outbound = outbound_ip(AddressFamily::from(public)).await?;
    Ok(Resolution {
        outbound,
        public,
        behind_nat: behind_nat(outbound, public),
    })
}
