// (c) 2024 the OpenSPA developers
//! # OpenSPA client
//!
//! Sends one request and waits for the server's answer.
//!
//! Addresses the user does not give are discovered: the server name is looked up in the DNS,
//! our public address is asked of an Echo-IP service, and we are considered to be behind NAT
//! if that differs from the address our default route uses
//! (see [`ipresolver`](crate::ipresolver)).
//!
//! With an `adk_secret` configured, requests carry an [ADK proof](crate::adk).

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, info, trace};

use crate::{
    config::Configuration,
    crypto::{read_private_key, read_public_key, CipherSuite, CipherSuites, KeyRing, Peer, RsaSuite},
    ipresolver,
    protocol::{Protocol, Request, RequestData, Response, ResponseData, MAX_PDU_SIZE},
    util::{lookup_host_by_family, AddressFamily, PortRange},
};

/// What the user asked for on the command line
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Server host name or address
    pub host: String,
    /// Protocol to open
    pub protocol: Protocol,
    /// Ports to open
    pub ports: PortRange,
    /// Our public address, if known; otherwise discovered
    pub client_ip: Option<IpAddr>,
    /// The server's public address, if different from what the name resolves to
    pub server_ip: Option<IpAddr>,
    /// Claims we are behind NAT; otherwise discovered
    pub behind_nat: bool,
}

/// Sends `request` to `server` and waits up to `wait` for a valid response.
///
/// Datagrams from anyone else, and anything that does not decode and verify as the response
/// to this request, are ignored.
pub async fn exchange(
    suite: Arc<dyn CipherSuite>,
    request: &Request,
    server: SocketAddr,
    wait: Duration,
) -> anyhow::Result<Response> {
    let wire = request.encode(suite.as_ref())?;
    let suites = CipherSuites::new().with(suite);

    let bind: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;
    let _ = socket
        .send_to(&wire, server)
        .await
        .with_context(|| format!("failed to send to {server}"))?;
    debug!("sent {} byte request to {server}", wire.len());

    let receive = async {
        let mut buf = vec![0u8; MAX_PDU_SIZE + 1];
        loop {
            let (len, from) = socket.recv_from(&mut buf).await?;
            if from != server {
                trace!("ignoring datagram from {from}");
                continue;
            }
            match Response::decode(&buf[..len], &suites) {
                Ok(r) if answers(&r, request) => return anyhow::Ok(r),
                Ok(_) => trace!("ignoring response to some other request"),
                Err(e) => debug!("ignoring invalid response: {e}"),
            }
        }
    };
    timeout(wait, receive)
        .await
        .with_context(|| format!("no response from {server} within {}s", wait.as_secs()))?
}

fn answers(response: &Response, request: &Request) -> bool {
    response.header.version == request.header.version
        && response.header.transaction_id == request.header.transaction_id
        && response.data.protocol == request.data.protocol
        && response.data.start_port == request.data.start_port
        && response.data.end_port == request.data.end_port
}

fn load_suite(config: &Configuration) -> anyhow::Result<Arc<RsaSuite>> {
    let private = read_private_key(&config.private_key_path()?)?;
    let server = read_public_key(&config.server_public_key_path()?)?;
    let ring = KeyRing::new().with(Peer::Server, server);
    Ok(Arc::new(RsaSuite::new(private, Arc::new(ring))?))
}

/// Client main entrypoint: builds, sends and awaits one request
pub async fn client_main(
    config: &Configuration,
    options: &RequestOptions,
) -> anyhow::Result<ResponseData> {
    let suite = load_suite(config)?;
    let version = config.version()?;
    let device = config.device_uuid()?;

    let server_addr = lookup_host_by_family(&options.host, config.address_family)?;
    let server_ip = options.server_ip.unwrap_or(server_addr);

    let (client_ip, behind_nat) = if let Some(ip) = options.client_ip {
        (ip, options.behind_nat)
    } else {
        // The request carries both addresses, so they must share a family
        let family = AddressFamily::from(server_ip);
        let found = ipresolver::resolve(config.echo_ip_url_for(family), family).await?;
        debug!(
            "public address {}, outbound address {}",
            found.public, found.outbound
        );
        (found.public, options.behind_nat || found.behind_nat)
    };

    let mut request = Request::new(
        version,
        suite.id(),
        RequestData {
            device_id: device.to_string(),
            protocol: options.protocol,
            start_port: options.ports.begin,
            end_port: options.ports.end,
            client_ip,
            server_ip,
            behind_nat,
        },
    )?;
    if let Some(adk) = config.adk()? {
        request = request
            .with_adk_proof(adk.proof_now())
            .context("adk_secret requires protocol_version 2")?;
    }
    info!(
        "requesting {} {} for {client_ip} from {}",
        options.protocol, options.ports, options.host
    );
    let response = exchange(
        suite,
        &request,
        SocketAddr::new(server_addr, config.port),
        config.timeout_duration(),
    )
    .await?;
    Ok(response.data)
}
