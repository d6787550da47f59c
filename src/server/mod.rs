// (c) 2024 the OpenSPA developers
//! # OpenSPA server
//!
//! The server listens on a single UDP socket. Each datagram is handled in its own task:
//!
//! 1. If anti-DoS knocking is enabled, check the [ADK proof](crate::adk) in the header.
//! 1. Decode the [`Request`], which checks the client's signature against its key in the
//!    client key directory. This runs on the blocking thread pool.
//! 1. Refuse it if it is stale or a repeat (see [`ReplayGuard`]).
//! 1. Ask the [`Authorizer`] how long to grant.
//! 1. Hand the grant to the [firewall tracker](crate::firewall::Tracker), which opens the
//!    rule or extends an existing one.
//! 1. Reply to the datagram's source address with a signed, encrypted [`Response`].
//!
//! Anything that fails is logged and the datagram dropped. Denied requests get no reply.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use chrono::Utc;
use tokio::{net::UdpSocket, sync::oneshot};
use tracing::{debug, info, trace, trace_span, warn, Instrument as _};

use crate::{
    adk::Adk,
    config::Configuration,
    crypto::{
        check_pair, read_private_key, read_public_key, CipherSuite, CipherSuites, KeyDirectory,
        Peer, RsaSuite,
    },
    firewall::{Admission, CommandTrigger, Host, ShutdownReport, Tracker},
    protocol::{Header, Request, Response, MAX_PDU_SIZE},
};

mod authorize;
pub use authorize::{Authorizer, CommandAuthorizer, FixedDuration};

mod replay;
pub use replay::{ReplayError, ReplayGuard};

/// Everything the receive path needs
#[derive(Debug)]
pub struct Server {
    suite: Arc<dyn CipherSuite>,
    suites: Arc<CipherSuites>,
    replay: ReplayGuard,
    authorizer: Arc<dyn Authorizer>,
    tracker: Arc<Tracker>,
    adk: Option<Adk>,
}

impl Server {
    /// Constructor
    #[must_use]
    pub fn new(
        suite: Arc<dyn CipherSuite>,
        authorizer: Arc<dyn Authorizer>,
        tracker: Arc<Tracker>,
        replay_window: Duration,
    ) -> Self {
        let suites = Arc::new(CipherSuites::new().with(Arc::clone(&suite)));
        Self {
            suite,
            suites,
            replay: ReplayGuard::new(replay_window),
            authorizer,
            tracker,
            adk: None,
        }
    }

    /// Requires every request to carry a valid ADK proof (builder style)
    #[must_use]
    pub fn with_adk(mut self, adk: Adk) -> Self {
        self.adk = Some(adk);
        self
    }

    /// The connection tracker
    #[must_use]
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Runs the request pipeline for one datagram.
    ///
    /// Returns the encoded response to send back, or `None` if the request was denied.
    pub async fn handle_datagram(
        &self,
        datagram: &[u8],
        from: SocketAddr,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(adk) = &self.adk {
            let (header, _) = Header::decode(datagram).context("undecodable header")?;
            anyhow::ensure!(
                adk.verify_at(header.adk_proof, Utc::now().timestamp()),
                "missing or invalid ADK proof"
            );
        }
        // RSA work and client key file reads block, so keep them off the runtime threads
        let suites = Arc::clone(&self.suites);
        let wire = datagram.to_vec();
        let request = tokio::task::spawn_blocking(move || Request::decode(&wire, &suites))
            .await?
            .context("undecodable request")?;
        let data = &request.data;
        trace!(
            "request from {device} for {protocol} {start}-{end} to {client}",
            device = data.device_id,
            protocol = data.protocol,
            start = data.start_port,
            end = data.end_port,
            client = data.client_ip,
        );
        if from.ip() != data.client_ip && !data.behind_nat {
            debug!(
                "datagram came from {} but asks for {}",
                from.ip(),
                data.client_ip
            );
        }

        self.replay
            .check(datagram, request.timestamp, Utc::now().timestamp())
            .await?;

        let granted = self
            .authorizer
            .authorize(&request)
            .await
            .context("authorization failed")?;
        if granted == 0 {
            info!("denied {device}", device = data.device_id);
            return Ok(None);
        }

        let host = Host::from_request(data, Duration::from_secs(granted.into()));
        match self.tracker.admit(host).await? {
            Admission::Added(id) => info!("granted {} {granted}s as {id}", data.device_id),
            Admission::Extended(id) => info!("extended {id} for {} by {granted}s", data.device_id),
        }

        let device = uuid::Uuid::parse_str(&data.device_id)?;
        let response = Response::for_request(&request, granted)
            .encode(self.suite.as_ref(), &Peer::Client(device))?;
        Ok(Some(response))
    }

    /// Serves requests on `socket` until `done` fires, then returns the shutdown report
    pub async fn run(
        self: Arc<Self>,
        socket: UdpSocket,
        done: oneshot::Receiver<ShutdownReport>,
    ) -> anyhow::Result<ShutdownReport> {
        let socket = Arc::new(socket);
        info!("listening on {}", socket.local_addr()?);
        tokio::pin!(done);
        // One extra byte, so oversized datagrams are detectably truncated
        let mut buf = vec![0u8; MAX_PDU_SIZE + 1];
        loop {
            tokio::select! {
                report = &mut done => {
                    let report = report.context("shutdown signal went away")?;
                    return Ok(report);
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("receive failed: {e}");
                            continue;
                        }
                    };
                    if len > MAX_PDU_SIZE {
                        debug!("dropping oversized datagram from {from}");
                        continue;
                    }
                    let datagram = buf[..len].to_vec();
                    let server = Arc::clone(&self);
                    let socket = Arc::clone(&socket);
                    let _ = tokio::spawn(
                        async move {
                            match server.handle_datagram(&datagram, from).await {
                                Ok(Some(reply)) => {
                                    if let Err(e) = socket.send_to(&reply, from).await {
                                        warn!("failed to send response: {e}");
                                    }
                                }
                                Ok(None) => (),
                                Err(e) => debug!("dropped datagram: {e:#}"),
                            }
                        }
                        .instrument(trace_span!("datagram", %from)),
                    );
                }
            }
        }
    }
}

/// Completes on SIGINT or (on unix) SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => (),
                    _ = term.recv() => (),
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Builds our cipher suite from the configured keys
fn load_suite(config: &Configuration) -> anyhow::Result<Arc<RsaSuite>> {
    let private = read_private_key(&config.private_key_path()?)?;
    let public = read_public_key(&config.public_key_path()?)?;
    check_pair(&private, &public)?;
    let clients = KeyDirectory::new(config.client_keys_path()?);
    Ok(Arc::new(RsaSuite::new(private, Arc::new(clients))?))
}

/// Server main loop
#[allow(clippy::module_name_repetitions)]
pub async fn server_main(config: &Configuration) -> anyhow::Result<()> {
    let suite = load_suite(config)?;

    let authorizer: Arc<dyn Authorizer> = if config.authorization_command.trim().is_empty() {
        debug!(
            "no authorization command; granting {}s",
            config.default_duration
        );
        Arc::new(FixedDuration(config.default_duration))
    } else {
        Arc::new(CommandAuthorizer::new(config.authorization_command.clone()))
    };
    let trigger = CommandTrigger::new(
        Some(config.rule_add_command.clone()),
        Some(config.rule_remove_command.clone()),
    );
    let tracker = Tracker::new(Arc::new(trigger));
    let done = tracker.shutdown_on(shutdown_signal());

    let addr = SocketAddr::new(config.listen, config.port);
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let mut server = Server::new(suite, authorizer, tracker, config.replay_window_duration());
    if let Some(adk) = config.adk()? {
        info!("anti-DoS knocking enabled");
        server = server.with_adk(adk);
    }
    let report = Arc::new(server).run(socket, done).await?;
    info!(
        "shut down: {} connections served, {} stuck",
        report.unique_connections, report.stuck
    );
    if report.stuck > 0 {
        warn!("some firewall rules may not have been removed");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{net::IpAddr, sync::Arc, time::Duration};

    use assertables::assert_contains;
    use tokio::net::UdpSocket;

    use super::{FixedDuration, Server};
    use crate::{
        adk::Adk,
        crypto::{test_keys, CipherSuites, KeyDirectory, RsaSuite},
        firewall::{CommandTrigger, ShutdownReport, Tracker},
        protocol::{Protocol, Request, RequestData, Response, Version},
        util::setup_tracing_for_tests,
    };

    fn server(duration: u16) -> Arc<Server> {
        let tracker = Tracker::new(Arc::new(CommandTrigger::default()));
        Arc::new(Server::new(
            test_keys::server_suite(),
            Arc::new(FixedDuration(duration)),
            tracker,
            Duration::from_secs(300),
        ))
    }

    fn request(version: Version, port: u16) -> Request {
        Request::new(
            version,
            crate::crypto::CipherSuiteId::RsaSha256Aes256Cbc,
            RequestData {
                device_id: test_keys::DEVICE_ID.into(),
                protocol: Protocol::Tcp,
                start_port: port,
                end_port: port,
                client_ip: IpAddr::from([127, 0, 0, 1]),
                server_ip: IpAddr::from([127, 0, 0, 1]),
                behind_nat: false,
            },
        )
        .unwrap()
    }

    fn client_suites() -> CipherSuites {
        CipherSuites::new().with(test_keys::client_suite())
    }

    #[tokio::test]
    async fn grant_and_reply() {
        let s = server(90);
        let req = request(Version::V2, 22);
        let wire = req.encode(test_keys::client_suite().as_ref()).unwrap();
        let reply = s
            .handle_datagram(&wire, "127.0.0.1:40000".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        let resp = Response::decode(&reply, &client_suites()).unwrap();
        assert_eq!(resp.data.duration, 90);
        assert_eq!(resp.header.transaction_id, req.header.transaction_id);
        assert_eq!(s.tracker().len().await, 1);
    }

    #[tokio::test]
    async fn replay_dropped() {
        let s = server(90);
        let wire = request(Version::V1, 22)
            .encode(test_keys::client_suite().as_ref())
            .unwrap();
        let from = "127.0.0.1:40000".parse().unwrap();
        let _ = s.handle_datagram(&wire, from).await.unwrap().unwrap();
        let _ = s.handle_datagram(&wire, from).await.unwrap_err();
    }

    #[tokio::test]
    async fn same_rule_extends() {
        let s = server(90);
        let from = "127.0.0.1:40000".parse().unwrap();
        for _ in 0..2 {
            let wire = request(Version::V1, 22)
                .encode(test_keys::client_suite().as_ref())
                .unwrap();
            let _ = s.handle_datagram(&wire, from).await.unwrap().unwrap();
        }
        assert_eq!(s.tracker().len().await, 1);
    }

    #[tokio::test]
    async fn denied_gets_no_reply() {
        let s = server(0);
        let wire = request(Version::V1, 22)
            .encode(test_keys::client_suite().as_ref())
            .unwrap();
        let reply = s
            .handle_datagram(&wire, "127.0.0.1:40000".parse().unwrap())
            .await
            .unwrap();
        assert!(reply.is_none());
        assert!(s.tracker().is_empty().await);
    }

    #[tokio::test]
    async fn garbage_dropped() {
        setup_tracing_for_tests();
        let s = server(90);
        let from = "127.0.0.1:40000".parse().unwrap();
        let _ = s.handle_datagram(&[0x10, 0x01, 1, 2, 3], from).await.unwrap_err();
        let _ = s.handle_datagram(&[], from).await.unwrap_err();
    }

    #[tokio::test]
    async fn over_udp() {
        setup_tracing_for_tests();
        let s = server(30);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(Arc::clone(&s).run(socket, rx));

        let req = request(Version::V1, 443);
        let resp = crate::client::exchange(
            test_keys::client_suite(),
            &req,
            addr,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(resp.data.duration, 30);
        assert_eq!(resp.data.start_port, 443);

        let report = s.tracker().shutdown().await;
        tx.send(report).unwrap();
        assert_eq!(
            handle.await.unwrap().unwrap(),
            ShutdownReport {
                unique_connections: 1,
                stuck: 0
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn client_keys_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let suite = Arc::new(
            RsaSuite::new(
                test_keys::private(test_keys::SERVER_PRIVATE),
                Arc::new(KeyDirectory::new(dir.path())),
            )
            .unwrap(),
        );
        let s = Server::new(
            suite,
            Arc::new(FixedDuration(45)),
            Tracker::new(Arc::new(CommandTrigger::default())),
            Duration::from_secs(300),
        );
        let from = "127.0.0.1:40000".parse().unwrap();

        // Unknown until its key file appears; no restart needed
        let first = request(Version::V2, 22)
            .encode(test_keys::client_suite().as_ref())
            .unwrap();
        let _ = s.handle_datagram(&first, from).await.unwrap_err();

        std::fs::write(
            dir.path().join(format!("{}.pem", test_keys::DEVICE_ID)),
            test_keys::CLIENT_PUBLIC,
        )
        .unwrap();
        let second = request(Version::V2, 22)
            .encode(test_keys::client_suite().as_ref())
            .unwrap();
        let reply = s.handle_datagram(&second, from).await.unwrap().unwrap();
        let resp = Response::decode(&reply, &client_suites()).unwrap();
        assert_eq!(resp.data.duration, 45);
    }

    #[tokio::test]
    async fn adk_gate() {
        let adk = Adk::new("7O4ZIRI").unwrap();
        let s = Server::new(
            test_keys::server_suite(),
            Arc::new(FixedDuration(20)),
            Tracker::new(Arc::new(CommandTrigger::default())),
            Duration::from_secs(300),
        )
        .with_adk(adk.clone());
        let from = "127.0.0.1:40000".parse().unwrap();
        let encode = |req: Request| req.encode(test_keys::client_suite().as_ref()).unwrap();

        let without = encode(request(Version::V2, 22));
        let err = s.handle_datagram(&without, from).await.unwrap_err();
        assert_contains!(err.to_string(), "ADK proof");

        let wrong = Adk::new("3HRZN3Y").unwrap().proof_now();
        let forged = encode(request(Version::V2, 22).with_adk_proof(wrong).unwrap());
        let _ = s.handle_datagram(&forged, from).await.unwrap_err();

        // Version 1 cannot carry a proof at all
        let old = encode(request(Version::V1, 22));
        let _ = s.handle_datagram(&old, from).await.unwrap_err();

        let good = encode(
            request(Version::V2, 22)
                .with_adk_proof(adk.proof_now())
                .unwrap(),
        );
        let reply = s.handle_datagram(&good, from).await.unwrap().unwrap();
        let resp = Response::decode(&reply, &client_suites()).unwrap();
        assert_eq!(resp.data.duration, 20);
        assert_eq!(resp.header.adk_proof, 0);
    }
}
