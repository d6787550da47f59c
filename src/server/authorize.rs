// Authorization policy
// (c) 2024 the OpenSPA developers

use anyhow::Context as _;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::protocol::Request;

/// Decides how long a verified request may have access for.
///
/// By the time this is asked, the request's signature and freshness have already been checked.
/// Zero means denied.
#[async_trait]
pub trait Authorizer: Send + Sync + std::fmt::Debug {
    /// Returns the number of seconds to grant
    async fn authorize(&self, request: &Request) -> anyhow::Result<u16>;
}

/// Grants every signed request the same duration
#[derive(Debug, Clone, Copy)]
pub struct FixedDuration(pub u16);

#[async_trait]
impl Authorizer for FixedDuration {
    async fn authorize(&self, _request: &Request) -> anyhow::Result<u16> {
        Ok(self.0)
    }
}

/// Asks an external command.
///
/// The command is invoked with the arguments
/// `device_id client_ip server_ip protocol start_port end_port timestamp signature_method behind_nat`
/// and must print the granted number of seconds at the start of its output.
/// A non-zero exit status denies the request.
#[derive(Debug, Clone)]
pub struct CommandAuthorizer {
    command: String,
}

impl CommandAuthorizer {
    /// Constructor
    #[must_use]
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

pub(super) fn command_args(request: &Request) -> Vec<String> {
    let d = &request.data;
    vec![
        d.device_id.clone(),
        d.client_ip.to_string(),
        d.server_ip.to_string(),
        d.protocol.to_string(),
        d.start_port.to_string(),
        d.end_port.to_string(),
        request.timestamp.to_string(),
        request.header.cipher_suite.signature_method().to_string(),
        if d.behind_nat { "1" } else { "0" }.into(),
    ]
}

/// Reads the leading integer of the command's output. Values beyond the protocol's range are clamped.
pub(super) fn parse_duration(output: &str) -> anyhow::Result<u16> {
    let output = output.trim_start();
    let digits: &str = &output[..output
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(output.len())];
    anyhow::ensure!(
        !digits.is_empty(),
        "authorization command did not print a duration"
    );
    let value: u64 = digits.parse().context("invalid duration")?;
    Ok(u16::try_from(value).unwrap_or(u16::MAX))
}

#[async_trait]
impl Authorizer for CommandAuthorizer {
    async fn authorize(&self, request: &Request) -> anyhow::Result<u16> {
        let device = &request.data.device_id;
        debug!("authorization command is deciding for {device}");
        let output = tokio::process::Command::new(&self.command)
            .args(command_args(request))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.command))?;
        if !output.status.success() {
            warn!(
                "authorization command failed for {device}: {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            anyhow::bail!("authorization command failed: {}", output.status);
        }
        let duration = parse_duration(&String::from_utf8_lossy(&output.stdout))?;
        debug!("authorization command granted {device} {duration}s");
        Ok(duration)
    }
}

#[cfg(test)]
mod test {
    use std::net::IpAddr;

    use super::{command_args, parse_duration, Authorizer as _, CommandAuthorizer, FixedDuration};
    use crate::{
        crypto::{test_keys::DEVICE_ID, CipherSuiteId},
        protocol::{Protocol, Request, RequestData, Version},
    };

    fn request() -> Request {
        Request::new(
            Version::V1,
            CipherSuiteId::RsaSha256Aes256Cbc,
            RequestData {
                device_id: DEVICE_ID.into(),
                protocol: Protocol::Tcp,
                start_port: 22,
                end_port: 22,
                client_ip: IpAddr::from([203, 0, 113, 9]),
                server_ip: IpAddr::from([198, 51, 100, 1]),
                behind_nat: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("60\n").unwrap(), 60);
        assert_eq!(parse_duration("  3600 seconds").unwrap(), 3600);
        assert_eq!(parse_duration("0").unwrap(), 0);
        assert_eq!(parse_duration("999999").unwrap(), u16::MAX);
        let _ = parse_duration("").unwrap_err();
        let _ = parse_duration("denied").unwrap_err();
        let _ = parse_duration("-5").unwrap_err();
    }

    #[test]
    fn arguments() {
        let r = request();
        let args = command_args(&r);
        assert_eq!(args.len(), 9);
        assert_eq!(args[0], DEVICE_ID);
        assert_eq!(args[1], "203.0.113.9");
        assert_eq!(args[2], "198.51.100.1");
        assert_eq!(args[3], "TCP");
        assert_eq!(args[4..6], ["22", "22"]);
        assert_eq!(args[6], r.timestamp.to_string());
        assert_eq!(args[7], "1");
        assert_eq!(args[8], "0");
    }

    #[tokio::test]
    async fn fixed() {
        assert_eq!(FixedDuration(45).authorize(&request()).await.unwrap(), 45);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_denies() {
        let a = CommandAuthorizer::new("false".into());
        let _ = a.authorize(&request()).await.unwrap_err();
        let a = CommandAuthorizer::new("/nonexistent/openspa-auth".into());
        let _ = a.authorize(&request()).await.unwrap_err();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn leading_integer_of_output() {
        // echo prints its arguments; the first is the device id "8f97e69c-..."
        let a = CommandAuthorizer::new("echo".into());
        assert_eq!(a.authorize(&request()).await.unwrap(), 8);
    }
}
