// Firewall trigger that runs external commands
// (c) 2024 the OpenSPA developers

use std::net::IpAddr;

use anyhow::Context as _;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{FirewallTrigger, Host};

/// Environment variable through which commands learn the connection id
pub const CONNECTION_ID_ENV: &str = "OPENSPA_CONNECTION_ID";

/// Runs the configured add and remove commands.
///
/// Each command is invoked with the arguments:
/// `device_id family client_ip family server_ip protocol start_port end_port behind_nat duration`,
/// where `family` is `ipv4` or `ipv6`, the protocol is lowercase, and `behind_nat` is `1` or `0`.
/// A non-zero exit status is a failure. When a command is not configured the event is only logged.
#[derive(Debug, Clone, Default)]
pub struct CommandTrigger {
    add: Option<String>,
    remove: Option<String>,
}

impl CommandTrigger {
    /// Constructor. Empty strings count as not configured.
    #[must_use]
    pub fn new(add: Option<String>, remove: Option<String>) -> Self {
        let nonempty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        Self {
            add: nonempty(add),
            remove: nonempty(remove),
        }
    }
}

fn family(ip: IpAddr) -> &'static str {
    if ip.is_ipv4() {
        "ipv4"
    } else {
        "ipv6"
    }
}

pub(super) fn command_args(host: &Host) -> Vec<String> {
    vec![
        host.device_id.clone(),
        family(host.client_ip).into(),
        host.client_ip.to_string(),
        family(host.server_ip).into(),
        host.server_ip.to_string(),
        host.protocol.to_string().to_lowercase(),
        host.start_port.to_string(),
        host.end_port.to_string(),
        if host.behind_nat { "1" } else { "0" }.into(),
        host.duration.as_secs().to_string(),
    ]
}

async fn run(command: &str, connection_id: &str, host: &Host) -> anyhow::Result<()> {
    let args = command_args(host);
    debug!("running {command} {}", args.join(" "));
    let status = tokio::process::Command::new(command)
        .args(&args)
        .env(CONNECTION_ID_ENV, connection_id)
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("failed to run {command}"))?;
    anyhow::ensure!(status.success(), "{command} failed: {status}");
    Ok(())
}

#[async_trait]
impl FirewallTrigger for CommandTrigger {
    async fn addition(&self, connection_id: &str, host: &Host) -> anyhow::Result<()> {
        match &self.add {
            Some(cmd) => run(cmd, connection_id, host).await,
            None => {
                info!("no rule add command configured; would open {host}");
                Ok(())
            }
        }
    }

    async fn expiration(&self, connection_id: &str, host: &Host) -> anyhow::Result<()> {
        match &self.remove {
            Some(cmd) => run(cmd, connection_id, host).await,
            None => {
                info!("no rule remove command configured; would close {host}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{net::IpAddr, time::Duration};

    use super::{command_args, CommandTrigger};
    use crate::{
        firewall::{FirewallTrigger as _, Host},
        protocol::Protocol,
    };

    fn host() -> Host {
        Host {
            device_id: "8f97e69c-1bb1-4d2f-8cb0-24f2e874254d".into(),
            client_ip: IpAddr::from([1, 2, 3, 4]),
            server_ip: "2001:db8::1".parse().unwrap(),
            protocol: Protocol::Udp,
            start_port: 5000,
            end_port: 5010,
            behind_nat: true,
            created_at: chrono::Utc::now(),
            duration: Duration::from_secs(90),
        }
    }

    #[test]
    fn arguments() {
        assert_eq!(
            command_args(&host()),
            vec![
                "8f97e69c-1bb1-4d2f-8cb0-24f2e874254d",
                "ipv4",
                "1.2.3.4",
                "ipv6",
                "2001:db8::1",
                "udp",
                "5000",
                "5010",
                "1",
                "90"
            ]
        );
    }

    #[tokio::test]
    async fn unconfigured_only_logs() {
        let t = CommandTrigger::new(None, Some("  ".into()));
        t.addition("c1", &host()).await.unwrap();
        t.expiration("c1", &host()).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status() {
        let t = CommandTrigger::new(Some("true".into()), Some("false".into()));
        t.addition("c1", &host()).await.unwrap();
        assert!(t.expiration("c1", &host()).await.is_err());

        let missing = CommandTrigger::new(Some("/nonexistent/openspa-rule".into()), None);
        assert!(missing.addition("c1", &host()).await.is_err());
    }
}
