// (c) 2024 the OpenSPA developers

//! # Firewall connection tracking
//!
//! The server never touches the firewall itself. It keeps a [`Tracker`] of the holes it has
//! asked for, and calls out to a [`FirewallTrigger`] to add or remove each rule.
//!
//! Every live connection has exactly one expiration timer. When it fires the
//! trigger is asked to remove the rule, and the connection moves to the tracker's history.
//! If removal fails the connection becomes _stuck_: the firewall may still hold the rule,
//! and an operator needs to reconcile it by hand.
//!
//! On shutdown the tracker stops admitting new connections, removes every live one,
//! and reports how it went.

use std::{fmt::Display, net::IpAddr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::protocol::{Protocol, RequestData};

mod tracker;
pub use tracker::{Admission, ShutdownReport, Tracker, SHUTDOWN_DRAIN};

mod trigger;
pub use trigger::{CommandTrigger, CONNECTION_ID_ENV};

/// Tracker failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The tracker refused the connection (shutting down, or duplicate id)
    #[error("connection rejected: {0}")]
    Rejected(String),
    /// The addition trigger failed, so the connection was not admitted
    #[error("addition trigger failed: {0}")]
    Trigger(String),
    /// The expiration trigger failed; the connection is now stuck
    #[error("expiration trigger failed, connection is stuck: {0}")]
    Stuck(String),
    /// No live connection has this id
    #[error("unknown connection {0}")]
    UnknownConnection(String),
}

/// A grant of access through the firewall
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Client device identifier
    pub device_id: String,
    /// Address to admit
    pub client_ip: IpAddr,
    /// Address the client was talking to
    pub server_ip: IpAddr,
    /// Protocol to admit
    pub protocol: Protocol,
    /// First port
    pub start_port: u16,
    /// Last port, inclusive
    pub end_port: u16,
    /// Whether the client is behind NAT
    pub behind_nat: bool,
    /// When the grant was made
    pub created_at: DateTime<Utc>,
    /// The originally granted duration
    pub duration: Duration,
}

impl Host {
    /// Describes the grant for a verified request
    #[must_use]
    pub fn from_request(data: &RequestData, duration: Duration) -> Self {
        Self {
            device_id: data.device_id.clone(),
            client_ip: data.client_ip,
            server_ip: data.server_ip,
            protocol: data.protocol,
            start_port: data.start_port,
            end_port: data.end_port,
            behind_nat: data.behind_nat,
            created_at: Utc::now(),
            duration,
        }
    }

    /// Whether two hosts describe the same firewall rule (ignoring timing)
    #[must_use]
    pub fn same_rule(&self, other: &Host) -> bool {
        self.device_id == other.device_id
            && self.protocol == other.protocol
            && self.start_port == other.start_port
            && self.end_port == other.end_port
            && self.client_ip == other.client_ip
            && self.server_ip == other.server_ip
            && self.behind_nat == other.behind_nat
    }
}

impl Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}-{} {} -> {}",
            self.device_id,
            self.protocol,
            self.start_port,
            self.end_port,
            self.client_ip,
            self.server_ip
        )?;
        if self.behind_nat {
            write!(f, " (NAT)")?;
        }
        Ok(())
    }
}

/// A renewal of an existing grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    /// When the grant was extended
    pub extended_at: DateTime<Utc>,
    /// The new horizon, counted from `extended_at`
    pub duration: Duration,
}

/// A connection that was removed cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostHistory {
    /// Connection id
    pub connection_id: String,
    /// The grant
    pub host: Host,
    /// When the rule was removed
    pub revoked: DateTime<Utc>,
    /// Renewals, oldest first
    pub extensions: Vec<Extension>,
}

/// A connection whose firewall rule could not be removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckConnection {
    /// Connection id
    pub connection_id: String,
    /// The grant
    pub host: Host,
    /// When removal failed
    pub since: DateTime<Utc>,
    /// Renewals, oldest first
    pub extensions: Vec<Extension>,
    /// Why removal failed
    pub error: String,
}

/// Adds and removes firewall rules.
///
/// The tracker holds its lock while calling these, so calls for the same connection
/// never overlap.
#[async_trait]
pub trait FirewallTrigger: Send + Sync + std::fmt::Debug {
    /// Opens the firewall for `host`
    async fn addition(&self, connection_id: &str, host: &Host) -> anyhow::Result<()>;
    /// Closes the rule previously opened for `host`
    async fn expiration(&self, connection_id: &str, host: &Host) -> anyhow::Result<()>;
}
