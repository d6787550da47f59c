//! Configuration structure
// (c) 2024 the OpenSPA developers

use std::{net::IpAddr, path::PathBuf, time::Duration};

use anyhow::Context as _;
use figment::{
    value::{Dict, Map, Value},
    Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use struct_field_names_as_array::FieldNamesAsSlice;

use crate::{
    adk::Adk,
    protocol::{Version, DEFAULT_SERVER_PORT},
    util::{expand_path, AddressFamily},
};

/// The set of configurable options supported by openspa.
///
/// **Note:** The implementation of `default()` for this struct returns openspa's hard-wired configuration defaults.
///
/// Command-line options are collected separately in [`Overrides`], which holds only the values
/// the user actually entered. Wherever the user does not provide a value, values read from lower
/// priority sources (configuration files and system defaults) obtain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, FieldNamesAsSlice)]
pub struct Configuration {
    // SERVER ======================================================================================
    /// Address the server binds to
    pub listen: IpAddr,
    /// Server UDP port; the client sends to this port
    pub port: u16,
    /// Directory of client public keys, one `<device-uuid>.pem` per client
    pub client_keys: String,
    /// Command asked how long to grant a request for. It prints the number of seconds; 0 denies.
    pub authorization_command: String,
    /// Seconds granted when there is no authorization command
    pub default_duration: u16,
    /// Command that opens a firewall rule
    pub rule_add_command: String,
    /// Command that closes a firewall rule
    pub rule_remove_command: String,
    /// Seconds of clock skew tolerated; requests stamped further away are dropped
    pub replay_window: u32,

    // KEYS ========================================================================================
    /// Our RSA private key (PEM)
    pub private_key: String,
    /// Our RSA public key (PEM); checked against the private key at startup
    pub public_key: String,

    // CLIENT ======================================================================================
    /// The server's RSA public key (PEM)
    pub server_public_key: String,
    /// This client's device identifier
    pub device_id: String,
    /// Echo-IP service used to discover our public IPv4 address
    pub echo_ip_url: String,
    /// Echo-IP service used to discover our public IPv6 address
    pub echo_ip_url_v6: String,
    /// Seconds to wait for a response
    pub timeout: u16,
    /// Restricts server name lookup to one address family
    pub address_family: AddressFamily,
    /// Protocol version to send (1 or 2)
    pub protocol_version: u8,

    // BOTH ========================================================================================
    /// Shared anti-DoS knocking secret. Empty disables it.
    /// When set, the server drops requests without a valid proof and the client must send
    /// protocol version 2.
    pub adk_secret: String,
}

impl Default for Configuration {
    /// **(Unusual!)**
    /// Returns openspa's hard-wired configuration defaults.
    fn default() -> Self {
        Self {
            listen: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_SERVER_PORT,
            client_keys: "/etc/openspa/clients".into(),
            authorization_command: String::new(),
            default_duration: 60,
            rule_add_command: String::new(),
            rule_remove_command: String::new(),
            replay_window: 300,

            private_key: "~/.openspa/private.pem".into(),
            public_key: "~/.openspa/public.pem".into(),

            server_public_key: "~/.openspa/server.pem".into(),
            device_id: uuid::Uuid::nil().to_string(),
            echo_ip_url: "https://api.ipify.org?format=json".into(),
            echo_ip_url_v6: "https://api6.ipify.org?format=json".into(),
            timeout: 5,
            address_family: AddressFamily::Any,
            protocol_version: 1,

            adk_secret: String::new(),
        }
    }
}

impl Configuration {
    /// Accessor for `timeout`, as a Duration
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout.into())
    }

    /// Accessor for `replay_window`, as a Duration
    #[must_use]
    pub fn replay_window_duration(&self) -> Duration {
        Duration::from_secs(self.replay_window.into())
    }

    /// The configured protocol version
    pub fn version(&self) -> anyhow::Result<Version> {
        Version::try_from(self.protocol_version)
            .with_context(|| format!("protocol_version {} is invalid", self.protocol_version))
    }

    /// The device id, checked
    pub fn device_uuid(&self) -> anyhow::Result<uuid::Uuid> {
        uuid::Uuid::parse_str(&self.device_id)
            .with_context(|| format!("device_id {} is not a UUID", self.device_id))
    }

    /// The anti-DoS knocking configuration, if enabled
    pub fn adk(&self) -> anyhow::Result<Option<Adk>> {
        if self.adk_secret.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Adk::new(&self.adk_secret).context("adk_secret is invalid")?))
    }

    /// The Echo-IP service for an address family (`Any` uses the IPv4 service)
    #[must_use]
    pub fn echo_ip_url_for(&self, family: AddressFamily) -> &str {
        match family {
            AddressFamily::V6 => &self.echo_ip_url_v6,
            AddressFamily::Any | AddressFamily::V4 => &self.echo_ip_url,
        }
    }

    /// Path to our private key, with `~` expanded
    pub fn private_key_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.private_key)
    }
    /// Path to our public key, with `~` expanded
    pub fn public_key_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.public_key)
    }
    /// Path to the server's public key, with `~` expanded
    pub fn server_public_key_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.server_public_key)
    }
    /// Path to the client key directory, with `~` expanded
    pub fn client_keys_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.client_keys)
    }
}

/// Configuration options which may be given on the command line.
///
/// Every member is optional; only those the user entered take part in the merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, clap::Args, Serialize)]
pub struct Overrides {
    /// Server UDP port (the server listens on it; the client sends to it)
    #[arg(
        short = 'P',
        long = "server-port",
        value_name("PORT"),
        help_heading("Configuration")
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Our RSA private key file
    #[arg(long, value_name("FILE"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Our RSA public key file
    #[arg(long, value_name("FILE"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// The server's RSA public key file
    #[arg(long, value_name("FILE"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_public_key: Option<String>,

    /// This client's device identifier
    #[arg(long, value_name("UUID"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Seconds to wait for a response
    #[arg(short, long, value_name("sec"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u16>,

    /// Restricts server name lookup to one address family
    #[arg(long, value_name("FAMILY"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_family: Option<AddressFamily>,

    /// Protocol version to send
    #[arg(long, value_name("1|2"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u8>,
}

impl Provider for Overrides {
    fn metadata(&self) -> Metadata {
        Metadata::named("command-line").interpolater(|_profile, path| {
            let key = match path.last().copied() {
                None => "<unknown>".to_string(),
                Some("port") => "server-port".to_string(),
                Some(s) => s.replace('_', "-"),
            };
            format!("--{key}")
        })
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let dict = match Value::serialize(self)? {
            Value::Dict(_, dict) => dict,
            _ => Dict::new(),
        };
        let mut profile_map = Map::new();
        let _ = profile_map.insert(Profile::Global, dict);
        Ok(profile_map)
    }
}

#[cfg(test)]
mod test {
    use super::{Configuration, Overrides};
    use crate::{protocol::Version, util::AddressFamily};
    use figment::Provider as _;

    #[test]
    fn flattened() {
        let v = Configuration::default();
        let j = serde_json::to_value(&v).unwrap();
        assert!(j.get("replay_window").is_some());
        assert_eq!(j["port"], 22211);
        assert_eq!(j["listen"], "0.0.0.0");
        assert_eq!(j["address_family"], "any");
    }

    #[test]
    fn accessors() {
        let mut c = Configuration::default();
        assert_eq!(c.version().unwrap(), Version::V1);
        assert!(c.device_uuid().unwrap().is_nil());
        assert_eq!(c.timeout_duration().as_secs(), 5);
        assert_eq!(c.replay_window_duration().as_secs(), 300);
        assert_eq!(c.echo_ip_url_for(AddressFamily::Any), c.echo_ip_url);
        assert_eq!(c.echo_ip_url_for(AddressFamily::V6), c.echo_ip_url_v6);
        c.protocol_version = 3;
        let _ = c.version().unwrap_err();
        c.device_id = "not-a-uuid".into();
        let _ = c.device_uuid().unwrap_err();

        assert!(c.adk().unwrap().is_none());
        c.adk_secret = "7O4ZIRI".into();
        assert!(c.adk().unwrap().is_some());
        c.adk_secret = "short".into();
        let _ = c.adk().unwrap_err();
    }

    #[test]
    fn only_entered_values_are_provided() {
        let o = Overrides {
            port: Some(1234),
            address_family: Some(AddressFamily::V6),
            ..Default::default()
        };
        let data = o.data().unwrap();
        let dict = data.get(&figment::Profile::Global).unwrap();
        assert_eq!(dict.len(), 2);
        assert!(dict.contains_key("port"));
        assert!(dict.contains_key("address_family"));
    }

    #[test]
    fn fields_are_named_as_flags() {
        let meta = Overrides::default().metadata();
        let global = figment::Profile::Global;
        assert_eq!(meta.interpolate(&global, &["port"]), "--server-port");
        assert_eq!(
            meta.interpolate(&global, &["address_family"]),
            "--address-family"
        );
        let empty: [&str; 0] = [];
        assert_eq!(meta.interpolate(&global, &empty), "--<unknown>");
    }
}
