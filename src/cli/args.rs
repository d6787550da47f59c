// OpenSPA top-level command-line arguments
// (c) 2024 the OpenSPA developers

use std::{net::IpAddr, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    client::RequestOptions,
    config::Overrides,
    protocol::Protocol,
    util::PortRange,
};

#[derive(Debug, Parser, Clone)]
#[command(
    author,
    version(crate::build_info::VERSION_STRING),
    about,
    before_help = "e.g.   openspa request my-server --protocol tcp --port 22",
    infer_long_args(true)
)]
#[command(help_template(
    "\
{name} version {version}
{about-with-newline}
{usage-heading} {usage}
{before-help}
{all-args}{after-help}
"
))]
#[command(styles=super::styles::CLAP_STYLES)]
pub(crate) struct CliArgs {
    #[command(subcommand)]
    pub(crate) command: Command,

    // DEBUG ==================================================================================
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=openspa=trace` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, global(true), help_heading("Debug"))]
    pub(crate) debug: bool,

    /// Quiet mode: reports only errors
    #[arg(
        short,
        long,
        action,
        global(true),
        conflicts_with("debug"),
        help_heading("Debug")
    )]
    pub(crate) quiet: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        short('l'),
        long,
        action,
        global(true),
        help_heading("Debug"),
        value_name("FILE")
    )]
    pub(crate) log_file: Option<String>,

    // CONFIGURATION ==========================================================================
    /// Reads an additional configuration file, which must exist.
    /// Its settings override the system and user files.
    #[arg(short('c'), long, global(true), value_name("FILE"), help_heading("Configuration"))]
    pub(crate) config: Option<String>,

    #[command(flatten)]
    pub(crate) overrides: Overrides,
}

#[derive(Debug, Subcommand, Clone)]
pub(crate) enum Command {
    /// Runs the SPA server
    Server,
    /// Asks a server to open its firewall for us
    Request(RequestArgs),
    /// Shows our outbound and public IP addresses, and whether we are behind NAT
    Ip,
    /// Outputs the configuration, then exits.
    ///
    /// This shows every supported field, its current value, and where the value came from.
    ShowConfig,
    /// Outputs the paths to configuration file(s), then exits
    ConfigFiles,
    /// Generates a key pair
    Keygen(KeygenArgs),
    /// Provisions a new client: device id, key pair and configuration file
    GenClient(GenClientArgs),
    /// Generates a fresh anti-DoS knocking secret for `adk_secret`
    AdkSecret,
}

#[derive(Debug, clap::Args, Clone)]
pub(crate) struct KeygenArgs {
    /// Where to write the private key [default: the configured `private_key`]
    #[arg(short('k'), long, value_name("FILE"))]
    pub(crate) key_file: Option<PathBuf>,

    /// Where to write the public key [default: the configured `public_key`]
    #[arg(short('p'), long, value_name("FILE"))]
    pub(crate) pub_file: Option<PathBuf>,
}

#[derive(Debug, clap::Args, Clone)]
pub(crate) struct GenClientArgs {
    /// The server's public key
    #[arg(long, value_name("FILE"))]
    pub(crate) server_key: PathBuf,

    /// Directory to create the client's directory in
    #[arg(short('o'), long, value_name("DIR"), default_value("."))]
    pub(crate) output: PathBuf,
}

#[derive(Debug, clap::Args, Clone)]
pub(crate) struct RequestArgs {
    /// The server, as a host name or address
    pub(crate) host: String,

    /// Protocol to open
    #[arg(long, value_enum, ignore_case(true))]
    pub(crate) protocol: Protocol,

    /// Port or port range to open, e.g. `22` or `5000-5010`.
    /// Use 0 for protocols without ports.
    #[arg(long, value_name("M-N"))]
    pub(crate) port: PortRange,

    /// Our public address [default: asks the Echo-IP service]
    #[arg(long, value_name("IP"))]
    pub(crate) client_ip: Option<IpAddr>,

    /// The server's public address [default: the address HOST resolves to]
    #[arg(long, value_name("IP"))]
    pub(crate) server_ip: Option<IpAddr>,

    /// Declares that we are behind NAT [default: detected]
    #[arg(long, action)]
    pub(crate) behind_nat: bool,
}

impl From<&RequestArgs> for RequestOptions {
    fn from(value: &RequestArgs) -> Self {
        Self {
            host: value.host.clone(),
            protocol: value.protocol,
            ports: value.port,
            client_ip: value.client_ip,
            server_ip: value.server_ip,
            behind_nat: value.behind_nat,
        }
    }
}

impl CliArgs {
    /// The tracing level implied by the debug flags
    pub(crate) fn trace_level(&self) -> &'static str {
        if self.debug {
            "trace"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}
