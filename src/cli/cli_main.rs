// Main CLI entrypoint
// (c) 2024 the OpenSPA developers

use std::process::ExitCode;

use super::{
    args::{CliArgs, Command, GenClientArgs, KeygenArgs},
    styles::ERROR,
};

use crate::{
    adk,
    client::{client_main, RequestOptions},
    config::{Configuration, Manager},
    crypto::{generate_client, generate_key_pair, write_key_pair, KeyError, KeyKind},
    ipresolver,
    server::server_main,
    util::setup_tracing,
};
use anstream::{eprintln, println};
use clap::Parser;
use human_repr::HumanDuration as _;
use tracing::error_span;

/// Process exit statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[repr(u8)]
pub enum ExitStatus {
    /// Everything went to plan
    Success = 0,
    /// Anything not covered below
    Unexpected = 1,
    /// The configuration could not be read
    ConfigRead = 2,
    /// A public key file could not be read
    PublicKeyRead = 3,
    /// A private key file could not be read
    PrivateKeyRead = 4,
    /// A public key file did not contain a usable key
    PublicKeyDecode = 5,
    /// A private key file did not contain a usable key
    PrivateKeyDecode = 6,
}

impl From<ExitStatus> for ExitCode {
    fn from(value: ExitStatus) -> Self {
        ExitCode::from(value as u8)
    }
}

impl ExitStatus {
    /// Classifies an application error
    #[must_use]
    pub fn for_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<KeyError>() {
            Some(KeyError::Read {
                kind: KeyKind::Public,
                ..
            }) => ExitStatus::PublicKeyRead,
            Some(KeyError::Read {
                kind: KeyKind::Private,
                ..
            }) => ExitStatus::PrivateKeyRead,
            Some(KeyError::Decode {
                kind: KeyKind::Public,
                ..
            }) => ExitStatus::PublicKeyDecode,
            Some(KeyError::Decode {
                kind: KeyKind::Private,
                ..
            }) => ExitStatus::PrivateKeyDecode,
            _ => ExitStatus::Unexpected,
        }
    }
}

/// Main CLI entrypoint
///
/// Call this from `main`. It reads the command line, sets up logging and configuration,
/// and runs the chosen subcommand.
pub fn cli() -> anyhow::Result<ExitCode> {
    let args = CliArgs::parse();

    let mut manager = Manager::new();
    if let Some(path) = &args.config {
        manager.merge_toml_file(path);
    }
    manager.merge_provider(args.overrides.clone());

    match args.command {
        Command::ShowConfig => {
            println!("{}", manager.to_display_adapter::<Configuration>(true));
            return Ok(ExitStatus::Success.into());
        }
        Command::ConfigFiles => {
            for f in Manager::config_files() {
                println!("{f}");
            }
            return Ok(ExitStatus::Success.into());
        }
        Command::AdkSecret => {
            println!("{}", adk::generate_secret());
            return Ok(ExitStatus::Success.into());
        }
        _ => (),
    }

    let config = match manager.get::<Configuration>() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{ERROR}ERROR{ERROR:#} {e}");
            return Ok(ExitStatus::ConfigRead.into());
        }
    };
    setup_tracing(args.trace_level(), args.log_file.as_deref())
        .inspect_err(|e| eprintln!("{e:?}"))?;

    let result = match &args.command {
        Command::Server => run_server(&config),
        Command::Request(r) => run_request(&config, &RequestOptions::from(r)),
        Command::Ip => run_ip(&config),
        Command::Keygen(k) => run_keygen(&config, k),
        Command::GenClient(g) => run_gen_client(g),
        Command::ShowConfig | Command::ConfigFiles | Command::AdkSecret => Ok(()),
    };
    Ok(match result {
        Ok(()) => ExitStatus::Success,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitStatus::for_error(&e)
        }
    }
    .into())
}

#[tokio::main(flavor = "current_thread")]
async fn run_server(config: &Configuration) -> anyhow::Result<()> {
    let _span = error_span!("SERVER").entered();
    server_main(config).await
}

#[tokio::main(flavor = "current_thread")]
async fn run_request(config: &Configuration, options: &RequestOptions) -> anyhow::Result<()> {
    let granted = client_main(config, options).await?;
    if granted.duration == 0 {
        anyhow::bail!("the server granted no access");
    }
    let duration = std::time::Duration::from_secs(granted.duration.into());
    println!(
        "{} {} open for {}",
        granted.protocol,
        crate::util::PortRange {
            begin: granted.start_port,
            end: granted.end_port
        },
        duration.human_duration()
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn run_ip(config: &Configuration) -> anyhow::Result<()> {
    let family = config.address_family;
    let found = ipresolver::resolve(config.echo_ip_url_for(family), family).await?;
    println!("Outbound IP: {}", found.outbound);
    println!("Public IP:   {}", found.public);
    println!("Behind NAT:  {}", found.behind_nat);
    Ok(())
}

fn run_keygen(config: &Configuration, args: &KeygenArgs) -> anyhow::Result<()> {
    let private_path = match &args.key_file {
        Some(p) => p.clone(),
        None => config.private_key_path()?,
    };
    let public_path = match &args.pub_file {
        Some(p) => p.clone(),
        None => config.public_key_path()?,
    };
    write_key_pair(&generate_key_pair()?, &private_path, &public_path)?;
    println!("Private key: {}", private_path.display());
    println!("Public key:  {}", public_path.display());
    Ok(())
}

fn run_gen_client(args: &GenClientArgs) -> anyhow::Result<()> {
    let bundle = generate_client(&args.server_key, &args.output)?;
    println!("Device ID:   {}", bundle.device_id);
    println!("Config file: {}", bundle.config.display());
    println!(
        "Install {} in the server's client_keys directory.",
        bundle.server_copy.display()
    );
    Ok(())
}
