// (c) 2024 the OpenSPA developers
//! # Configuration management
//!
//! openspa obtains run-time configuration from the following sources, in order:
//! 1. Command-line options
//! 1. A configuration file given with `--config` (which must exist)
//! 1. The user's configuration file (`~/.openspa.toml`)
//! 1. The system-wide configuration file (`/etc/openspa.toml`)
//! 1. Hard-wired defaults
//!
//! Each option may appear in multiple places, but only the first match is used.
//!
//! ## File format
//!
//! Configuration files are [TOML](https://toml.io/).
//!
//! ### Example
//!
//! ```toml
//! # Server
//! listen = "0.0.0.0"
//! client_keys = "/etc/openspa/clients"
//! rule_add_command = "/usr/local/sbin/openspa-rule-add"
//! rule_remove_command = "/usr/local/sbin/openspa-rule-remove"
//! default_duration = 120
//!
//! # Client
//! device_id = "8f97e69c-1bb1-4d2f-8cb0-24f2e874254d"
//! server_public_key = "~/.openspa/server.pem"
//! address_family = 4
//!
//! # Both ends, if anti-DoS knocking is wanted (see `openspa adk-secret`)
//! adk_secret = "7O4ZIRI"
//! protocol_version = 2
//! ```
//!
//! ## Configurable options
//!
//! The full list of supported fields is defined by [Configuration].
//!
//! On the command line:
//! * `openspa show-config` outputs a list of supported fields, their current values, and where each value came from.
//! * `openspa config-files` outputs the list of configuration files consulted.

mod structure;
pub use structure::{Configuration, Overrides};

mod manager;
pub use manager::{DisplayAdapter, Manager};

pub(crate) const BASE_CONFIG_FILENAME: &str = "openspa.toml";
