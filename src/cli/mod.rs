//! Command Line Interface for openspa
// (c) 2024 the OpenSPA developers
mod args;
mod cli_main;
pub(crate) mod styles;
pub use cli_main::{cli, ExitStatus};
