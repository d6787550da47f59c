//! General utility code that didn't fit anywhere else
// (c) 2024 the OpenSPA developers

mod address_family;
pub use address_family::AddressFamily;

mod cli;

mod dns;
pub use dns::lookup_host_by_family;

mod tracing;
#[cfg(test)]
pub(crate) use tracing::setup_tracing_for_tests;
pub use tracing::setup as setup_tracing;

mod port_range;
pub use port_range::PortRange;

/// Expands a leading `~` in a configured path
pub fn expand_path(path: &str) -> anyhow::Result<std::path::PathBuf> {
    use anyhow::Context as _;
    expanduser::expanduser(path).with_context(|| format!("could not expand path {path}"))
}

#[cfg(test)]
pub(crate) fn make_test_tempfile(
    data: &str,
    filename: &str,
) -> (std::path::PathBuf, tempfile::TempDir) {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join(filename);
    std::fs::write(&path, data).expect("Unable to write tempfile");
    (path, tempdir)
}
