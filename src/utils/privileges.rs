use anyhow::Result;
use nix::unistd::geteuid;

/// Whether the process runs with an effective uid of 0
pub fn is_root() -> bool {
    geteuid().is_root()
}

/// Fail with a clear message unless running as root
pub fn require_root(operation: &str) -> Result<()> {
    if !is_root() {
        anyhow::bail!(
            "'{}' must be run as root (current user: {}). Re-run with sudo.",
            operation,
            whoami::username()
        );
    }
    Ok(())
}
