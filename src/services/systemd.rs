use crate::utils::exec::{CommandExecutor, ensure_success};
use anyhow::Result;
use std::time::Duration;

/// Pause before checking a freshly restarted unit
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Thin wrapper over `systemctl` for one unit
pub struct Service<'a> {
    exec: &'a dyn CommandExecutor,
    pub unit: String,
    settle: Duration,
}

impl<'a> Service<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, unit: &str) -> Self {
        Self {
            exec,
            unit: unit.to_string(),
            settle: SETTLE_DELAY,
        }
    }

    /// Override the settle delay (tests use zero)
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn systemctl(&self, action: &str) -> Result<()> {
        tracing::info!(unit = %self.unit, action, "systemctl");
        let output = self.exec.execute("systemctl", &[action, &self.unit])?;
        ensure_success(&output, &format!("systemctl {} {}", action, self.unit))
    }

    pub fn start(&self) -> Result<()> {
        self.systemctl("start")
    }

    pub fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    pub fn restart(&self) -> Result<()> {
        self.systemctl("restart")
    }

    pub fn enable(&self) -> Result<()> {
        self.systemctl("enable")
    }

    pub fn is_active(&self) -> Result<bool> {
        let output = self
            .exec
            .execute("systemctl", &["is-active", "--quiet", &self.unit])?;
        Ok(output.status.success())
    }

    /// Wait for the unit to settle, then report whether it is active
    pub fn wait_active(&self) -> Result<bool> {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        self.is_active()
    }

    /// Restart and fail when the unit does not come up
    pub fn restart_and_verify(&self) -> Result<()> {
        self.restart()?;
        if !self.wait_active()? {
            anyhow::bail!(
                "{} is not running after restart. Check: journalctl -u {} -n 50",
                self.unit,
                self.unit
            );
        }
        Ok(())
    }
}
