use crate::config::Settings;
use crate::services::diagnostics::{self, Status};
use crate::utils::exec::CommandExecutor;
use anyhow::Result;

/// Handle diagnostics command; exits non-zero when any check failed
pub fn handle_diagnostics(exec: &dyn CommandExecutor, settings: &Settings, log_lines: usize) -> Result<()> {
    let report = diagnostics::run(exec, settings, log_lines);
    report.print();

    if report.has_failures() {
        anyhow::bail!("{} diagnostic check(s) failed", report.count(Status::Fail));
    }
    Ok(())
}
