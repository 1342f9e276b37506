use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Local command execution helpers
pub mod local {
    use super::*;

    pub fn execute(program: &str, args: &[&str]) -> Result<Output> {
        execute_with_env(program, args, &[])
    }

    pub fn execute_with_env(program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<Output> {
        debug!(program, ?args, "executing");
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.envs(env.iter().copied());
        cmd.stdout(Stdio::piped()); // Capture stdout for parsing
        cmd.stderr(Stdio::piped()); // Capture stderr for error messages
        cmd.stdin(Stdio::null());
        cmd.output()
            .with_context(|| format!("Failed to execute command: {}", program))
    }

    pub fn execute_with_input(
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        input: &[u8],
    ) -> Result<Output> {
        debug!(program, ?args, bytes = input.len(), "executing with stdin");
        let mut child = Command::new(program)
            .args(args)
            .envs(env.iter().copied())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input)
                .with_context(|| format!("Failed to write stdin for: {}", program))?;
        }

        child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for command: {}", program))
    }

    pub fn execute_interactive(program: &str, args: &[&str]) -> Result<()> {
        debug!(program, ?args, "executing interactively");
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("Failed to execute interactive command: {}", program))?;

        if !status.success() {
            anyhow::bail!(
                "Command '{}' failed with exit code: {}",
                program,
                status.code().unwrap_or(1)
            );
        }
        Ok(())
    }

    /// Check if a command exists using native Rust (which crate)
    pub fn check_command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }
}

/// Trait for executing external programs
///
/// Every call to apt, systemctl, psql, radtest and friends goes through this
/// trait so callers can be exercised against scripted output.
pub trait CommandExecutor {
    /// Execute a command with captured output
    fn execute(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.execute_with_env(program, args, &[])
    }

    /// Execute a command with extra environment variables
    fn execute_with_env(&self, program: &str, args: &[&str], env: &[(&str, &str)])
    -> Result<Output>;

    /// Execute a command feeding `input` on stdin
    fn execute_with_input(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        input: &[u8],
    ) -> Result<Output>;

    /// Execute a command attached to the terminal
    fn execute_interactive(&self, program: &str, args: &[&str]) -> Result<()>;

    /// Check if a command exists on PATH
    fn check_command_exists(&self, command: &str) -> bool;
}

/// Executor that runs everything on the local machine
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl CommandExecutor for LocalExecutor {
    fn execute_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<Output> {
        local::execute_with_env(program, args, env)
    }

    fn execute_with_input(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        input: &[u8],
    ) -> Result<Output> {
        local::execute_with_input(program, args, env, input)
    }

    fn execute_interactive(&self, program: &str, args: &[&str]) -> Result<()> {
        local::execute_interactive(program, args)
    }

    fn check_command_exists(&self, command: &str) -> bool {
        local::check_command_exists(command)
    }
}

/// Stdout of a finished command, trimmed
pub fn output_text(output: &Output) -> String {
    crate::utils::string::bytes_to_string(&output.stdout)
}

/// Fail with stderr attached when the command exited non-zero
pub fn ensure_success(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = crate::utils::string::bytes_to_string(&output.stderr);
    let stdout = crate::utils::string::bytes_to_string(&output.stdout);
    let detail = if stderr.is_empty() { stdout } else { stderr };
    anyhow::bail!(
        "{} failed (exit code {}): {}",
        what,
        output.status.code().unwrap_or(-1),
        detail
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Unknown,
}

impl PackageManager {
    /// Detect the package manager available on the system
    pub fn detect(exec: &dyn CommandExecutor) -> Self {
        if exec.check_command_exists("apt-get") {
            PackageManager::Apt
        } else {
            PackageManager::Unknown
        }
    }

    /// Refresh package indexes
    pub fn update(&self, exec: &dyn CommandExecutor) -> Result<()> {
        match self {
            PackageManager::Apt => {
                let output = exec.execute_with_env(
                    "apt-get",
                    &["update", "-q"],
                    &[("DEBIAN_FRONTEND", "noninteractive")],
                )?;
                ensure_success(&output, "apt-get update")
            }
            PackageManager::Unknown => {
                anyhow::bail!("No supported package manager found (apt-get is required)")
            }
        }
    }

    /// Install multiple packages at once
    pub fn install_packages(&self, exec: &dyn CommandExecutor, packages: &[&str]) -> Result<()> {
        match self {
            PackageManager::Apt => {
                let mut args = vec!["install", "-y", "-q"];
                args.extend(packages.iter().copied());
                let output = exec.execute_with_env(
                    "apt-get",
                    &args,
                    &[("DEBIAN_FRONTEND", "noninteractive")],
                )?;
                ensure_success(&output, "apt-get install")
            }
            PackageManager::Unknown => {
                anyhow::bail!(
                    "No supported package manager found. Please install packages manually: {}",
                    packages.join(" ")
                );
            }
        }
    }

    /// Check whether a package is installed
    pub fn is_installed(&self, exec: &dyn CommandExecutor, package: &str) -> Result<bool> {
        match self {
            PackageManager::Apt => {
                let output = exec.execute("dpkg-query", &["-W", "-f=${Status}", package])?;
                Ok(output.status.success() && output_text(&output).contains("install ok installed"))
            }
            PackageManager::Unknown => Ok(false),
        }
    }

    /// Get display name for the package manager
    pub fn display_name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt (Debian/Ubuntu)",
            PackageManager::Unknown => "unknown",
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockExecutor;
    use super::*;

    #[test]
    fn test_detect_package_manager() {
        let exec = MockExecutor::new().with_commands(&["apt-get"]);
        assert_eq!(PackageManager::detect(&exec), PackageManager::Apt);

        let exec = MockExecutor::new();
        assert_eq!(PackageManager::detect(&exec), PackageManager::Unknown);
    }

    #[test]
    fn test_apt_install_is_noninteractive() {
        let exec = MockExecutor::new().with_commands(&["apt-get"]);
        PackageManager::Apt
            .install_packages(&exec, &["freeradius", "postgresql"])
            .unwrap();

        let calls = exec.calls_matching("apt-get install");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].args.contains(&"freeradius".to_string()));
        assert!(
            calls[0]
                .env
                .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()))
        );
    }

    #[test]
    fn test_is_installed_parses_status() {
        let exec = MockExecutor::new()
            .respond("dpkg-query -W -f=${Status} freeradius", 0, "install ok installed")
            .respond("dpkg-query", 1, "");
        assert!(PackageManager::Apt.is_installed(&exec, "freeradius").unwrap());
        assert!(!PackageManager::Apt.is_installed(&exec, "postgresql").unwrap());
    }

    #[test]
    fn test_ensure_success_reports_exit_code() {
        let exec = MockExecutor::new().respond("false", 3, "boom");
        let output = exec.execute("false", &[]).unwrap();
        let err = ensure_success(&output, "false").unwrap_err().to_string();
        assert!(err.contains("exit code 3"));
        assert!(err.contains("boom"));
    }
}
