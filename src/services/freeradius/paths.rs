use crate::utils::exec::CommandExecutor;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Locations FreeRADIUS packages install their configuration to
pub const CANDIDATE_DIRS: &[&str] = &["/etc/freeradius/3.0", "/etc/freeradius", "/etc/raddb"];

/// Resolved FreeRADIUS configuration tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    pub root: PathBuf,
}

impl ConfigLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn radiusd_conf(&self) -> PathBuf {
        self.root.join("radiusd.conf")
    }

    pub fn clients_conf(&self) -> PathBuf {
        self.root.join("clients.conf")
    }

    pub fn sql_available(&self) -> PathBuf {
        self.root.join("mods-available").join("sql")
    }

    pub fn sql_enabled(&self) -> PathBuf {
        self.root.join("mods-enabled").join("sql")
    }

    pub fn site_default(&self) -> PathBuf {
        self.root.join("sites-available").join("default")
    }

    pub fn site_inner_tunnel(&self) -> PathBuf {
        self.root.join("sites-available").join("inner-tunnel")
    }

    pub fn policy_dir(&self) -> PathBuf {
        self.root.join("policy.d")
    }

    pub fn openvpn_policy(&self) -> PathBuf {
        self.policy_dir().join("openvpn")
    }

    pub fn postgresql_schema(&self) -> PathBuf {
        self.root
            .join("mods-config")
            .join("sql")
            .join("main")
            .join("postgresql")
            .join("schema.sql")
    }
}

fn is_config_dir(dir: &Path) -> bool {
    dir.join("radiusd.conf").is_file()
}

/// Find the configuration directory: explicit setting first, then the
/// well-known package locations
pub fn discover(explicit: Option<&Path>) -> Result<ConfigLayout> {
    discover_in(explicit, CANDIDATE_DIRS.iter().map(Path::new))
}

fn discover_in<'a>(
    explicit: Option<&Path>,
    candidates: impl Iterator<Item = &'a Path>,
) -> Result<ConfigLayout> {
    if let Some(dir) = explicit {
        if !is_config_dir(dir) {
            anyhow::bail!(
                "FreeRADIUS configuration directory {} has no radiusd.conf",
                dir.display()
            );
        }
        return Ok(ConfigLayout::new(dir));
    }

    let mut tried = Vec::new();
    for dir in candidates {
        if is_config_dir(dir) {
            tracing::debug!(dir = %dir.display(), "found FreeRADIUS configuration");
            return Ok(ConfigLayout::new(dir));
        }
        tried.push(dir.display().to_string());
    }

    anyhow::bail!(
        "FreeRADIUS configuration directory not found (tried: {}).\n\nInstall FreeRADIUS with `radctl install` or set RADIUS_CONFIG_DIR.",
        tried.join(", ")
    )
}

/// Name of the FreeRADIUS daemon binary (`freeradius` on Debian, `radiusd` elsewhere)
pub fn daemon_binary(exec: &dyn CommandExecutor) -> Option<&'static str> {
    ["freeradius", "radiusd"]
        .into_iter()
        .find(|bin| exec.check_command_exists(bin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::exec::testing::MockExecutor;
    use std::fs;

    #[test]
    fn test_discover_first_candidate_with_radiusd_conf() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("freeradius");
        let real = dir.path().join("raddb");
        fs::create_dir_all(&empty).unwrap();
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("radiusd.conf"), "").unwrap();

        let layout = discover_in(None, [empty.as_path(), real.as_path()].into_iter()).unwrap();
        assert_eq!(layout.root, real);
        assert_eq!(layout.clients_conf(), real.join("clients.conf"));
    }

    #[test]
    fn test_discover_reports_tried_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = discover_in(None, [missing.as_path()].into_iter())
            .unwrap_err()
            .to_string();
        assert!(err.contains("not found"));
        assert!(err.contains("nope"));
    }

    #[test]
    fn test_explicit_dir_must_be_valid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(Some(dir.path())).is_err());
        fs::write(dir.path().join("radiusd.conf"), "").unwrap();
        assert_eq!(discover(Some(dir.path())).unwrap().root, dir.path());
    }

    #[test]
    fn test_daemon_binary() {
        let exec = MockExecutor::new().with_commands(&["radiusd"]);
        assert_eq!(daemon_binary(&exec), Some("radiusd"));
        assert_eq!(daemon_binary(&MockExecutor::new()), None);
    }

    #[test]
    fn test_schema_path() {
        let layout = ConfigLayout::new("/etc/freeradius/3.0");
        assert_eq!(
            layout.postgresql_schema(),
            PathBuf::from("/etc/freeradius/3.0/mods-config/sql/main/postgresql/schema.sql")
        );
    }
}
