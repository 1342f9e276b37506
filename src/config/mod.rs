//! Settings resolution
//!
//! Precedence, lowest to highest: built-in defaults, the TOML settings file,
//! environment variables (a `.env` in the working directory is loaded first),
//! command-line flags applied by the individual commands.

pub mod config_manager;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "radius".to_string(),
            user: "radius".to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadiusSettings {
    /// FreeRADIUS configuration directory; discovered when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    pub service: String,
    /// Shared secret of the localhost client
    pub secret: String,
    pub test_user: String,
    pub test_password: String,
    /// FreeRADIUS daemon log
    pub daemon_log: PathBuf,
}

impl Default for RadiusSettings {
    fn default() -> Self {
        Self {
            config_dir: None,
            service: "freeradius".to_string(),
            secret: "testing123".to_string(),
            test_user: "testuser".to_string(),
            test_password: "testpass".to_string(),
            daemon_log: PathBuf::from("/var/log/freeradius/radius.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenVpnSettings {
    pub nas_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nas_secret: Option<String>,
    pub nas_identifier: String,
    pub server_conf: PathBuf,
    pub plugin_config: PathBuf,
    pub plugin_path: PathBuf,
    pub service: String,
}

impl Default for OpenVpnSettings {
    fn default() -> Self {
        Self {
            nas_ip: "127.0.0.1".to_string(),
            nas_secret: None,
            nas_identifier: "openvpn".to_string(),
            server_conf: PathBuf::from("/etc/openvpn/server/server.conf"),
            plugin_config: PathBuf::from("/etc/openvpn/radiusplugin.cnf"),
            plugin_path: PathBuf::from("/usr/lib/openvpn/radiusplugin.so"),
            service: "openvpn-server@server".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub radius: RadiusSettings,
    pub openvpn: OpenVpnSettings,
    pub backup_dir: PathBuf,
    /// Operation log written by radctl
    pub log_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            radius: RadiusSettings::default(),
            openvpn: OpenVpnSettings::default(),
            backup_dir: PathBuf::from("/var/backups/radius"),
            log_file: PathBuf::from("/var/log/radius/radius.log"),
        }
    }
}

impl Settings {
    /// Overlay environment variables using `lookup` (std::env::var in production)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RADIUS_DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("RADIUS_DB_PORT") {
            self.database.port = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid RADIUS_DB_PORT: {}", v))?;
        }
        if let Some(v) = get("RADIUS_DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("RADIUS_DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("RADIUS_DB_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Some(v) = get("RADIUS_SECRET") {
            self.radius.secret = v;
        }
        if let Some(v) = get("RADIUS_CONFIG_DIR") {
            self.radius.config_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("RADIUS_SERVICE") {
            self.radius.service = v;
        }
        if let Some(v) = get("RADIUS_TEST_USER") {
            self.radius.test_user = v;
        }
        if let Some(v) = get("RADIUS_TEST_PASSWORD") {
            self.radius.test_password = v;
        }
        if let Some(v) = get("RADIUS_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RADIUS_LOG_FILE") {
            self.log_file = PathBuf::from(v);
        }
        if let Some(v) = get("OPENVPN_NAS_IP") {
            self.openvpn.nas_ip = v;
        }
        if let Some(v) = get("OPENVPN_NAS_SECRET") {
            self.openvpn.nas_secret = Some(v);
        }
        if let Some(v) = get("OPENVPN_NAS_IDENTIFIER") {
            self.openvpn.nas_identifier = v;
        }
        if let Some(v) = get("OPENVPN_SERVER_CONF") {
            self.openvpn.server_conf = PathBuf::from(v);
        }
        if let Some(v) = get("OPENVPN_PLUGIN_CONFIG") {
            self.openvpn.plugin_config = PathBuf::from(v);
        }
        if let Some(v) = get("OPENVPN_PLUGIN_PATH") {
            self.openvpn.plugin_path = PathBuf::from(v);
        }
        Ok(())
    }
}

/// Settings plus the file they were (or will be) persisted to
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub path: PathBuf,
}

impl LoadedConfig {
    /// Record the database password in the settings file only, so values
    /// that came from the environment are not written back
    pub fn persist_database_password(&mut self, password: &str) -> Result<()> {
        let mut on_disk = config_manager::load_settings_file(&self.path)?;
        on_disk.database.password = Some(password.to_string());
        config_manager::save_settings_file(&self.path, &on_disk)?;
        self.settings.database.password = Some(password.to_string());
        Ok(())
    }
}

/// Load `.env`, the settings file, and the environment
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    // A missing .env is normal
    let _ = dotenv::dotenv();

    let path = config_manager::get_config_file_path(explicit)?;
    let mut settings = config_manager::load_settings_file(&path)?;
    settings.apply_env(|key| std::env::var(key).ok())?;

    tracing::debug!(path = %path.display(), "settings loaded");
    Ok(LoadedConfig { settings, path })
}

/// Example `.env` listing every recognised variable
pub const EXAMPLE_ENV: &str = r#"# radctl configuration
# Copy to .env in the directory you run radctl from, or export the variables.

# PostgreSQL
RADIUS_DB_HOST=localhost
RADIUS_DB_PORT=5432
RADIUS_DB_NAME=radius
RADIUS_DB_USER=radius
# RADIUS_DB_PASSWORD=  (generated by `radctl install` when unset)

# FreeRADIUS
# RADIUS_CONFIG_DIR=/etc/freeradius/3.0
RADIUS_SERVICE=freeradius
RADIUS_SECRET=testing123
RADIUS_TEST_USER=testuser
RADIUS_TEST_PASSWORD=testpass

# radctl
RADIUS_BACKUP_DIR=/var/backups/radius
RADIUS_LOG_FILE=/var/log/radius/radius.log

# OpenVPN integration
OPENVPN_NAS_IP=127.0.0.1
# OPENVPN_NAS_SECRET=  (generated when unset)
OPENVPN_NAS_IDENTIFIER=openvpn
OPENVPN_SERVER_CONF=/etc/openvpn/server/server.conf
OPENVPN_PLUGIN_CONFIG=/etc/openvpn/radiusplugin.cnf
OPENVPN_PLUGIN_PATH=/usr/lib/openvpn/radiusplugin.so
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let vars = env(&[
            ("RADIUS_DB_HOST", "db.internal"),
            ("RADIUS_DB_PORT", "6543"),
            ("RADIUS_DB_PASSWORD", "pw"),
            ("RADIUS_CONFIG_DIR", "/etc/raddb"),
            ("OPENVPN_NAS_SECRET", "vpnsecret"),
        ]);
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(settings.database.host, "db.internal");
        assert_eq!(settings.database.port, 6543);
        assert_eq!(settings.database.password.as_deref(), Some("pw"));
        assert_eq!(settings.radius.config_dir, Some(PathBuf::from("/etc/raddb")));
        assert_eq!(settings.openvpn.nas_secret.as_deref(), Some("vpnsecret"));
        assert_eq!(settings.database.name, "radius");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut settings: Settings = toml::from_str("[database]\nuser = \"fromfile\"\n").unwrap();
        let vars = env(&[("RADIUS_DB_USER", "fromenv")]);
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(settings.database.user, "fromenv");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let vars = env(&[("RADIUS_SECRET", "  ")]);
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(settings.radius.secret, "testing123");
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let vars = env(&[("RADIUS_DB_PORT", "abc")]);
        let mut settings = Settings::default();
        assert!(settings.apply_env(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_persist_password_keeps_file_values_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nhost = \"filehost\"\n").unwrap();

        let mut settings = config_manager::load_settings_file(&path).unwrap();
        settings.database.user = "from-env".to_string();
        let mut loaded = LoadedConfig {
            settings,
            path: path.clone(),
        };
        loaded.persist_database_password("generated").unwrap();

        let on_disk = config_manager::load_settings_file(&path).unwrap();
        assert_eq!(on_disk.database.password.as_deref(), Some("generated"));
        assert_eq!(on_disk.database.host, "filehost");
        assert_eq!(on_disk.database.user, "radius");
        assert_eq!(loaded.settings.database.password.as_deref(), Some("generated"));
    }
}
