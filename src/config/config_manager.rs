use super::Settings;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "radctl";
const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "RADCTL_CONFIG";

pub fn get_home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .with_context(|| "Could not determine home directory")
}

pub fn get_config_dir() -> Result<PathBuf> {
    let home = get_home_dir()?;
    Ok(home.join(".config").join(CONFIG_DIR_NAME))
}

/// Resolve the settings file: explicit flag, then $RADCTL_CONFIG, then ~/.config/radctl
pub fn get_config_file_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the settings file; a missing file yields defaults
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(settings)
}

/// Write the settings file with owner-only permissions (it holds the DB password)
pub fn save_settings_file(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    let content = toml::to_string_pretty(settings).context("Failed to serialize config")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    Ok(())
}
