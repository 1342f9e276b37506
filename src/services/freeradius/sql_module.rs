//! `mods-available/sql` rendering and enablement

use super::paths::ConfigLayout;
use crate::config::DatabaseSettings;
use crate::utils::exec::CommandExecutor;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

const SQL_MODULE_TEMPLATE: &str = r#"# Managed by radctl. Re-run `radctl fix` after editing database settings.
sql {
	dialect = "postgresql"
	driver = "rlm_sql_${dialect}"

	server = "@DB_HOST@"
	port = @DB_PORT@
	login = "@DB_USER@"
	password = "@DB_PASSWORD@"
	radius_db = "@DB_NAME@"

	acct_table1 = "radacct"
	acct_table2 = "radacct"
	postauth_table = "radpostauth"
	authcheck_table = "radcheck"
	groupcheck_table = "radgroupcheck"
	authreply_table = "radreply"
	groupreply_table = "radgroupreply"
	usergroup_table = "radusergroup"

	delete_stale_sessions = yes

	pool {
		start = ${thread[pool].start_servers}
		min = ${thread[pool].min_spare_servers}
		max = ${thread[pool].max_servers}
		spare = ${thread[pool].max_spare_servers}
		uses = 0
		retry_delay = 30
		lifetime = 0
		idle_timeout = 60
	}

	read_clients = yes
	client_table = "nas"

	group_attribute = "SQL-Group"

	$INCLUDE ${modconfdir}/${.:name}/main/${dialect}/queries.conf
}
"#;

/// Group the FreeRADIUS daemon runs as on Debian/Ubuntu
pub const RADIUS_GROUP: &str = "freerad";

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the module for the given database settings
pub fn render(db: &DatabaseSettings, password: &str) -> String {
    SQL_MODULE_TEMPLATE
        .replace("@DB_HOST@", &escape(&db.host))
        .replace("@DB_PORT@", &db.port.to_string())
        .replace("@DB_USER@", &escape(&db.user))
        .replace("@DB_PASSWORD@", &escape(password))
        .replace("@DB_NAME@", &escape(&db.name))
}

/// Write mods-available/sql; returns whether the content changed
pub fn write(layout: &ConfigLayout, db: &DatabaseSettings, password: &str) -> Result<bool> {
    let path = layout.sql_available();
    let rendered = render(db, password);
    if fs::read_to_string(&path).ok().as_deref() == Some(rendered.as_str()) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

/// Whether mods-enabled/sql points at the available module
pub fn is_enabled(layout: &ConfigLayout) -> bool {
    let enabled = layout.sql_enabled();
    match fs::symlink_metadata(&enabled) {
        Ok(meta) if meta.file_type().is_symlink() => enabled.exists(),
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Create the mods-enabled/sql symlink; returns whether anything changed
pub fn enable(layout: &ConfigLayout) -> Result<bool> {
    let enabled = layout.sql_enabled();
    let target = Path::new("../mods-available/sql");

    if let Ok(meta) = fs::symlink_metadata(&enabled) {
        if meta.file_type().is_symlink() && fs::read_link(&enabled)?.as_path() == target {
            return Ok(false);
        }
        // A stale link or a copied file: replace it with the canonical link
        fs::remove_file(&enabled)
            .with_context(|| format!("Failed to remove {}", enabled.display()))?;
    }

    if let Some(parent) = enabled.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, &enabled)
        .with_context(|| format!("Failed to link {}", enabled.display()))?;
    #[cfg(not(unix))]
    fs::copy(layout.sql_available(), &enabled)
        .with_context(|| format!("Failed to copy {}", enabled.display()))?;

    Ok(true)
}

/// Restrict the module to root and the daemon group (it contains the DB password)
pub fn secure_permissions(exec: &dyn CommandExecutor, layout: &ConfigLayout) -> Result<()> {
    let path = layout.sql_available();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640))
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    let path_str = path.to_string_lossy();
    let output = exec.execute("chgrp", &[RADIUS_GROUP, &path_str])?;
    crate::utils::exec::ensure_success(&output, "chgrp")
}

/// Read the database password from an existing module
pub fn read_password(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let re = Regex::new(r#"(?m)^\s*password\s*=\s*"((?:[^"\\]|\\.)*)""#)?;
    Ok(re.captures(&content).map(|caps| {
        caps[1].replace("\\\"", "\"").replace("\\\\", "\\")
    }))
}
