//! `install` and `fix`: bring FreeRADIUS + PostgreSQL to the desired state
//!
//! Every step is a reconciler, so running either command twice is safe.

use crate::config::{LoadedConfig, Settings};
use crate::services::freeradius::clients::{self, NasClient};
use crate::services::freeradius::{self, ConfigLayout, sites, sql_module};
use crate::services::postgres::{self, Psql};
use crate::services::systemd::Service;
use crate::services::users::{self, RadiusUser};
use crate::services::{diagnostics, nas};
use crate::utils::exec::{CommandExecutor, PackageManager};
use crate::utils::privileges;
use crate::utils::string::random_secret;
use anyhow::{Context, Result};

pub const PACKAGES: &[&str] = &[
    "freeradius",
    "freeradius-postgresql",
    "freeradius-utils",
    "postgresql",
    "postgresql-contrib",
];

/// Length of a generated database password
pub const DB_PASSWORD_LEN: usize = 24;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub skip_packages: bool,
    /// Skip the final radtest of the test user
    pub skip_test: bool,
}

fn step(n: usize, total: usize, title: &str) {
    println!();
    println!("[{}/{}] {}", n, total, title);
}

fn banner(title: &str) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", title);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Install the packages that are not installed yet
pub fn ensure_packages(exec: &dyn CommandExecutor) -> Result<()> {
    let pm = PackageManager::detect(exec);
    let mut missing = Vec::new();
    for package in PACKAGES {
        if !pm.is_installed(exec, package)? {
            missing.push(*package);
        }
    }
    if missing.is_empty() {
        println!("✓ All packages already installed");
        return Ok(());
    }

    println!("Installing {} via {}...", missing.join(" "), pm.display_name());
    pm.update(exec)?;
    pm.install_packages(exec, &missing)?;
    println!("✓ Packages installed");
    Ok(())
}

fn ensure_postgres_running(exec: &dyn CommandExecutor) -> Result<()> {
    let service = Service::new(exec, diagnostics::POSTGRES_SERVICE);
    service.enable()?;
    service.start()?;
    println!("✓ PostgreSQL service running");
    Ok(())
}

fn ensure_database(psql: &Psql, password: &str) -> Result<()> {
    if psql.ensure_role(password)? {
        println!("✓ Created role '{}'", psql.db.user);
    } else {
        println!("✓ Role '{}' exists (password synchronized)", psql.db.user);
    }
    if psql.ensure_database()? {
        println!("✓ Created database '{}'", psql.db.name);
    } else {
        println!("✓ Database '{}' exists", psql.db.name);
    }
    Ok(())
}

/// Run `<daemon> -XC`; a configuration FreeRADIUS rejects is fatal
pub fn check_config(exec: &dyn CommandExecutor) -> Result<()> {
    let daemon = freeradius::daemon_binary(exec)
        .context("FreeRADIUS binary not found (apt-get install freeradius)")?;
    let output = exec
        .execute(daemon, &["-XC"])
        .with_context(|| format!("Failed to run {} -XC", daemon))?;
    if !output.status.success() {
        let text = String::from_utf8_lossy(&output.stdout).to_string()
            + &String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = text.lines().rev().take(15).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        anyhow::bail!(
            "FreeRADIUS rejected the configuration:\n{}\n\nRun `{} -X` for the full output.",
            tail.join("\n"),
            daemon
        );
    }
    println!("✓ Configuration check passed");
    Ok(())
}

/// The localhost client, rewritten only when its address or secret differ
fn ensure_localhost_client(layout: &ConfigLayout, psql: &Psql, secret: &str) -> Result<()> {
    if let Some(existing) = clients::find(&layout.clients_conf(), "localhost")? {
        if existing.ipaddr == "127.0.0.1" && existing.secret == secret {
            println!("✓ localhost client present");
            return Ok(());
        }
    }
    let mut client = NasClient::new("localhost", "127.0.0.1", secret);
    client.description = Some("Local testing".to_string());
    nas::add(layout, Some(psql), &client)?;
    println!("✓ localhost client configured");
    Ok(())
}

/// Steps shared by install and fix, from the schema to the radtest
fn reconcile(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    layout: &ConfigLayout,
    psql: &Psql,
    password: &str,
    skip_test: bool,
    mut next: impl FnMut(&str),
) -> Result<()> {
    next("Database schema");
    if psql.load_schema(&layout.postgresql_schema())? {
        println!("✓ Schema loaded");
    } else {
        println!("✓ Schema already present");
    }

    next("SQL module");
    if sql_module::write(layout, &settings.database, password)? {
        println!("✓ Wrote {}", layout.sql_available().display());
    } else {
        println!("✓ {} up to date", layout.sql_available().display());
    }
    if sql_module::enable(layout)? {
        println!("✓ Linked {}", layout.sql_enabled().display());
    }
    if let Err(e) = sql_module::secure_permissions(exec, layout) {
        tracing::warn!(error = %e, "could not restrict sql module permissions");
        println!("⚠ Could not restrict permissions on the sql module: {}", e);
    }

    next("Virtual servers");
    for patch in sites::enable_sql(layout)? {
        if patch.missing {
            println!("⚠ Section '{}' not found; add 'sql' manually", patch.section);
        } else if patch.changed {
            println!("✓ Enabled sql in {}", patch.section);
        }
    }
    if !sites::sql_in_default_authorize(layout)? {
        anyhow::bail!(
            "sql is still not active in the authorize section of {}",
            layout.site_default().display()
        );
    }
    println!("✓ sql active in the default server");

    next("Clients and test user");
    ensure_localhost_client(layout, psql, &settings.radius.secret)?;
    if settings.radius.test_user.is_empty() {
        println!("  No test user configured");
    } else {
        let user = RadiusUser::new(&settings.radius.test_user, &settings.radius.test_password);
        let outcome = users::add(psql, &user)?;
        println!("✓ Test user '{}' {}", user.username, outcome);
    }

    next("Start FreeRADIUS");
    check_config(exec)?;
    let service = Service::new(exec, &settings.radius.service);
    service.enable()?;
    service.restart_and_verify()?;
    println!("✓ {} running", service.unit);

    if skip_test || settings.radius.test_user.is_empty() {
        return Ok(());
    }
    next("Authentication test");
    let result = users::radtest(
        exec,
        &settings.radius.test_user,
        &settings.radius.test_password,
        "127.0.0.1",
        &settings.radius.secret,
    )?;
    if !result.is_accept() {
        anyhow::bail!(
            "radtest for '{}' did not succeed ({:?}). Run `radctl diagnostics` for details.",
            settings.radius.test_user,
            result
        );
    }
    println!("✓ Access-Accept for '{}'", settings.radius.test_user);
    Ok(())
}

/// Full installation. A generated database password is saved to the
/// settings file.
pub fn install(
    exec: &dyn CommandExecutor,
    loaded: &mut LoadedConfig,
    opts: &InstallOptions,
) -> Result<()> {
    privileges::require_root("install")?;
    banner("Installing FreeRADIUS with PostgreSQL");

    let total = if opts.skip_test { 7 } else { 8 };
    let mut n = 0;
    let mut next = |title: &str| {
        n += 1;
        step(n, total, title);
    };

    next("Packages");
    if opts.skip_packages {
        println!("  Skipped");
    } else {
        ensure_packages(exec)?;
    }

    next("PostgreSQL");
    ensure_postgres_running(exec)?;
    let layout = freeradius::discover(loaded.settings.radius.config_dir.as_deref())?;
    println!("✓ FreeRADIUS configuration in {}", layout.root.display());

    let password = match postgres::resolve_password(&loaded.settings.database, Some(&layout)) {
        Ok(pw) => pw,
        Err(_) => {
            let pw = random_secret(DB_PASSWORD_LEN);
            loaded.persist_database_password(&pw)?;
            println!("✓ Generated database password (saved to {})", loaded.path.display());
            pw
        }
    };

    let settings = loaded.settings.clone();
    let psql = Psql::new(exec, &settings.database, Some(&password));
    ensure_database(&psql, &password)?;

    reconcile(exec, &settings, &layout, &psql, &password, opts.skip_test, &mut next)?;

    println!();
    banner("✓ FreeRADIUS installation complete");
    println!("  Config:   {}", layout.root.display());
    println!(
        "  Database: {}@{}:{}/{}",
        settings.database.user, settings.database.host, settings.database.port, settings.database.name
    );
    println!("  Settings: {}", loaded.path.display());
    tracing::info!(config_dir = %layout.root.display(), "install complete");
    Ok(())
}

/// Repair an existing installation without reinstalling packages or
/// changing the database password
pub fn fix(exec: &dyn CommandExecutor, settings: &Settings, opts: &InstallOptions) -> Result<()> {
    privileges::require_root("fix")?;
    banner("Repairing FreeRADIUS configuration");

    let total = if opts.skip_test { 6 } else { 7 };
    let mut n = 0;
    let mut next = |title: &str| {
        n += 1;
        step(n, total, title);
    };

    next("PostgreSQL");
    let layout = freeradius::discover(settings.radius.config_dir.as_deref())?;
    println!("✓ FreeRADIUS configuration in {}", layout.root.display());
    let password = postgres::resolve_password(&settings.database, Some(&layout))?;
    ensure_postgres_running(exec)?;

    let psql = Psql::new(exec, &settings.database, Some(&password));
    ensure_database(&psql, &password)?;

    reconcile(exec, settings, &layout, &psql, &password, opts.skip_test, &mut next)?;

    println!();
    banner("✓ FreeRADIUS repaired");
    tracing::info!(config_dir = %layout.root.display(), "fix complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::exec::testing::MockExecutor;
    use std::fs;

    const SITE: &str = "\
server default {
authorize {
\tpreprocess
\t-sql
\tpap
}
accounting {
\tdetail
}
session {
}
post-auth {
\texec
}
}
";

    fn fresh_tree(root: &std::path::Path) -> ConfigLayout {
        fs::create_dir_all(root.join("sites-available")).unwrap();
        fs::create_dir_all(root.join("mods-config/sql/main/postgresql")).unwrap();
        fs::write(root.join("radiusd.conf"), "").unwrap();
        fs::write(
            root.join("clients.conf"),
            "client localhost {\n\tipaddr = 127.0.0.1\n\tsecret = testing123\n}\n",
        )
        .unwrap();
        fs::write(root.join("sites-available/default"), SITE).unwrap();
        fs::write(
            root.join("mods-config/sql/main/postgresql/schema.sql"),
            "CREATE TABLE radcheck ();\n",
        )
        .unwrap();
        ConfigLayout::new(root)
    }

    fn settings_for(layout: &ConfigLayout) -> Settings {
        let mut settings = Settings::default();
        settings.radius.config_dir = Some(layout.root.clone());
        settings.database.password = Some("dbpass".to_string());
        settings
    }

    fn healthy_exec() -> MockExecutor {
        MockExecutor::new()
            .with_commands(&["freeradius", "radtest"])
            .respond("radtest", 0, "Received Access-Accept Id 1")
    }

    #[test]
    fn test_check_config_reports_output() {
        let exec = MockExecutor::new()
            .with_commands(&["freeradius"])
            .respond("-XC", 1, "/etc/freeradius/3.0/sites-enabled/default[12]: Parse error");
        let err = check_config(&exec).unwrap_err().to_string();
        assert!(err.contains("Parse error"));

        assert!(check_config(&MockExecutor::new()).is_err());
    }

    #[test]
    fn test_ensure_packages_installs_only_missing() {
        let exec = MockExecutor::new()
            .with_commands(&["apt-get"])
            .respond("dpkg-query -W -f=${Status} freeradius-postgresql", 1, "")
            .respond("dpkg-query", 0, "install ok installed");
        ensure_packages(&exec).unwrap();
        let install = exec.calls_matching("apt-get install");
        assert_eq!(install.len(), 1);
        assert_eq!(install[0].args.last().unwrap(), "freeradius-postgresql");
        assert_eq!(exec.calls_matching("apt-get update").len(), 1);
    }

    #[test]
    fn test_reconcile_configures_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = fresh_tree(&dir.path().join("raddb"));
        let settings = settings_for(&layout);
        let exec = healthy_exec().respond("to_regclass", 0, "f\n");
        let psql = Psql::new(&exec, &settings.database, Some("dbpass"));

        let mut steps = Vec::new();
        reconcile(&exec, &settings, &layout, &psql, "dbpass", false, |t| {
            steps.push(t.to_string())
        })
        .unwrap();

        assert_eq!(steps.len(), 6);
        assert!(sql_module::is_enabled(&layout));
        assert_eq!(
            sql_module::read_password(&layout.sql_available()).unwrap().as_deref(),
            Some("dbpass")
        );
        let site = fs::read_to_string(layout.site_default()).unwrap();
        assert!(site.contains("\tsql\n"));
        assert!(!site.contains("-sql"));

        // Schema loaded from the package file, test user saved, service restarted
        assert_eq!(exec.calls_matching("schema.sql").len(), 1);
        assert!(
            exec.calls
                .borrow()
                .iter()
                .filter_map(|c| c.input.as_ref())
                .any(|i| String::from_utf8_lossy(i).contains("'testuser', 'Cleartext-Password'"))
        );
        let lines = exec.command_lines();
        let check = lines.iter().position(|l| l == "freeradius -XC").unwrap();
        let restart = lines.iter().position(|l| l == "systemctl restart freeradius").unwrap();
        assert!(check < restart);
        assert_eq!(exec.calls_matching("radtest testuser testpass 127.0.0.1 0 testing123").len(), 1);
    }

    #[test]
    fn test_reconcile_fails_on_reject() {
        let dir = tempfile::tempdir().unwrap();
        let layout = fresh_tree(&dir.path().join("raddb"));
        let settings = settings_for(&layout);
        let exec = MockExecutor::new()
            .with_commands(&["freeradius", "radtest"])
            .respond("radtest", 1, "Received Access-Reject Id 1");
        let psql = Psql::new(&exec, &settings.database, Some("dbpass"));

        let err = reconcile(&exec, &settings, &layout, &psql, "dbpass", false, |_| {})
            .unwrap_err()
            .to_string();
        assert!(err.contains("did not succeed"));
    }

    #[test]
    fn test_localhost_client_left_alone_when_matching() {
        let dir = tempfile::tempdir().unwrap();
        let layout = fresh_tree(&dir.path().join("raddb"));
        let before = fs::read_to_string(layout.clients_conf()).unwrap();
        let exec = MockExecutor::new();
        let psql = Psql::new(&exec, &Settings::default().database, Some("pw"));

        ensure_localhost_client(&layout, &psql, "testing123").unwrap();
        assert_eq!(fs::read_to_string(layout.clients_conf()).unwrap(), before);

        ensure_localhost_client(&layout, &psql, "changed").unwrap();
        let after = clients::find(&layout.clients_conf(), "localhost").unwrap().unwrap();
        assert_eq!(after.secret, "changed");
    }
}
