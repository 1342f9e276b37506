// Command module routing
//
// To add a new command:
// 1. Create a new file in this directory (e.g., `mycommand.rs`)
// 2. Add `pub mod mycommand;` below
// 3. Add the match arm in `handle_command` function

pub mod backup;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod install;
pub mod openvpn;
pub mod user;

use crate::Commands;
use crate::Commands::*;
use crate::config::{LoadedConfig, Settings};
use crate::services::freeradius::{self, ConfigLayout};
use crate::services::postgres::{self, Psql};
use crate::utils::exec::{CommandExecutor, LocalExecutor};
use anyhow::Result;

/// Dispatch command to appropriate handler
pub fn handle_command(mut loaded: LoadedConfig, verbose: u8, command: Commands) -> Result<()> {
    let exec = LocalExecutor;

    match command {
        Install {
            skip_packages,
            skip_test,
        } => install::handle_install(&exec, &mut loaded, skip_packages, skip_test)?,
        Fix { skip_test } => install::handle_fix(&exec, &loaded.settings, skip_test)?,
        User { command } => user::handle_user(&exec, &loaded.settings, command)?,
        Client { command } => client::handle_client(&exec, &loaded.settings, command)?,
        Backup {
            list,
            keep,
            no_database,
        } => backup::handle_backup(&exec, &loaded.settings, list, keep, no_database)?,
        Restore {
            archive,
            latest,
            yes,
            no_safety_backup,
            no_database,
        } => backup::handle_restore(
            &exec,
            &loaded.settings,
            archive.as_deref(),
            latest,
            yes,
            no_safety_backup,
            no_database,
        )?,
        Diagnostics { log_lines } => diagnostics::handle_diagnostics(&exec, &loaded.settings, log_lines)?,
        OpenvpnConfig {
            radius_server,
            install_plugin,
            restart_openvpn,
            no_restart,
        } => openvpn::handle_openvpn_config(
            &exec,
            &loaded.settings,
            radius_server,
            install_plugin,
            restart_openvpn,
            no_restart,
        )?,
        Config { command } => config::handle_config(&loaded, verbose, &command)?,
    }

    Ok(())
}

/// The FreeRADIUS configuration tree for the current settings
pub(crate) fn layout(settings: &Settings) -> Result<ConfigLayout> {
    freeradius::discover(settings.radius.config_dir.as_deref())
}

/// Connect as the RADIUS role; the password comes from settings or the
/// installed sql module
pub(crate) fn database<'a>(
    exec: &'a dyn CommandExecutor,
    settings: &Settings,
    layout: Option<&ConfigLayout>,
) -> Result<Psql<'a>> {
    let password = postgres::resolve_password(&settings.database, layout)?;
    Ok(Psql::new(exec, &settings.database, Some(&password)))
}

/// Like [`database`], but a missing password only disables the database side
pub(crate) fn optional_database<'a>(
    exec: &'a dyn CommandExecutor,
    settings: &Settings,
    layout: Option<&ConfigLayout>,
) -> Option<Psql<'a>> {
    match database(exec, settings, layout) {
        Ok(psql) => Some(psql),
        Err(e) => {
            tracing::warn!(error = %e, "database unavailable");
            println!("⚠ Database unavailable, skipping the nas table: {}", e);
            None
        }
    }
}
