use crate::config::Settings;
use crate::services::backup::{self, RestoreOptions};
use crate::services::systemd::Service;
use crate::utils::exec::CommandExecutor;
use crate::utils::privileges;
use anyhow::{Context, Result};
use std::path::Path;

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Handle backup command
pub fn handle_backup(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    list: bool,
    keep: Option<usize>,
    no_database: bool,
) -> Result<()> {
    if list {
        let entries = backup::list(&settings.backup_dir)?;
        if entries.is_empty() {
            println!("No backups in {}", settings.backup_dir.display());
            return Ok(());
        }
        println!("Backups in {} (newest first):", settings.backup_dir.display());
        for entry in &entries {
            println!("  {:<48} {:>10}", entry.file_name(), human_size(entry.size));
        }
        return Ok(());
    }

    privileges::require_root("backup")?;
    let layout = super::layout(settings)?;
    let psql = if no_database {
        None
    } else {
        Some(super::database(exec, settings, Some(&layout))?)
    };

    println!("Backing up {}...", layout.root.display());
    let archive = backup::create(&layout, psql.as_ref(), &settings.backup_dir)?;
    println!("✓ Backup written to {}", archive.display());

    if let Some(keep) = keep {
        let removed = backup::prune(&settings.backup_dir, keep)?;
        if !removed.is_empty() {
            println!("✓ Removed {} old backup(s), keeping {}", removed.len(), keep);
        }
    }
    Ok(())
}

/// Handle restore command
pub fn handle_restore(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    archive: Option<&Path>,
    latest: bool,
    yes: bool,
    no_safety_backup: bool,
    no_database: bool,
) -> Result<()> {
    privileges::require_root("restore")?;

    let archive = match archive {
        Some(path) => path.to_path_buf(),
        None if latest => backup::latest(&settings.backup_dir)?.with_context(|| {
            format!("No backups found in {}", settings.backup_dir.display())
        })?,
        None => anyhow::bail!("Specify a backup archive or --latest"),
    };

    let layout = super::layout(settings)?;
    let psql = if no_database {
        None
    } else {
        Some(super::database(exec, settings, Some(&layout))?)
    };

    let opts = RestoreOptions {
        yes,
        safety_backup: !no_safety_backup,
        restore_database: !no_database,
    };
    let service = Service::new(exec, &settings.radius.service);
    backup::restore(
        &layout,
        &service,
        psql.as_ref(),
        &settings.backup_dir,
        &archive,
        &opts,
    )
}
