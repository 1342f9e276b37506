//! Backup archives of the FreeRADIUS configuration and the RADIUS database
//!
//! Layout of `radius-backup-YYYYmmdd_HHMMSS.tar.gz`:
//!
//! ```text
//! manifest.json
//! database.sql      (absent with --no-database)
//! config/...        (the FreeRADIUS tree, symlinks kept as links)
//! ```

use crate::services::freeradius::ConfigLayout;
use crate::services::postgres::Psql;
use crate::services::systemd::Service;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tar::{Archive, Builder, Header};

pub const ARCHIVE_PREFIX: &str = "radius-backup-";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DUMP_FILE: &str = "database.sql";
pub const CONFIG_ENTRY: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: String,
    pub radctl_version: String,
    pub host: String,
    /// Where the configuration tree lived when the backup was taken
    pub config_dir: PathBuf,
    /// Database name when a dump is included
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub size: u64,
}

impl BackupEntry {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

fn timestamp() -> String {
    let datetime = chrono::DateTime::<chrono::Utc>::from(SystemTime::now());
    datetime.format("%Y%m%d_%H%M%S").to_string()
}

pub fn archive_name(timestamp: &str) -> String {
    format!("{}{}{}", ARCHIVE_PREFIX, timestamp, ARCHIVE_SUFFIX)
}

/// A path in the backup directory that does not exist yet. Same-second
/// archives get a zero-padded counter so names keep sorting by age.
fn next_archive_path(backup_dir: &Path, stamp: &str) -> PathBuf {
    let mut path = backup_dir.join(archive_name(stamp));
    let mut n = 1;
    while path.exists() {
        path = backup_dir.join(archive_name(&format!("{}_{:03}", stamp, n)));
        n += 1;
    }
    path
}

fn ensure_backup_dir(backup_dir: &Path) -> Result<()> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup directory {}", backup_dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(backup_dir, fs::Permissions::from_mode(0o700)).with_context(|| {
            format!("Failed to set permissions for: {}", backup_dir.display())
        })?;
    }
    Ok(())
}

fn append_bytes<W: Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o600);
    header.set_mtime(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );
    header.set_cksum();
    builder
        .append_data(&mut header, name, data)
        .with_context(|| format!("Failed to add {} to archive", name))
}

/// Write a new archive into `backup_dir`. With `psql` set, the database is
/// dumped into it as well. Returns the archive path.
pub fn create(layout: &ConfigLayout, psql: Option<&Psql>, backup_dir: &Path) -> Result<PathBuf> {
    ensure_backup_dir(backup_dir)?;

    // Dump before touching the filesystem so a failing pg_dump leaves nothing behind
    let dump = match psql {
        Some(psql) => Some(psql.dump().context("Database dump failed")?),
        None => None,
    };

    let path = next_archive_path(backup_dir, &timestamp());
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let manifest = BackupManifest {
        created_at: chrono::Utc::now().to_rfc3339(),
        radctl_version: env!("CARGO_PKG_VERSION").to_string(),
        host: whoami::devicename(),
        config_dir: layout.root.clone(),
        database: psql.map(|p| p.db.name.clone()),
    };
    append_bytes(
        &mut builder,
        MANIFEST_FILE,
        serde_json::to_string_pretty(&manifest)?.as_bytes(),
    )?;

    if let Some(dump) = &dump {
        append_bytes(&mut builder, DUMP_FILE, dump)?;
    }

    builder
        .append_dir_all(CONFIG_ENTRY, &layout.root)
        .with_context(|| format!("Failed to archive {}", layout.root.display()))?;

    let encoder = builder.into_inner().context("Failed to finish archive")?;
    encoder.finish().context("Failed to finish compression")?;

    tracing::info!(archive = %path.display(), database = dump.is_some(), "backup created");
    Ok(path)
}

/// Archives in `backup_dir`, newest first
pub fn list(backup_dir: &Path) -> Result<Vec<BackupEntry>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let pattern = backup_dir.join(format!("{}*{}", ARCHIVE_PREFIX, ARCHIVE_SUFFIX));
    let pattern = pattern.to_string_lossy();

    let mut entries = Vec::new();
    for path in glob::glob(&pattern).context("Invalid backup directory pattern")? {
        let path = path.context("Failed to read backup directory")?;
        let size = fs::metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        entries.push(BackupEntry { path, size });
    }
    // Timestamped names sort chronologically
    entries.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(entries)
}

pub fn latest(backup_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list(backup_dir)?.into_iter().next().map(|e| e.path))
}

/// Delete all but the newest `keep` archives. Returns the deleted paths.
pub fn prune(backup_dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in list(backup_dir)?.into_iter().skip(keep) {
        fs::remove_file(&entry.path)
            .with_context(|| format!("Failed to delete {}", entry.path.display()))?;
        tracing::info!(archive = %entry.path.display(), "pruned backup");
        removed.push(entry.path);
    }
    Ok(removed)
}

/// Reject entries that would land outside the extraction directory
pub fn validate_entry_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                anyhow::bail!("Archive entry '{}' contains '..'", path.display())
            }
            Component::RootDir | Component::Prefix(_) => {
                anyhow::bail!("Archive entry '{}' is an absolute path", path.display())
            }
        }
    }
    Ok(())
}

/// Unpack an archive into `dest` after checking every entry path.
/// Returns the manifest.
pub fn extract(archive: &Path, dest: &Path) -> Result<BackupManifest> {
    let open = || -> Result<Archive<GzDecoder<File>>> {
        let file =
            File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
        Ok(Archive::new(GzDecoder::new(file)))
    };

    // First pass validates; nothing is written if any entry is unsafe
    let mut reader = open()?;
    for entry in reader.entries().context("Failed to read archive")? {
        let entry = entry.context("Corrupt archive entry")?;
        validate_entry_path(&entry.path().context("Invalid entry path")?)?;
    }

    let mut reader = open()?;
    reader.set_preserve_permissions(true);
    reader.set_preserve_ownerships(true);
    reader
        .unpack(dest)
        .with_context(|| format!("Failed to extract {}", archive.display()))?;

    let manifest_path = dest.join(MANIFEST_FILE);
    let manifest = fs::read_to_string(&manifest_path)
        .with_context(|| format!("{} has no {}", archive.display(), MANIFEST_FILE))?;
    serde_json::from_str(&manifest).context("Invalid backup manifest")
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Take a backup of the current state first
    pub safety_backup: bool,
    pub restore_database: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            yes: false,
            safety_backup: true,
            restore_database: true,
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}", name, suffix))
}

/// Swap the configuration directory for the extracted tree
fn replace_config_dir(extracted: &Path, target: &Path) -> Result<()> {
    let old = sibling(target, "radctl-old");
    if old.exists() {
        fs::remove_dir_all(&old).with_context(|| format!("Failed to remove {}", old.display()))?;
    }
    if target.exists() {
        fs::rename(target, &old)
            .with_context(|| format!("Failed to move {} aside", target.display()))?;
    }
    if let Err(e) = fs::rename(extracted, target) {
        // Put the previous tree back before failing
        if old.exists() {
            let _ = fs::rename(&old, target);
        }
        return Err(e).with_context(|| format!("Failed to restore {}", target.display()));
    }
    if old.exists() {
        fs::remove_dir_all(&old).with_context(|| format!("Failed to remove {}", old.display()))?;
    }
    Ok(())
}

/// Restore configuration and database from an archive
pub fn restore(
    layout: &ConfigLayout,
    service: &Service,
    psql: Option<&Psql>,
    backup_dir: &Path,
    archive: &Path,
    opts: &RestoreOptions,
) -> Result<()> {
    if !archive.is_file() {
        anyhow::bail!("Backup archive not found: {}", archive.display());
    }

    // Extract next to the config dir so the final swap is a rename
    let parent = layout
        .root
        .parent()
        .with_context(|| format!("{} has no parent directory", layout.root.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(".radctl-restore-")
        .tempdir_in(parent)
        .with_context(|| format!("Failed to create staging directory in {}", parent.display()))?;

    println!("Reading {}...", archive.display());
    let manifest = extract(archive, staging.path())?;
    let dump = staging.path().join(DUMP_FILE);
    let has_dump = dump.is_file();

    println!("  Created:  {}", manifest.created_at);
    println!("  Host:     {}", manifest.host);
    println!("  Config:   {}", manifest.config_dir.display());
    println!(
        "  Database: {}",
        manifest.database.as_deref().unwrap_or("(not included)")
    );
    println!();

    if !opts.yes
        && !confirm(&format!(
            "This will replace {} and the RADIUS database. Continue?",
            layout.root.display()
        ))?
    {
        println!("Aborted.");
        return Ok(());
    }

    if opts.safety_backup {
        let safety = create(layout, psql, backup_dir).context("Safety backup failed")?;
        println!("✓ Safety backup: {}", safety.display());
    }

    if let Err(e) = service.stop() {
        tracing::warn!(error = %e, "failed to stop FreeRADIUS before restore");
        println!("⚠ Could not stop {}: {}", service.unit, e);
    }

    replace_config_dir(&staging.path().join(CONFIG_ENTRY), &layout.root)?;
    println!("✓ Configuration restored to {}", layout.root.display());

    match (psql, has_dump && opts.restore_database) {
        (Some(psql), true) => {
            psql.drop_database()?;
            psql.ensure_database()?;
            psql.restore_dump(&dump)
                .context("Failed to load database dump (the safety backup has the previous state)")?;
            println!("✓ Database '{}' restored", psql.db.name);
        }
        (None, true) => println!("⚠ Database dump present but no database connection; skipped"),
        _ => println!("  Database not restored"),
    }

    service.start()?;
    if service.wait_active()? {
        println!("✓ {} is running", service.unit);
    } else {
        println!(
            "⚠ {} did not come up. Check: journalctl -u {} -n 50",
            service.unit, service.unit
        );
    }

    tracing::info!(archive = %archive.display(), "restore complete");
    Ok(())
}
