//! PostgreSQL access through the `psql` and `pg_dump` clients
//!
//! SQL is always fed on stdin so statements (and the passwords inside
//! `ALTER ROLE`) never show up in the process list. Administrative
//! statements run as the `postgres` OS user over the local socket;
//! everything else connects as the RADIUS role with `PGPASSWORD`.

use crate::config::DatabaseSettings;
use crate::services::freeradius::{ConfigLayout, sql_module};
use crate::utils::exec::{CommandExecutor, ensure_success};
use anyhow::{Context, Result};
use std::path::Path;

/// Tables created by the FreeRADIUS PostgreSQL schema
pub const RADIUS_TABLES: &[&str] = &[
    "radcheck",
    "radreply",
    "radgroupcheck",
    "radgroupreply",
    "radusergroup",
    "radacct",
    "radpostauth",
    "nas",
];

const NAS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS nas (
    id SERIAL PRIMARY KEY,
    nasname TEXT NOT NULL,
    shortname TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'other',
    ports INTEGER,
    secret TEXT NOT NULL,
    server TEXT,
    community TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS nas_nasname ON nas (nasname);";

/// Database password: settings first, then the installed sql module
pub fn resolve_password(db: &DatabaseSettings, layout: Option<&ConfigLayout>) -> Result<String> {
    if let Some(pw) = db.password.as_deref().filter(|p| !p.is_empty()) {
        return Ok(pw.to_string());
    }
    if let Some(layout) = layout {
        match sql_module::read_password(&layout.sql_available()) {
            Ok(Some(pw)) => return Ok(pw),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "sql module unreadable, no password from it"),
        }
    }
    anyhow::bail!(
        "Database password unknown.\n\nSet RADIUS_DB_PASSWORD or run `radctl install` to generate one."
    )
}

/// Quote a string literal; NUL bytes cannot be represented
pub fn quote_literal(value: &str) -> Result<String> {
    if value.contains('\0') {
        anyhow::bail!("Value contains a NUL byte");
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Quote an identifier (role, database, table)
pub fn quote_ident(value: &str) -> Result<String> {
    if value.is_empty() {
        anyhow::bail!("Identifier cannot be empty");
    }
    if value.contains('\0') {
        anyhow::bail!("Identifier contains a NUL byte");
    }
    Ok(format!("\"{}\"", value.replace('"', "\"\"")))
}

/// Parse unaligned, tuples-only, tab-separated psql output
pub fn parse_rows(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.split('\t').map(str::to_string).collect())
        .collect()
}

pub struct Psql<'a> {
    exec: &'a dyn CommandExecutor,
    pub db: DatabaseSettings,
    password: Option<String>,
}

impl<'a> Psql<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, db: &DatabaseSettings, password: Option<&str>) -> Self {
        Self {
            exec,
            db: db.clone(),
            password: password.map(str::to_string),
        }
    }

    fn base_args() -> Vec<String> {
        ["-X", "-q", "-v", "ON_ERROR_STOP=1", "-t", "-A", "-F", "\t"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn app_args(&self) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend([
            "-h".to_string(),
            self.db.host.clone(),
            "-p".to_string(),
            self.db.port.to_string(),
            "-U".to_string(),
            self.db.user.clone(),
            "-d".to_string(),
            self.db.name.clone(),
        ]);
        args
    }

    fn app_env(&self) -> Vec<(&str, &str)> {
        match self.password.as_deref() {
            Some(pw) => vec![("PGPASSWORD", pw)],
            None => Vec::new(),
        }
    }

    fn run_admin(&self, database: &str, sql: &str) -> Result<String> {
        let mut args = vec!["-u".to_string(), "postgres".to_string(), "psql".to_string()];
        args.extend(Self::base_args());
        args.extend(["-d".to_string(), database.to_string(), "-f".to_string(), "-".to_string()]);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .exec
            .execute_with_input("sudo", &args, &[], sql.as_bytes())
            .context("Failed to run psql as postgres")?;
        ensure_success(&output, "psql (postgres)")?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run SQL as the postgres superuser against the maintenance database
    pub fn admin(&self, sql: &str) -> Result<String> {
        self.run_admin("postgres", sql)
    }

    fn run_app(&self, extra: &[&str], sql: &str) -> Result<String> {
        let mut args = self.app_args();
        args.extend(extra.iter().map(|s| s.to_string()));
        args.extend(["-f".to_string(), "-".to_string()]);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .exec
            .execute_with_input("psql", &args, &self.app_env(), sql.as_bytes())
            .context("Failed to run psql")?;
        ensure_success(&output, "psql")?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run SQL as the RADIUS role
    pub fn execute(&self, sql: &str) -> Result<String> {
        self.run_app(&[], sql)
    }

    /// Run statements as the RADIUS role inside one transaction
    pub fn transaction(&self, statements: &[String]) -> Result<()> {
        let sql = statements.join(";\n") + ";\n";
        self.run_app(&["--single-transaction"], &sql)?;
        Ok(())
    }

    /// Run a query and split the result into rows and columns
    pub fn query(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        Ok(parse_rows(&self.execute(sql)?))
    }

    /// Run a single-value query
    pub fn query_value(&self, sql: &str) -> Result<Option<String>> {
        Ok(self
            .query(sql)?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next()))
    }

    /// Execute an SQL file as the RADIUS role
    pub fn run_file(&self, path: &Path) -> Result<()> {
        let mut args = self.app_args();
        args.extend(["-f".to_string(), path.to_string_lossy().to_string()]);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .exec
            .execute_with_env("psql", &args, &self.app_env())
            .with_context(|| format!("Failed to run psql -f {}", path.display()))?;
        ensure_success(&output, &format!("psql -f {}", path.display()))
    }

    pub fn can_connect(&self) -> bool {
        matches!(self.query_value("SELECT 1"), Ok(Some(v)) if v == "1")
    }

    pub fn role_exists(&self, role: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM pg_roles WHERE rolname = {}", quote_literal(role)?);
        Ok(self.admin(&sql)?.trim() == "1")
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM pg_database WHERE datname = {}",
            quote_literal(name)?
        );
        Ok(self.admin(&sql)?.trim() == "1")
    }

    /// Create the login role, or reset its password. Returns true when created.
    pub fn ensure_role(&self, password: &str) -> Result<bool> {
        let role = quote_ident(&self.db.user)?;
        let pw = quote_literal(password)?;
        if self.role_exists(&self.db.user)? {
            self.admin(&format!("ALTER ROLE {} WITH LOGIN PASSWORD {}", role, pw))?;
            Ok(false)
        } else {
            self.admin(&format!("CREATE ROLE {} WITH LOGIN PASSWORD {}", role, pw))?;
            Ok(true)
        }
    }

    /// Create the database owned by the RADIUS role. Returns true when created.
    pub fn ensure_database(&self) -> Result<bool> {
        if self.database_exists(&self.db.name)? {
            return Ok(false);
        }
        self.admin(&format!(
            "CREATE DATABASE {} OWNER {}",
            quote_ident(&self.db.name)?,
            quote_ident(&self.db.user)?
        ))?;
        Ok(true)
    }

    /// Disconnect sessions and drop the database
    pub fn drop_database(&self) -> Result<()> {
        self.admin(&format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid()",
            quote_literal(&self.db.name)?
        ))?;
        self.admin(&format!(
            "DROP DATABASE IF EXISTS {}",
            quote_ident(&self.db.name)?
        ))?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT to_regclass({}) IS NOT NULL",
            quote_literal(&format!("public.{}", table))?
        );
        Ok(self.query_value(&sql)?.as_deref() == Some("t"))
    }

    /// The schema counts as loaded once radcheck exists
    pub fn schema_loaded(&self) -> Result<bool> {
        self.table_exists("radcheck")
    }

    /// Load the FreeRADIUS schema unless already present. Returns true when loaded.
    pub fn load_schema(&self, schema: &Path) -> Result<bool> {
        if self.schema_loaded()? {
            self.ensure_nas_table()?;
            return Ok(false);
        }
        if !schema.exists() {
            anyhow::bail!(
                "FreeRADIUS PostgreSQL schema not found at {} (is freeradius-postgresql installed?)",
                schema.display()
            );
        }
        self.run_file(schema)?;
        self.ensure_nas_table()?;
        Ok(true)
    }

    /// Older schema files lack the nas table used by `read_clients`
    pub fn ensure_nas_table(&self) -> Result<()> {
        self.execute(NAS_TABLE_DDL)?;
        Ok(())
    }

    pub fn count_rows(&self, table: &str, filter: Option<&str>) -> Result<u64> {
        let mut sql = format!("SELECT count(*) FROM {}", quote_ident(table)?);
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        let value = self
            .query_value(&sql)?
            .with_context(|| format!("No result counting {}", table))?;
        value
            .trim()
            .parse()
            .with_context(|| format!("Unexpected count for {}: {}", table, value))
    }

    /// Load a plain-SQL dump produced by [`Psql::dump`]
    pub fn restore_dump(&self, path: &Path) -> Result<()> {
        self.run_file(path)
    }

    /// Plain-SQL dump of the RADIUS database
    pub fn dump(&self) -> Result<Vec<u8>> {
        let port = self.db.port.to_string();
        let args = [
            "-h",
            self.db.host.as_str(),
            "-p",
            port.as_str(),
            "-U",
            self.db.user.as_str(),
            "--no-owner",
            "--no-privileges",
            self.db.name.as_str(),
        ];
        let output = self
            .exec
            .execute_with_env("pg_dump", &args, &self.app_env())
            .context("Failed to run pg_dump")?;
        ensure_success(&output, "pg_dump")?;
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::exec::testing::MockExecutor;

    fn input_of(exec: &MockExecutor, needle: &str) -> String {
        exec.calls
            .borrow()
            .iter()
            .filter_map(|c| c.input.as_ref())
            .map(|i| String::from_utf8_lossy(i).to_string())
            .find(|sql| sql.contains(needle))
            .unwrap_or_default()
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("o'brien").unwrap(), "'o''brien'");
        assert_eq!(quote_literal("a\\b").unwrap(), "'a\\b'");
        assert!(quote_literal("x\0y").is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("radius").unwrap(), "\"radius\"");
        assert_eq!(quote_ident("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn test_parse_rows() {
        let rows = parse_rows("alice\tstaff\t2\nbob\t\t0\n\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["bob", "", "0"]);
    }

    #[test]
    fn test_app_connection_uses_pgpassword_and_stdin() {
        let exec = MockExecutor::new().respond("psql", 0, "1\n");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), Some("pw"));
        assert!(psql.can_connect());

        let calls = exec.calls_matching("psql");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].env.contains(&("PGPASSWORD".to_string(), "pw".to_string())));
        assert!(calls[0].command_line().contains("-U radius -d radius"));
        assert_eq!(calls[0].input.as_deref(), Some("SELECT 1".as_bytes()));
    }

    #[test]
    fn test_ensure_role_creates_when_missing() {
        let exec = MockExecutor::new().respond("sudo", 0, "");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), None);
        assert!(psql.ensure_role("it's").unwrap());
        let sql = input_of(&exec, "CREATE ROLE");
        assert_eq!(sql, "CREATE ROLE \"radius\" WITH LOGIN PASSWORD 'it''s'");
    }

    #[test]
    fn test_ensure_role_updates_password_when_present() {
        let exec = MockExecutor::new().respond("sudo", 0, "1\n");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), None);
        assert!(!psql.ensure_role("pw").unwrap());
        assert!(input_of(&exec, "ALTER ROLE").contains("PASSWORD 'pw'"));
        assert!(exec.calls_matching("sudo -u postgres psql").len() == 2);
    }

    #[test]
    fn test_ensure_database_skips_existing() {
        let exec = MockExecutor::new().respond("sudo", 0, "1\n");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), None);
        assert!(!psql.ensure_database().unwrap());
        assert_eq!(input_of(&exec, "CREATE DATABASE"), "");
    }

    #[test]
    fn test_load_schema_skips_when_present() {
        let exec = MockExecutor::new().respond("psql", 0, "t\n");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), Some("pw"));
        assert!(!psql.load_schema(Path::new("/nonexistent/schema.sql")).unwrap());
        assert!(exec.calls_matching("/nonexistent").is_empty());
    }

    #[test]
    fn test_load_schema_requires_file() {
        let exec = MockExecutor::new().respond("psql", 0, "f\n");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), Some("pw"));
        let err = psql
            .load_schema(Path::new("/nonexistent/schema.sql"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("schema not found"));
    }

    #[test]
    fn test_transaction_is_single() {
        let exec = MockExecutor::new();
        let psql = Psql::new(&exec, &DatabaseSettings::default(), Some("pw"));
        psql.transaction(&["DELETE FROM a".to_string(), "INSERT INTO a VALUES (1)".to_string()])
            .unwrap();
        let call = &exec.calls_matching("--single-transaction")[0];
        assert_eq!(
            call.input.as_deref(),
            Some("DELETE FROM a;\nINSERT INTO a VALUES (1);\n".as_bytes())
        );
    }

    #[test]
    fn test_resolve_password_prefers_settings() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ConfigLayout::new(dir.path());
        let mut db = DatabaseSettings::default();
        assert!(resolve_password(&db, Some(&layout)).is_err());

        sql_module::write(&layout, &db, "from-module").unwrap();
        assert_eq!(resolve_password(&db, Some(&layout)).unwrap(), "from-module");

        db.password = Some("from-settings".to_string());
        assert_eq!(resolve_password(&db, Some(&layout)).unwrap(), "from-settings");
    }

    #[test]
    fn test_unreadable_sql_module_falls_back_to_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ConfigLayout::new(dir.path());
        // A directory in place of the module file fails to read even as root
        std::fs::create_dir_all(layout.sql_available()).unwrap();

        let err = resolve_password(&DatabaseSettings::default(), Some(&layout)).unwrap_err();
        assert!(err.to_string().contains("RADIUS_DB_PASSWORD"));
    }

    #[test]
    fn test_count_rows() {
        let exec = MockExecutor::new().respond("psql", 0, "42\n");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), Some("pw"));
        assert_eq!(psql.count_rows("radcheck", None).unwrap(), 42);
    }

    #[test]
    fn test_failed_psql_is_an_error() {
        let exec = MockExecutor::new().respond("psql", 2, "");
        let psql = Psql::new(&exec, &DatabaseSettings::default(), Some("pw"));
        assert!(psql.execute("SELECT 1").is_err());
        assert!(!psql.can_connect());
    }
}
