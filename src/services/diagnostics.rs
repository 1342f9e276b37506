//! Health report for the FreeRADIUS installation

use crate::config::Settings;
use crate::services::freeradius::{self, ConfigLayout, clients, sites, sql_module};
use crate::services::postgres::{self, Psql};
use crate::services::systemd::Service;
use crate::utils::exec::CommandExecutor;
use crate::utils::privileges;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub const RADIUS_PORTS: &[u16] = &[1812, 1813];
pub const POSTGRES_SERVICE: &str = "postgresql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

impl Status {
    fn marker(&self) -> &'static str {
        match self {
            Status::Pass => "✓",
            Status::Warn => "⚠",
            Status::Fail => "✗",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub status: Status,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct DiagnosticReport {
    pub checks: Vec<Check>,
    pub log_tail: Vec<String>,
}

impl DiagnosticReport {
    fn push(&mut self, name: &str, status: Status, detail: impl Into<String>) {
        self.checks.push(Check {
            name: name.to_string(),
            status,
            detail: detail.into(),
        });
    }

    pub fn count(&self, status: Status) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(Status::Fail) > 0
    }

    pub fn get(&self, name: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn print(&self) {
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("FreeRADIUS diagnostics");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!();
        for check in &self.checks {
            println!("{} {:<24} {}", check.status.marker(), check.name, check.detail);
        }

        if !self.log_tail.is_empty() {
            println!();
            println!("Recent log lines:");
            for line in &self.log_tail {
                println!("  {}", line);
            }
        }

        println!();
        println!(
            "{} checks: {} passed, {} warnings, {} failed",
            self.checks.len(),
            self.count(Status::Pass),
            self.count(Status::Warn),
            self.count(Status::Fail)
        );
    }
}

/// UDP ports with a listening socket in `ss -lun` output
pub fn listening_udp_ports(ss_output: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = ss_output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .filter_map(|local| local.rsplit(':').next())
        .filter_map(|port| port.parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

const TAIL_CHUNK: u64 = 64 * 1024;

/// Last `n` lines of a file. Only the end of the file is read, and bytes
/// that are not UTF-8 (raw User-Name values) are replaced.
pub fn tail(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();

    let mut window = TAIL_CHUNK.min(len);
    let buf = loop {
        let mut buf = Vec::with_capacity(window as usize);
        file.seek(SeekFrom::Start(len - window))?;
        (&mut file).take(window).read_to_end(&mut buf)?;
        // One extra newline guarantees the first kept line is complete
        let newlines = buf.iter().filter(|&&b| b == b'\n').count();
        if window == len || newlines > n {
            break buf;
        }
        window = (window * 2).min(len);
    };

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if window < len && !lines.is_empty() {
        // Partial first line
        lines.remove(0);
    }
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

fn check_binaries(exec: &dyn CommandExecutor, report: &mut DiagnosticReport) -> Option<&'static str> {
    let daemon = freeradius::daemon_binary(exec);
    match daemon {
        Some(bin) => report.push("freeradius binary", Status::Pass, bin),
        None => report.push(
            "freeradius binary",
            Status::Fail,
            "neither freeradius nor radiusd found (apt-get install freeradius)",
        ),
    }
    for (bin, package, status) in [
        ("psql", "postgresql-client", Status::Fail),
        ("radtest", "freeradius-utils", Status::Warn),
        ("ss", "iproute2", Status::Warn),
    ] {
        if exec.check_command_exists(bin) {
            report.push(bin, Status::Pass, "found");
        } else {
            report.push(bin, status, format!("not found (install {})", package));
        }
    }
    daemon
}

fn check_layout(layout: &ConfigLayout, report: &mut DiagnosticReport) {
    if sql_module::is_enabled(layout) {
        report.push("sql module", Status::Pass, "enabled");
    } else if layout.sql_available().exists() {
        report.push("sql module", Status::Fail, "available but not linked in mods-enabled");
    } else {
        report.push("sql module", Status::Fail, "mods-available/sql missing");
    }

    match sites::sql_in_default_authorize(layout) {
        Ok(true) => report.push("sql in authorize", Status::Pass, "default site calls sql"),
        Ok(false) => report.push(
            "sql in authorize",
            Status::Fail,
            "sql missing or disabled in the default authorize section",
        ),
        Err(e) => report.push("sql in authorize", Status::Fail, e.to_string()),
    }

    match clients::list(&layout.clients_conf()) {
        Ok(list) => report.push("clients.conf", Status::Pass, format!("{} client(s)", list.len())),
        Err(e) => report.push("clients.conf", Status::Fail, e.to_string()),
    }
}

fn check_config_syntax(exec: &dyn CommandExecutor, daemon: &str, report: &mut DiagnosticReport) {
    match exec.execute(daemon, &["-XC"]) {
        Ok(output) if output.status.success() => {
            report.push("config check", Status::Pass, "configuration appears to be OK")
        }
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stdout).to_string()
                + &String::from_utf8_lossy(&output.stderr);
            let last = text
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("no output")
                .to_string();
            report.push("config check", Status::Fail, format!("{} -XC: {}", daemon, last));
        }
        Err(e) => report.push("config check", Status::Fail, e.to_string()),
    }
}

fn check_services(
    exec: &dyn CommandExecutor,
    radius_service: &str,
    report: &mut DiagnosticReport,
) {
    for unit in [radius_service, POSTGRES_SERVICE] {
        let name = format!("service {}", unit);
        match Service::new(exec, unit).is_active() {
            Ok(true) => report.push(&name, Status::Pass, "active"),
            Ok(false) => report.push(&name, Status::Fail, "not active"),
            Err(e) => report.push(&name, Status::Fail, e.to_string()),
        }
    }
}

fn check_ports(exec: &dyn CommandExecutor, report: &mut DiagnosticReport) {
    if !exec.check_command_exists("ss") {
        return;
    }
    let listening = match exec.execute("ss", &["-lun"]) {
        Ok(output) => listening_udp_ports(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            report.push("udp ports", Status::Warn, e.to_string());
            return;
        }
    };
    for port in RADIUS_PORTS {
        let name = format!("udp/{}", port);
        if listening.contains(port) {
            report.push(&name, Status::Pass, "listening");
        } else {
            report.push(&name, Status::Fail, "not listening");
        }
    }
}

fn check_database(psql: &Psql, report: &mut DiagnosticReport) {
    if !psql.can_connect() {
        report.push(
            "database",
            Status::Fail,
            format!(
                "cannot connect to {} on {}:{} as {}",
                psql.db.name, psql.db.host, psql.db.port, psql.db.user
            ),
        );
        return;
    }
    report.push(
        "database",
        Status::Pass,
        format!("connected to {}@{}", psql.db.name, psql.db.host),
    );

    match psql.schema_loaded() {
        Ok(true) => {
            let missing: Vec<&str> = postgres::RADIUS_TABLES
                .iter()
                .copied()
                .filter(|t| !matches!(psql.table_exists(t), Ok(true)))
                .collect();
            if missing.is_empty() {
                report.push("schema", Status::Pass, "all RADIUS tables present");
            } else {
                report.push("schema", Status::Warn, format!("missing: {}", missing.join(", ")));
            }
        }
        Ok(false) => {
            report.push("schema", Status::Fail, "radcheck table missing");
            return;
        }
        Err(e) => {
            report.push("schema", Status::Fail, e.to_string());
            return;
        }
    }

    match psql.query_value("SELECT count(DISTINCT username) FROM radcheck") {
        Ok(Some(n)) => report.push("users", Status::Pass, format!("{} user(s)", n.trim())),
        Ok(None) => report.push("users", Status::Warn, "no result"),
        Err(e) => report.push("users", Status::Warn, e.to_string()),
    }
    match psql.count_rows("nas", None) {
        Ok(n) => report.push("nas table", Status::Pass, format!("{} row(s)", n)),
        Err(e) => report.push("nas table", Status::Warn, e.to_string()),
    }
}

/// Run every check. Never fails; problems become report entries.
pub fn run(exec: &dyn CommandExecutor, settings: &Settings, log_lines: usize) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();

    if privileges::is_root() {
        report.push("root", Status::Pass, "running as root");
    } else {
        report.push("root", Status::Warn, "not root; some checks may be incomplete");
    }

    let daemon = check_binaries(exec, &mut report);

    let layout = match freeradius::discover(settings.radius.config_dir.as_deref()) {
        Ok(layout) => {
            report.push("config dir", Status::Pass, layout.root.display().to_string());
            check_layout(&layout, &mut report);
            Some(layout)
        }
        Err(e) => {
            let first = e.to_string().lines().next().unwrap_or_default().to_string();
            report.push("config dir", Status::Fail, first);
            None
        }
    };

    if let (Some(daemon), Some(_)) = (daemon, &layout) {
        check_config_syntax(exec, daemon, &mut report);
    }

    check_services(exec, &settings.radius.service, &mut report);
    check_ports(exec, &mut report);

    match postgres::resolve_password(&settings.database, layout.as_ref()) {
        Ok(password) => {
            let psql = Psql::new(exec, &settings.database, Some(&password));
            check_database(&psql, &mut report);
        }
        Err(_) => report.push(
            "database",
            Status::Fail,
            "password unknown (set RADIUS_DB_PASSWORD)",
        ),
    }

    match tail(&settings.radius.daemon_log, log_lines) {
        Ok(lines) => report.log_tail = lines,
        Err(e) => report.push(
            "daemon log",
            Status::Warn,
            format!("{}: {}", settings.radius.daemon_log.display(), e),
        ),
    }

    tracing::info!(
        failed = report.count(Status::Fail),
        warnings = report.count(Status::Warn),
        "diagnostics finished"
    );
    report
}
