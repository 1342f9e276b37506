//! RADIUS users stored in the SQL tables

use crate::services::postgres::{Psql, quote_literal};
use crate::utils::exec::CommandExecutor;
use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;

/// Operators accepted by FreeRADIUS in check/reply rows
pub const OPERATORS: &[&str] = &[
    ":=", "==", "+=", "!=", ">=", "<=", "=~", "!~", "=*", "!*", "=", ">", "<",
];

pub const MAX_USERNAME_LEN: usize = 64;

pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        anyhow::bail!("Username cannot be empty");
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        anyhow::bail!("Username longer than {} characters", MAX_USERNAME_LEN);
    }
    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        anyhow::bail!("Username '{}' contains whitespace or control characters", username);
    }
    Ok(())
}

fn validate_attribute_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        anyhow::bail!("Invalid attribute name: '{}'", name);
    }
    Ok(())
}

/// A `radreply` row, written on the command line as `Attribute<op>value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyAttribute {
    pub attribute: String,
    pub op: String,
    pub value: String,
}

impl FromStr for ReplyAttribute {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let split = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .with_context(|| format!("Reply attribute '{}' has no operator", s))?;
        let (attribute, rest) = s.split_at(split);
        validate_attribute_name(attribute)?;

        // Longest operator first so ":=" is not read as ":" + "="
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(*op))
            .with_context(|| format!("Unknown operator in reply attribute '{}'", s))?;
        let value = &rest[op.len()..];
        if value.is_empty() {
            anyhow::bail!("Reply attribute '{}' has no value", attribute);
        }

        Ok(Self {
            attribute: attribute.to_string(),
            op: op.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for ReplyAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.attribute, self.op, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusUser {
    pub username: String,
    pub password: String,
    pub group: Option<String>,
    pub reply: Vec<ReplyAttribute>,
}

impl RadiusUser {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            group: None,
            reply: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_username(&self.username)?;
        if self.password.is_empty() {
            anyhow::bail!("Password cannot be empty");
        }
        if let Some(group) = &self.group {
            validate_username(group).context("Invalid group name")?;
        }
        for attr in &self.reply {
            validate_attribute_name(&attr.attribute)?;
            if !OPERATORS.contains(&attr.op.as_str()) {
                anyhow::bail!("Unknown operator '{}' for {}", attr.op, attr.attribute);
            }
        }
        Ok(())
    }

    /// Statements replacing everything radctl manages for this user
    fn upsert_statements(&self) -> Result<Vec<String>> {
        let user = quote_literal(&self.username)?;
        let mut sql = vec![
            format!(
                "DELETE FROM radcheck WHERE username = {} AND attribute = 'Cleartext-Password'",
                user
            ),
            format!(
                "INSERT INTO radcheck (username, attribute, op, value) VALUES ({}, 'Cleartext-Password', ':=', {})",
                user,
                quote_literal(&self.password)?
            ),
        ];

        if let Some(group) = &self.group {
            sql.push(format!("DELETE FROM radusergroup WHERE username = {}", user));
            sql.push(format!(
                "INSERT INTO radusergroup (username, groupname, priority) VALUES ({}, {}, 1)",
                user,
                quote_literal(group)?
            ));
        }

        if !self.reply.is_empty() {
            sql.push(format!("DELETE FROM radreply WHERE username = {}", user));
            for attr in &self.reply {
                sql.push(format!(
                    "INSERT INTO radreply (username, attribute, op, value) VALUES ({}, {}, {}, {})",
                    user,
                    quote_literal(&attr.attribute)?,
                    quote_literal(&attr.op)?,
                    quote_literal(&attr.value)?
                ));
            }
        }
        Ok(sql)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Created => write!(f, "created"),
            UpsertOutcome::Updated => write!(f, "updated"),
        }
    }
}

pub fn user_exists(psql: &Psql, username: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM radcheck WHERE username = {} LIMIT 1",
        quote_literal(username)?
    );
    Ok(psql.query_value(&sql)?.is_some())
}

/// Create or update a user in one transaction
pub fn add(psql: &Psql, user: &RadiusUser) -> Result<UpsertOutcome> {
    user.validate()?;
    let existed = user_exists(psql, &user.username)?;
    psql.transaction(&user.upsert_statements()?)
        .with_context(|| format!("Failed to save user {}", user.username))?;

    tracing::info!(username = %user.username, existed, "user saved");
    Ok(if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

/// Remove a user; `purge` also drops accounting and post-auth history.
/// Returns false when the user did not exist.
pub fn delete(psql: &Psql, username: &str, purge: bool) -> Result<bool> {
    validate_username(username)?;
    if !user_exists(psql, username)? {
        return Ok(false);
    }

    let user = quote_literal(username)?;
    let mut tables = vec!["radcheck", "radreply", "radusergroup"];
    if purge {
        tables.extend(["radacct", "radpostauth"]);
    }
    let statements: Vec<String> = tables
        .iter()
        .map(|t| format!("DELETE FROM {} WHERE username = {}", t, user))
        .collect();
    psql.transaction(&statements)
        .with_context(|| format!("Failed to delete user {}", username))?;

    tracing::info!(username, purge, "user deleted");
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub username: String,
    pub groups: Vec<String>,
    pub reply_count: u64,
}

const LIST_USERS_SQL: &str = "SELECT c.username, \
    COALESCE((SELECT string_agg(g.groupname, ',' ORDER BY g.priority) FROM radusergroup g WHERE g.username = c.username), ''), \
    (SELECT count(*) FROM radreply r WHERE r.username = c.username) \
    FROM (SELECT DISTINCT username FROM radcheck) c ORDER BY c.username";

pub fn list(psql: &Psql) -> Result<Vec<UserSummary>> {
    psql.query(LIST_USERS_SQL)?
        .into_iter()
        .map(|row| -> Result<UserSummary> {
            let username = row.first().cloned().unwrap_or_default();
            let groups = row
                .get(1)
                .map(|g| {
                    g.split(',')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let reply_count = row
                .get(2)
                .map(|c| c.parse())
                .transpose()
                .with_context(|| format!("Unexpected reply count for {}", username))?
                .unwrap_or(0);
            Ok(UserSummary {
                username,
                groups,
                reply_count,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadtestResult {
    Accept,
    Reject,
    /// No recognizable answer; carries the last line of output
    Failed(String),
}

impl RadtestResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, RadtestResult::Accept)
    }
}

pub fn classify_radtest(output: &str) -> RadtestResult {
    if output.contains("Access-Accept") {
        RadtestResult::Accept
    } else if output.contains("Access-Reject") {
        RadtestResult::Reject
    } else {
        let last = output
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no response from server");
        RadtestResult::Failed(last.to_string())
    }
}

/// Authenticate through the running server with `radtest`
pub fn radtest(
    exec: &dyn CommandExecutor,
    username: &str,
    password: &str,
    server: &str,
    secret: &str,
) -> Result<RadtestResult> {
    if !exec.check_command_exists("radtest") {
        anyhow::bail!("radtest not found. Install it with: apt-get install freeradius-utils");
    }
    let output = exec
        .execute("radtest", &[username, password, server, "0", secret])
        .context("Failed to run radtest")?;

    // radtest exits non-zero on reject, so the output decides
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let result = classify_radtest(&text);
    tracing::info!(username, server, ?result, "radtest");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseSettings;
    use crate::utils::exec::testing::MockExecutor;

    fn psql(exec: &MockExecutor) -> Psql<'_> {
        Psql::new(exec, &DatabaseSettings::default(), Some("pw"))
    }

    fn transaction_sql(exec: &MockExecutor) -> String {
        exec.calls_matching("--single-transaction")
            .first()
            .and_then(|c| c.input.clone())
            .map(|i| String::from_utf8_lossy(&i).to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_username_validation() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("alice@example.com").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("tab\there").is_err());
        assert!(validate_username(&"x".repeat(64)).is_ok());
        assert!(validate_username(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_parse_reply_attribute() {
        let attr: ReplyAttribute = "Framed-IP-Address=10.8.0.5".parse().unwrap();
        assert_eq!(attr.attribute, "Framed-IP-Address");
        assert_eq!(attr.op, "=");
        assert_eq!(attr.value, "10.8.0.5");

        let attr: ReplyAttribute = "Session-Timeout:=3600".parse().unwrap();
        assert_eq!(attr.op, ":=");
        assert_eq!(attr.value, "3600");

        let attr: ReplyAttribute = "Reply-Message+=hello world".parse().unwrap();
        assert_eq!(attr.op, "+=");
        assert_eq!(attr.value, "hello world");

        assert!("Session-Timeout".parse::<ReplyAttribute>().is_err());
        assert!("Session-Timeout:=".parse::<ReplyAttribute>().is_err());
        assert!("Bad Name=1".parse::<ReplyAttribute>().is_err());
        assert!("Attr%1".parse::<ReplyAttribute>().is_err());
    }

    #[test]
    fn test_add_creates_user_in_one_transaction() {
        let exec = MockExecutor::new();
        let mut user = RadiusUser::new("alice", "o'pass");
        user.group = Some("staff".to_string());
        user.reply.push("Session-Timeout:=3600".parse().unwrap());

        assert_eq!(add(&psql(&exec), &user).unwrap(), UpsertOutcome::Created);

        let sql = transaction_sql(&exec);
        assert!(sql.contains(
            "INSERT INTO radcheck (username, attribute, op, value) VALUES ('alice', 'Cleartext-Password', ':=', 'o''pass')"
        ));
        assert!(sql.contains("INSERT INTO radusergroup (username, groupname, priority) VALUES ('alice', 'staff', 1)"));
        assert!(sql.contains("VALUES ('alice', 'Session-Timeout', ':=', '3600')"));
        assert!(sql.find("DELETE FROM radcheck").unwrap() < sql.find("INSERT INTO radcheck").unwrap());
    }

    #[test]
    fn test_add_existing_user_is_update() {
        let exec = MockExecutor::new().respond("psql", 0, "1\n");
        let user = RadiusUser::new("alice", "new");
        assert_eq!(add(&psql(&exec), &user).unwrap(), UpsertOutcome::Updated);
        // Without --group or --reply those rows are left alone
        let sql = transaction_sql(&exec);
        assert!(!sql.contains("radusergroup"));
        assert!(!sql.contains("radreply"));
    }

    #[test]
    fn test_add_rejects_invalid_user() {
        let exec = MockExecutor::new();
        assert!(add(&psql(&exec), &RadiusUser::new("bad user", "x")).is_err());
        assert!(add(&psql(&exec), &RadiusUser::new("alice", "")).is_err());
        assert!(exec.calls.borrow().is_empty());
    }

    #[test]
    fn test_delete_unknown_user() {
        let exec = MockExecutor::new();
        assert!(!delete(&psql(&exec), "ghost", false).unwrap());
        assert!(exec.calls_matching("--single-transaction").is_empty());
    }

    #[test]
    fn test_delete_with_purge() {
        let exec = MockExecutor::new().respond("psql", 0, "1\n");
        assert!(delete(&psql(&exec), "alice", true).unwrap());
        let sql = transaction_sql(&exec);
        for table in ["radcheck", "radreply", "radusergroup", "radacct", "radpostauth"] {
            assert!(sql.contains(&format!("DELETE FROM {} WHERE username = 'alice'", table)));
        }
    }

    #[test]
    fn test_delete_keeps_history_by_default() {
        let exec = MockExecutor::new().respond("psql", 0, "1\n");
        delete(&psql(&exec), "alice", false).unwrap();
        let sql = transaction_sql(&exec);
        assert!(!sql.contains("radacct"));
        assert!(!sql.contains("radpostauth"));
    }

    #[test]
    fn test_list_parses_rows() {
        let exec = MockExecutor::new().respond("psql", 0, "alice\tstaff,vpn\t2\nbob\t\t0\n");
        let users = list(&psql(&exec)).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].groups, vec!["staff", "vpn"]);
        assert_eq!(users[0].reply_count, 2);
        assert!(users[1].groups.is_empty());
    }

    #[test]
    fn test_classify_radtest() {
        let accept = "Sent Access-Request Id 1\nReceived Access-Accept Id 1 from 127.0.0.1:1812";
        assert_eq!(classify_radtest(accept), RadtestResult::Accept);
        let reject = "Sent Access-Request Id 2\nReceived Access-Reject Id 2";
        assert_eq!(classify_radtest(reject), RadtestResult::Reject);
        assert_eq!(
            classify_radtest("Sent Access-Request\n(0) No reply from server for ID 3\n"),
            RadtestResult::Failed("(0) No reply from server for ID 3".to_string())
        );
        assert_eq!(
            classify_radtest(""),
            RadtestResult::Failed("no response from server".to_string())
        );
    }

    #[test]
    fn test_radtest_requires_binary() {
        let exec = MockExecutor::new();
        assert!(radtest(&exec, "u", "p", "127.0.0.1", "s").is_err());
    }

    #[test]
    fn test_radtest_reject_is_not_an_error() {
        let exec = MockExecutor::new()
            .with_commands(&["radtest"])
            .respond("radtest", 1, "Received Access-Reject Id 7");
        let result = radtest(&exec, "u", "p", "127.0.0.1", "testing123").unwrap();
        assert_eq!(result, RadtestResult::Reject);
        assert_eq!(
            exec.command_lines(),
            vec!["radtest u p 127.0.0.1 0 testing123"]
        );
    }
}
