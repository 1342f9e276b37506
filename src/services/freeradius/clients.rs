//! `clients.conf` stanza management

use super::conf::{self, Edit};
use anyhow::{Context, Result};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// A RADIUS client (NAS) as written to clients.conf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasClient {
    pub name: String,
    pub ipaddr: String,
    pub secret: String,
    pub nastype: String,
    pub description: Option<String>,
}

impl NasClient {
    pub fn new(name: &str, ipaddr: &str, secret: &str) -> Self {
        Self {
            name: name.to_string(),
            ipaddr: ipaddr.to_string(),
            secret: secret.to_string(),
            nastype: "other".to_string(),
            description: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_client_name(&self.name)?;
        validate_ipaddr(&self.ipaddr)?;
        if self.secret.is_empty() {
            anyhow::bail!("Client secret cannot be empty");
        }
        if self.secret.contains(['\n', '\r', '\0']) {
            anyhow::bail!("Client secret cannot contain line breaks or NUL");
        }
        if !self
            .nastype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            anyhow::bail!("Invalid nastype: {}", self.nastype);
        }
        Ok(())
    }

    /// Stanza text for clients.conf
    pub fn render(&self) -> String {
        let mut out = format!("client {} {{\n", self.name);
        out.push_str(&format!("\tipaddr = {}\n", self.ipaddr));
        out.push_str(&format!("\tsecret = {}\n", quote_if_needed(&self.secret)));
        out.push_str(&format!("\tshortname = {}\n", self.name));
        out.push_str(&format!("\tnastype = {}\n", self.nastype));
        out.push_str("}\n");
        out
    }
}

pub fn validate_client_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        anyhow::bail!(
            "Invalid client name '{}': use letters, digits, '.', '_' or '-'",
            name
        );
    }
    Ok(())
}

/// An IP address, optionally with a /prefix
pub fn validate_ipaddr(ipaddr: &str) -> Result<()> {
    let (addr, prefix) = match ipaddr.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (ipaddr, None),
    };
    let ip: IpAddr = addr
        .parse()
        .with_context(|| format!("Invalid client address: {}", ipaddr))?;
    if let Some(prefix) = prefix {
        let bits: u8 = prefix
            .parse()
            .with_context(|| format!("Invalid prefix length in: {}", ipaddr))?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if bits > max {
            anyhow::bail!("Prefix length /{} out of range in: {}", bits, ipaddr);
        }
    }
    Ok(())
}

fn quote_if_needed(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "._-+/@:".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn read(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Insert or replace the client's stanza. Returns whether the file changed.
pub fn upsert(path: &Path, client: &NasClient) -> Result<bool> {
    client.validate()?;
    let content = read(path)?;
    match conf::upsert_block(&content, "client", &client.name, &client.render())
        .with_context(|| format!("Failed to parse {}", path.display()))?
    {
        Edit::Changed(new) => {
            write(path, &new)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Remove the client's stanza. Returns false when it was not present.
pub fn remove(path: &Path, name: &str) -> Result<bool> {
    let content = read(path)?;
    match conf::remove_block(&content, "client", name)
        .with_context(|| format!("Failed to parse {}", path.display()))?
    {
        Edit::Changed(new) => {
            write(path, &new)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// All client stanzas in the file
pub fn list(path: &Path) -> Result<Vec<NasClient>> {
    let content = read(path)?;
    let blocks = conf::list_blocks(&content, "client")
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(blocks
        .into_iter()
        .map(|b| NasClient {
            ipaddr: b
                .get("ipaddr")
                .or_else(|| b.get("ipv4addr"))
                .or_else(|| b.get("ipv6addr"))
                .unwrap_or("")
                .to_string(),
            secret: b.get("secret").unwrap_or("").to_string(),
            nastype: b.get("nastype").unwrap_or("other").to_string(),
            description: None,
            name: b.name,
        })
        .collect())
}

/// Look up a single client by name
pub fn find(path: &Path, name: &str) -> Result<Option<NasClient>> {
    Ok(list(path)?.into_iter().find(|c| c.name == name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let client = NasClient::new("vpn", "10.8.0.1", "s3cret");
        assert_eq!(
            client.render(),
            "client vpn {\n\tipaddr = 10.8.0.1\n\tsecret = s3cret\n\tshortname = vpn\n\tnastype = other\n}\n"
        );
    }

    #[test]
    fn test_secret_with_spaces_is_quoted() {
        let client = NasClient::new("a", "10.0.0.1", "two words \"q\"");
        assert!(client.render().contains("secret = \"two words \\\"q\\\"\"\n"));
    }

    #[test]
    fn test_validation() {
        assert!(NasClient::new("ok-name.1", "192.0.2.0/24", "x").validate().is_ok());
        assert!(NasClient::new("bad name", "192.0.2.1", "x").validate().is_err());
        assert!(NasClient::new("a", "999.1.1.1", "x").validate().is_err());
        assert!(NasClient::new("a", "192.0.2.1/33", "x").validate().is_err());
        assert!(NasClient::new("a", "2001:db8::/64", "x").validate().is_ok());
        assert!(NasClient::new("a", "192.0.2.1", "").validate().is_err());
        assert!(NasClient::new("a", "192.0.2.1", "x\ny").validate().is_err());
    }

    #[test]
    fn test_upsert_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.conf");
        fs::write(
            &path,
            "client localhost {\n\tipaddr = 127.0.0.1\n\tsecret = testing123\n}\n",
        )
        .unwrap();

        let client = NasClient::new("vpn", "10.8.0.1", "s3cret");
        assert!(upsert(&path, &client).unwrap());
        assert!(!upsert(&path, &client).unwrap());

        let clients = list(&path).unwrap();
        assert_eq!(clients.len(), 2);
        let vpn = find(&path, "vpn").unwrap().unwrap();
        assert_eq!(vpn.ipaddr, "10.8.0.1");
        assert_eq!(vpn.secret, "s3cret");

        let moved = NasClient::new("vpn", "10.8.0.2", "s3cret");
        assert!(upsert(&path, &moved).unwrap());
        assert_eq!(find(&path, "vpn").unwrap().unwrap().ipaddr, "10.8.0.2");

        assert!(remove(&path, "vpn").unwrap());
        assert!(!remove(&path, "vpn").unwrap());
        assert_eq!(list(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_quoted_secret_round_trips_through_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.conf");
        let client = NasClient::new("q", "10.0.0.9", "has space");
        upsert(&path, &client).unwrap();
        assert_eq!(find(&path, "q").unwrap().unwrap().secret, "has space");
    }

    #[test]
    fn test_backslash_secret_survives_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.conf");
        let client = NasClient::new("vpn", "10.0.0.1", r"ab\cd");
        assert!(upsert(&path, &client).unwrap());
        assert!(fs::read_to_string(&path).unwrap().contains(r#"secret = "ab\\cd""#));

        let read_back = find(&path, "vpn").unwrap().unwrap();
        assert_eq!(read_back.secret, r"ab\cd");
        assert!(!upsert(&path, &read_back).unwrap());
    }
}
