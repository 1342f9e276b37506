//! NAS clients: clients.conf is authoritative, the `nas` table is a mirror

use crate::services::freeradius::ConfigLayout;
use crate::services::freeradius::clients::{self, NasClient};
use crate::services::postgres::{Psql, quote_literal};
use crate::utils::string::random_secret;
use anyhow::{Context, Result};

/// Length of generated shared secrets
pub const SECRET_LEN: usize = 32;

/// Build a client, generating a secret when none was given.
/// The flag reports whether the secret was generated.
pub fn prepare(
    name: &str,
    ipaddr: &str,
    secret: Option<&str>,
    nastype: Option<&str>,
) -> Result<(NasClient, bool)> {
    let (secret, generated) = match secret.filter(|s| !s.is_empty()) {
        Some(s) => (s.to_string(), false),
        None => (random_secret(SECRET_LEN), true),
    };
    let mut client = NasClient::new(name, ipaddr, &secret);
    if let Some(nastype) = nastype {
        client.nastype = nastype.to_string();
    }
    client.validate()?;
    Ok((client, generated))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NasChange {
    pub file_changed: bool,
    pub mirrored: bool,
}

/// Write the client to clients.conf and mirror it into the `nas` table.
/// A failing mirror is logged and reported, never fatal.
pub fn add(layout: &ConfigLayout, psql: Option<&Psql>, client: &NasClient) -> Result<NasChange> {
    let path = layout.clients_conf();
    let file_changed = clients::upsert(&path, client)
        .with_context(|| format!("Failed to update {}", path.display()))?;
    tracing::info!(client = %client.name, ipaddr = %client.ipaddr, file_changed, "client saved");

    let mirrored = match psql {
        Some(psql) => match mirror(psql, client) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(client = %client.name, error = %e, "nas table not updated");
                false
            }
        },
        None => false,
    };

    Ok(NasChange {
        file_changed,
        mirrored,
    })
}

fn mirror(psql: &Psql, client: &NasClient) -> Result<()> {
    let short = quote_literal(&client.name)?;
    let description = client
        .description
        .clone()
        .unwrap_or_else(|| format!("{} (radctl)", client.name));
    psql.transaction(&[
        format!("DELETE FROM nas WHERE shortname = {}", short),
        format!(
            "INSERT INTO nas (nasname, shortname, type, secret, description) VALUES ({}, {}, {}, {}, {})",
            quote_literal(&client.ipaddr)?,
            short,
            quote_literal(&client.nastype)?,
            quote_literal(&client.secret)?,
            quote_literal(&description)?
        ),
    ])
}

/// Remove the client from clients.conf and the `nas` table.
/// Returns false when clients.conf had no such client.
pub fn delete(layout: &ConfigLayout, psql: Option<&Psql>, name: &str) -> Result<bool> {
    clients::validate_client_name(name)?;
    let removed = clients::remove(&layout.clients_conf(), name)?;

    if let Some(psql) = psql {
        let sql = format!("DELETE FROM nas WHERE shortname = {}", quote_literal(name)?);
        if let Err(e) = psql.execute(&sql) {
            tracing::warn!(client = name, error = %e, "nas table not updated");
        }
    }
    tracing::info!(client = name, removed, "client deleted");
    Ok(removed)
}

pub fn list(layout: &ConfigLayout) -> Result<Vec<NasClient>> {
    clients::list(&layout.clients_conf())
}
