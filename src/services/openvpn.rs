//! OpenVPN integration through the openvpn-auth-radius plugin

use crate::config::{OpenVpnSettings, Settings};
use crate::services::freeradius::clients::{self, NasClient};
use crate::services::freeradius::conf::{self, Edit};
use crate::services::freeradius::{ConfigLayout, policy};
use crate::services::nas;
use crate::services::postgres::Psql;
use crate::services::systemd::Service;
use crate::utils::exec::{CommandExecutor, PackageManager};
use crate::utils::string::{mask_secret, random_secret};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub const PLUGIN_PACKAGE: &str = "openvpn-auth-radius";

#[derive(Debug, Clone)]
pub struct OpenVpnOptions {
    /// Address the plugin sends RADIUS requests to
    pub radius_server: String,
    pub install_package: bool,
    pub restart_radius: bool,
    pub restart_openvpn: bool,
}

impl Default for OpenVpnOptions {
    fn default() -> Self {
        Self {
            radius_server: "127.0.0.1".to_string(),
            install_package: false,
            restart_radius: true,
            restart_openvpn: false,
        }
    }
}

/// radiusplugin.cnf for the openvpn-auth-radius plugin
pub fn render_plugin_config(settings: &OpenVpnSettings, radius_server: &str, secret: &str) -> String {
    format!(
        "# Managed by radctl
NAS-Identifier={nas_id}
Service-Type=5
Framed-Protocol=1
NAS-Port-Type=5
NAS-IP-Address={nas_ip}
OpenVPNConfig={server_conf}
overwriteccfiles=true
nonfatalaccounting=false

server
{{
	acctport=1813
	authport=1812
	name={server}
	retry=1
	wait=1
	sharedsecret={secret}
}}
",
        nas_id = settings.nas_identifier,
        nas_ip = settings.nas_ip,
        server_conf = settings.server_conf.display(),
        server = radius_server,
        secret = secret,
    )
}

/// The directive loading the plugin into the OpenVPN server
pub fn plugin_line(settings: &OpenVpnSettings) -> String {
    format!(
        "plugin {} {}",
        settings.plugin_path.display(),
        settings.plugin_config.display()
    )
}

/// Shared secret: configured value, then the existing client stanza, then a
/// fresh one. The flag reports whether it was generated.
pub fn resolve_secret(settings: &OpenVpnSettings, layout: &ConfigLayout) -> Result<(String, bool)> {
    if let Some(secret) = settings.nas_secret.as_deref().filter(|s| !s.is_empty()) {
        return Ok((secret.to_string(), false));
    }
    if let Some(existing) = clients::find(&layout.clients_conf(), &settings.nas_identifier)? {
        if !existing.secret.is_empty() {
            return Ok((existing.secret, false));
        }
    }
    Ok((random_secret(nas::SECRET_LEN), true))
}

/// Write the plugin configuration readable by root only. Returns whether it changed.
pub fn write_plugin_config(path: &Path, rendered: &str) -> Result<bool> {
    if fs::read_to_string(path).ok().as_deref() == Some(rendered) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginDirective {
    Added,
    Present,
    /// server.conf does not exist; the line has to be added by hand
    ConfMissing,
}

pub fn ensure_plugin_directive(server_conf: &Path, line: &str) -> Result<PluginDirective> {
    if !server_conf.exists() {
        return Ok(PluginDirective::ConfMissing);
    }
    let content = fs::read_to_string(server_conf)
        .with_context(|| format!("Failed to read {}", server_conf.display()))?;
    match conf::ensure_line(&content, line) {
        Edit::Changed(new) => {
            fs::write(server_conf, new)
                .with_context(|| format!("Failed to write {}", server_conf.display()))?;
            Ok(PluginDirective::Added)
        }
        _ => Ok(PluginDirective::Present),
    }
}

/// Wire OpenVPN to FreeRADIUS: NAS client, plugin config, policy and the
/// plugin directive in server.conf
pub fn configure(
    exec: &dyn CommandExecutor,
    layout: &ConfigLayout,
    settings: &Settings,
    psql: Option<&Psql>,
    opts: &OpenVpnOptions,
) -> Result<()> {
    let ovpn = &settings.openvpn;

    if opts.install_package {
        let pm = PackageManager::detect(exec);
        if pm.is_installed(exec, PLUGIN_PACKAGE)? {
            println!("✓ {} already installed", PLUGIN_PACKAGE);
        } else {
            println!("Installing {} via {}...", PLUGIN_PACKAGE, pm.display_name());
            pm.install_packages(exec, &[PLUGIN_PACKAGE])?;
            println!("✓ {} installed", PLUGIN_PACKAGE);
        }
    }

    let (secret, generated) = resolve_secret(ovpn, layout)?;
    let mut client = NasClient::new(&ovpn.nas_identifier, &ovpn.nas_ip, &secret);
    client.description = Some("OpenVPN server".to_string());
    let change = nas::add(layout, psql, &client)?;
    if change.file_changed {
        println!("✓ NAS client '{}' ({}) saved", client.name, client.ipaddr);
    } else {
        println!("✓ NAS client '{}' already up to date", client.name);
    }
    if generated {
        println!("  Generated shared secret: {}", secret);
    }
    if psql.is_some() && !change.mirrored {
        println!("⚠ Could not update the nas table (clients.conf is still authoritative)");
    }

    let rendered = render_plugin_config(ovpn, &opts.radius_server, &secret);
    if write_plugin_config(&ovpn.plugin_config, &rendered)? {
        println!("✓ Wrote {}", ovpn.plugin_config.display());
    } else {
        println!("✓ {} unchanged", ovpn.plugin_config.display());
    }

    if policy::install_openvpn(layout, &ovpn.nas_identifier)? {
        println!(
            "✓ Policy '{}' installed in {}",
            policy::OPENVPN_POLICY,
            layout.openvpn_policy().display()
        );
    } else {
        println!("✓ Policy '{}' already installed", policy::OPENVPN_POLICY);
    }

    let line = plugin_line(ovpn);
    match ensure_plugin_directive(&ovpn.server_conf, &line)? {
        PluginDirective::Added => println!("✓ Added plugin line to {}", ovpn.server_conf.display()),
        PluginDirective::Present => println!("✓ Plugin already loaded by {}", ovpn.server_conf.display()),
        PluginDirective::ConfMissing => {
            tracing::warn!(file = %ovpn.server_conf.display(), "OpenVPN server config not found");
            println!("⚠ {} not found. Add this line to your OpenVPN server config:", ovpn.server_conf.display());
            println!("    {}", line);
        }
    }

    if opts.restart_radius {
        Service::new(exec, &settings.radius.service).restart_and_verify()?;
        println!("✓ {} restarted", settings.radius.service);
    }

    if opts.restart_openvpn {
        let service = Service::new(exec, &ovpn.service);
        match service.restart() {
            Ok(()) => println!("✓ {} restarted", ovpn.service),
            Err(e) => {
                tracing::warn!(unit = %ovpn.service, error = %e, "OpenVPN restart failed");
                println!("⚠ Failed to restart {}: {}", ovpn.service, e);
            }
        }
    }

    println!();
    println!("RADIUS server: {}:1812 (secret {})", opts.radius_server, mask_secret(&secret));
    Ok(())
}
