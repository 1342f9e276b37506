use crate::config::Settings;
use crate::services::openvpn::{self, OpenVpnOptions};
use crate::utils::exec::CommandExecutor;
use crate::utils::privileges;
use anyhow::Result;

/// Handle openvpn-config command
pub fn handle_openvpn_config(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    radius_server: String,
    install_plugin: bool,
    restart_openvpn: bool,
    no_restart: bool,
) -> Result<()> {
    privileges::require_root("openvpn-config")?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("OpenVPN RADIUS integration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let layout = super::layout(settings)?;
    let psql = super::optional_database(exec, settings, Some(&layout));
    let opts = OpenVpnOptions {
        radius_server,
        install_package: install_plugin,
        restart_radius: !no_restart,
        restart_openvpn,
    };
    openvpn::configure(exec, &layout, settings, psql.as_ref(), &opts)
}
