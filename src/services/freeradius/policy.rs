//! `policy.d/openvpn`

use super::paths::ConfigLayout;
use super::sites;
use anyhow::{Context, Result};
use std::fs;

/// Name of the policy, also the directive added to post-auth
pub const OPENVPN_POLICY: &str = "openvpn_nas";

/// Render the policy for requests coming from the OpenVPN NAS
pub fn render_openvpn(nas_identifier: &str, interim_interval: u32) -> String {
    format!(
        r#"# Managed by radctl
# Applied in post-auth for requests sent by the OpenVPN radius plugin.
{policy} {{
	if (&request:NAS-Identifier && &request:NAS-Identifier == "{nas}") {{
		update reply {{
			&Acct-Interim-Interval := {interval}
		}}
	}}
}}
"#,
        policy = OPENVPN_POLICY,
        nas = nas_identifier.replace('\\', "\\\\").replace('"', "\\\""),
        interval = interim_interval
    )
}

/// Write the policy file and call it from the default server's post-auth.
/// Returns whether anything changed.
pub fn install_openvpn(layout: &ConfigLayout, nas_identifier: &str) -> Result<bool> {
    let path = layout.openvpn_policy();
    let rendered = render_openvpn(nas_identifier, 300);
    let mut changed = false;

    if fs::read_to_string(&path).ok().as_deref() != Some(rendered.as_str()) {
        fs::create_dir_all(layout.policy_dir())
            .with_context(|| format!("Failed to create {}", layout.policy_dir().display()))?;
        fs::write(&path, &rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        changed = true;
    }

    let patches = sites::ensure_in_sections(
        &layout.site_default(),
        "default",
        &["post-auth"],
        OPENVPN_POLICY,
    )?;
    if patches.iter().any(|p| p.missing) {
        anyhow::bail!(
            "post-auth section not found in {}; add '{}' to it manually",
            layout.site_default().display(),
            OPENVPN_POLICY
        );
    }
    Ok(changed || patches.iter().any(|p| p.changed))
}
