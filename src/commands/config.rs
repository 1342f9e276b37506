use crate::ConfigCommands;
use crate::config::{self, LoadedConfig, Settings};
use crate::utils::string::mask_secret;
use anyhow::{Context, Result};

/// Copy of the settings with every secret masked
fn masked(settings: &Settings) -> Settings {
    let mut out = settings.clone();
    out.database.password = out.database.password.as_deref().map(mask_secret);
    out.radius.secret = mask_secret(&out.radius.secret);
    out.radius.test_password = mask_secret(&out.radius.test_password);
    out.openvpn.nas_secret = out.openvpn.nas_secret.as_deref().map(mask_secret);
    out
}

/// Handle config subcommands
pub fn handle_config(loaded: &LoadedConfig, verbose: u8, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let settings = if verbose > 0 {
                loaded.settings.clone()
            } else {
                masked(&loaded.settings)
            };
            let exists = loaded.path.exists();
            println!(
                "# {}{}",
                loaded.path.display(),
                if exists { "" } else { " (not created yet)" }
            );
            println!("# defaults < settings file < environment");
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&settings).context("Failed to serialize settings")?
            );
        }
        ConfigCommands::Path => println!("{}", loaded.path.display()),
        ConfigCommands::Env => print!("{}", config::EXAMPLE_ENV),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hides_secrets() {
        let mut settings = Settings::default();
        settings.database.password = Some("supersecret".to_string());
        settings.openvpn.nas_secret = Some("vpnsecret".to_string());

        let out = masked(&settings);
        assert_eq!(out.database.password.as_deref(), Some("su****"));
        assert_eq!(out.radius.secret, "te****");
        assert_eq!(out.openvpn.nas_secret.as_deref(), Some("vp****"));
        assert_eq!(out.database.host, settings.database.host);
    }
}
