use crate::ClientCommands;
use crate::config::Settings;
use crate::services::nas;
use crate::services::systemd::Service;
use crate::utils::exec::CommandExecutor;
use crate::utils::privileges;
use crate::utils::string::mask_secret;
use anyhow::Result;

fn restart(exec: &dyn CommandExecutor, settings: &Settings) -> Result<()> {
    Service::new(exec, &settings.radius.service).restart_and_verify()?;
    println!("✓ {} restarted", settings.radius.service);
    Ok(())
}

/// Handle client subcommands
pub fn handle_client(
    exec: &dyn CommandExecutor,
    settings: &Settings,
    command: ClientCommands,
) -> Result<()> {
    match command {
        ClientCommands::Add {
            name,
            ipaddr,
            secret,
            nastype,
            no_restart,
        } => {
            privileges::require_root("client add")?;
            let layout = super::layout(settings)?;
            let (client, generated) =
                nas::prepare(&name, &ipaddr, secret.as_deref(), nastype.as_deref())?;
            let psql = super::optional_database(exec, settings, Some(&layout));

            let change = nas::add(&layout, psql.as_ref(), &client)?;
            if change.file_changed {
                println!("✓ Client '{}' ({}) saved to {}", client.name, client.ipaddr, layout.clients_conf().display());
            } else {
                println!("✓ Client '{}' already up to date", client.name);
            }
            if psql.is_some() && !change.mirrored {
                println!("⚠ Could not update the nas table");
            }
            if generated {
                println!("  Shared secret: {}", client.secret);
            }

            if change.file_changed && !no_restart {
                restart(exec, settings)?;
            }
        }
        ClientCommands::Delete { name, no_restart } => {
            privileges::require_root("client delete")?;
            let layout = super::layout(settings)?;
            let psql = super::optional_database(exec, settings, Some(&layout));

            if nas::delete(&layout, psql.as_ref(), &name)? {
                println!("✓ Client '{}' deleted", name);
                if !no_restart {
                    restart(exec, settings)?;
                }
            } else {
                println!("⚠ Client '{}' not found in {}", name, layout.clients_conf().display());
            }
        }
        ClientCommands::List { show_secrets } => {
            let layout = super::layout(settings)?;
            let clients = nas::list(&layout)?;
            if clients.is_empty() {
                println!("No clients in {}", layout.clients_conf().display());
                return Ok(());
            }
            println!("{:<20} {:<24} {:<12} SECRET", "NAME", "ADDRESS", "TYPE");
            for client in &clients {
                let secret = if show_secrets {
                    client.secret.clone()
                } else {
                    mask_secret(&client.secret)
                };
                println!("{:<20} {:<24} {:<12} {}", client.name, client.ipaddr, client.nastype, secret);
            }
        }
    }
    Ok(())
}
