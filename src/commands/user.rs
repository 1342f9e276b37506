use crate::UserCommands;
use crate::config::Settings;
use crate::services::users::{self, RadiusUser, RadtestResult};
use crate::utils::exec::CommandExecutor;
use crate::utils::string::random_secret;
use anyhow::Result;

const GENERATED_PASSWORD_LEN: usize = 16;

/// Handle user subcommands
pub fn handle_user(exec: &dyn CommandExecutor, settings: &Settings, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add {
            username,
            password,
            group,
            reply,
        } => {
            let (password, generated) = match password {
                Some(p) => (p, false),
                None => (random_secret(GENERATED_PASSWORD_LEN), true),
            };
            let user = RadiusUser {
                username,
                password,
                group,
                reply,
            };
            let layout = super::layout(settings).ok();
            let psql = super::database(exec, settings, layout.as_ref())?;

            let outcome = users::add(&psql, &user)?;
            println!("✓ User '{}' {}", user.username, outcome);
            if generated {
                println!("  Password: {}", user.password);
            }
            if let Some(group) = &user.group {
                println!("  Group: {}", group);
            }
            for attr in &user.reply {
                println!("  Reply: {}", attr);
            }
        }
        UserCommands::Delete { username, purge } => {
            let layout = super::layout(settings).ok();
            let psql = super::database(exec, settings, layout.as_ref())?;
            if users::delete(&psql, &username, purge)? {
                println!("✓ User '{}' deleted", username);
                if purge {
                    println!("  Accounting and post-auth history removed");
                }
            } else {
                tracing::warn!(username = %username, "delete of unknown user");
                println!("⚠ User '{}' not found, nothing to delete", username);
            }
        }
        UserCommands::List => {
            let layout = super::layout(settings).ok();
            let psql = super::database(exec, settings, layout.as_ref())?;
            let list = users::list(&psql)?;
            if list.is_empty() {
                println!("No users found.");
                return Ok(());
            }
            println!("{:<32} {:<24} REPLY ATTRS", "USERNAME", "GROUPS");
            for user in &list {
                let groups = if user.groups.is_empty() {
                    "-".to_string()
                } else {
                    user.groups.join(",")
                };
                println!("{:<32} {:<24} {}", user.username, groups, user.reply_count);
            }
            println!();
            println!("{} user(s)", list.len());
        }
        UserCommands::Test {
            username,
            password,
            server,
            secret,
        } => {
            let secret = secret.unwrap_or_else(|| settings.radius.secret.clone());
            println!("Testing '{}' against {}...", username, server);
            match users::radtest(exec, &username, &password, &server, &secret)? {
                RadtestResult::Accept => println!("✓ Access-Accept"),
                RadtestResult::Reject => {
                    anyhow::bail!("✗ Access-Reject for '{}'", username)
                }
                RadtestResult::Failed(detail) => {
                    anyhow::bail!("✗ No valid answer from {}: {}", server, detail)
                }
            }
        }
    }
    Ok(())
}
