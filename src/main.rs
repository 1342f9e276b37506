use anyhow::Result;
use clap::Parser;
use radctl::Commands;
use radctl::config;
use radctl::utils::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "radctl")]
#[command(version)]
#[command(about = "Install, configure and operate FreeRADIUS backed by PostgreSQL", long_about = None)]
struct Cli {
    /// Settings file (default: ~/.config/radctl/config.toml, or $RADCTL_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_config(cli.config.as_deref())?;
    logging::init(cli.verbose, &loaded.settings.log_file);
    tracing::debug!(config = %loaded.path.display(), "starting");

    radctl::handle_command(loaded, cli.verbose, cli.command)
}
