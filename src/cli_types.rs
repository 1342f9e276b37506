// CLI types for radctl (shared by the library and the binary)
use crate::services::users::ReplyAttribute;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Install FreeRADIUS and PostgreSQL and wire them together
    Install {
        /// Do not install or check packages
        #[arg(long)]
        skip_packages: bool,
        /// Skip the final radtest of the test user
        #[arg(long)]
        skip_test: bool,
    },
    /// Repair an existing installation (keeps packages and the database password)
    Fix {
        /// Skip the final radtest of the test user
        #[arg(long)]
        skip_test: bool,
    },
    /// Manage RADIUS users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage NAS clients (clients.conf and the nas table)
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },
    /// Back up the FreeRADIUS configuration and database
    Backup {
        /// List existing backups instead of creating one
        #[arg(long)]
        list: bool,
        /// Keep only the newest N backups after creating this one
        #[arg(long, value_name = "N")]
        keep: Option<usize>,
        /// Leave the database dump out
        #[arg(long)]
        no_database: bool,
    },
    /// Restore configuration and database from a backup
    Restore {
        /// Backup archive to restore
        #[arg(required_unless_present = "latest")]
        archive: Option<PathBuf>,
        /// Restore the newest archive in the backup directory
        #[arg(long, conflicts_with = "archive")]
        latest: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Do not back up the current state first
        #[arg(long)]
        no_safety_backup: bool,
        /// Restore only the configuration
        #[arg(long)]
        no_database: bool,
    },
    /// Check the installation and report problems
    Diagnostics {
        /// Number of FreeRADIUS log lines to show
        #[arg(long, default_value_t = 20)]
        log_lines: usize,
    },
    /// Configure FreeRADIUS for the OpenVPN radius plugin
    OpenvpnConfig {
        /// Address OpenVPN uses to reach FreeRADIUS
        #[arg(long, default_value = "127.0.0.1")]
        radius_server: String,
        /// Install the openvpn-auth-radius package
        #[arg(long)]
        install_plugin: bool,
        /// Restart the OpenVPN service afterwards
        #[arg(long)]
        restart_openvpn: bool,
        /// Do not restart FreeRADIUS
        #[arg(long)]
        no_restart: bool,
    },
    /// Show radctl settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user or update its password, group and reply attributes
    Add {
        username: String,
        /// Password (generated when omitted)
        password: Option<String>,
        /// Group to place the user in
        #[arg(long)]
        group: Option<String>,
        /// Reply attribute, e.g. Framed-IP-Address=10.8.0.5 (repeatable)
        #[arg(long = "reply", value_name = "ATTR<op>VALUE")]
        reply: Vec<ReplyAttribute>,
    },
    /// Delete a user
    Delete {
        username: String,
        /// Also delete accounting and post-auth history
        #[arg(long)]
        purge: bool,
    },
    /// List users
    List,
    /// Authenticate a user against the running server with radtest
    Test {
        username: String,
        password: String,
        /// RADIUS server address
        #[arg(long, default_value = "127.0.0.1")]
        server: String,
        /// Shared secret (defaults to the configured localhost secret)
        #[arg(long)]
        secret: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ClientCommands {
    /// Add or update a NAS client
    Add {
        /// Client name (shortname)
        name: String,
        /// IP address or CIDR network
        ipaddr: String,
        /// Shared secret (generated when omitted)
        #[arg(long)]
        secret: Option<String>,
        /// NAS type
        #[arg(long)]
        nastype: Option<String>,
        /// Do not restart FreeRADIUS
        #[arg(long)]
        no_restart: bool,
    },
    /// Delete a NAS client
    Delete {
        name: String,
        /// Do not restart FreeRADIUS
        #[arg(long)]
        no_restart: bool,
    },
    /// List NAS clients
    List {
        /// Print secrets in full
        #[arg(long)]
        show_secrets: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show resolved settings (secrets masked unless -v)
    Show,
    /// Print the settings file location
    Path,
    /// Print an example .env file
    Env,
}
