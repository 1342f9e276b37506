use crate::config::{LoadedConfig, Settings};
use crate::services::install::{self, InstallOptions};
use crate::utils::exec::CommandExecutor;
use anyhow::Result;

/// Handle install command
pub fn handle_install(
    exec: &dyn CommandExecutor,
    loaded: &mut LoadedConfig,
    skip_packages: bool,
    skip_test: bool,
) -> Result<()> {
    let opts = InstallOptions {
        skip_packages,
        skip_test,
    };
    install::install(exec, loaded, &opts)
}

/// Handle fix command
pub fn handle_fix(exec: &dyn CommandExecutor, settings: &Settings, skip_test: bool) -> Result<()> {
    let opts = InstallOptions {
        skip_packages: true,
        skip_test,
    };
    install::fix(exec, settings, &opts)
}
