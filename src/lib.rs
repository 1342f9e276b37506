// radctl library
// Services hold the logic; commands only orchestrate and print

mod cli_types;
mod commands;
pub mod config;
pub mod services;
pub mod utils;

pub use cli_types::{ClientCommands, Commands, ConfigCommands, UserCommands};
pub use commands::handle_command;
