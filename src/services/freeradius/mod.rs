//! FreeRADIUS configuration files

pub mod clients;
pub mod conf;
pub mod paths;
pub mod policy;
pub mod sites;
pub mod sql_module;

pub use paths::{ConfigLayout, daemon_binary, discover};
