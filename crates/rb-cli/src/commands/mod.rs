//! CLI command implementations

mod config;
mod connect;
mod status;

pub use config::{config_init, config_path, config_show, load_bridge_config, resolve_config_path};
pub use connect::{connect_command, ConnectOverrides};
pub use status::{status_command, status_url};
