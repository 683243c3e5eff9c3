//! Configuration parsing for keycast
//!
//! This crate handles the optional KDL configuration file. Every setting has a
//! compiled-in default, so a missing file is not an error unless the user
//! asked for a specific path.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str, DEFAULT_CONFIG_PATH};
