//! Configuration: built-in defaults and the global `config.toml`

pub mod defaults;
pub mod global;
