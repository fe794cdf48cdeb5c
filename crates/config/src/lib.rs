//! Configuration loading, env substitution and env overrides.
//!
//! Config files: `marketsync.toml`, `marketsync.yaml`, or `marketsync.json`
//! Searched in `./` then `~/.config/marketsync/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        DatabaseConfig, HttpConfig, MarketsyncConfig, OzonConfig, SchedulerConfig, SyncConfig,
    },
};
