//! Config loading and persistence.
//!
//! Precedence, lowest first: built-in defaults, user config
//! (`$XDG_CONFIG_HOME/sop-check/config.toml`), project config (`./sop.toml`
//! or `--config PATH`), `SOP_*` environment variables, then CLI flags.

mod load;
mod merge;
mod schema;

pub use load::{
    Loaded, config_path, load, load_layer, load_user_config, project_config_path, write_config,
};
pub use merge::{apply_env_overrides, apply_env_overrides_from, merge_layers};
pub use schema::{
    BoundsOverride, Config, ConfigLayer, FileLoggingConfig, FileLoggingConfigOverride, LogFormat,
    LogRotation, LoggingConfig, LoggingConfigOverride, SearchOverride,
};
