//! Engine configuration (.xctest/engine.toml)
//!
//! The configuration file is read once per invocation into an immutable
//! [`RunConfig`] that every component receives by reference.

mod build_settings;
mod run_config;

pub use build_settings::BuildSettings;
pub(crate) use build_settings::COVERAGE_SETTING;
pub use run_config::{
    ConfigError, CoverageMode, CoverageSettings, RunConfig, ToolCommands, WatchSettings,
    DEFAULT_CONFIG_PATH,
};
