//! Run configuration loading and validation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::build_settings::BuildSettings;
use crate::process::{Sentinels, WatchTiming};

/// Default config location, relative to the project root.
pub const DEFAULT_CONFIG_PATH: &str = ".xctest/engine.toml";

/// Error types for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0} (create it in the project root)")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required key '{0}'")]
    MissingKey(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Coverage enablement as supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoverageMode {
    /// Coverage explicitly turned off
    Disabled,
    /// Not specified: enabled when the config has a `[coverage]` table
    #[default]
    Unset,
    /// Coverage explicitly requested; `[coverage]` must be present
    Enabled,
}

impl CoverageMode {
    /// Resolve from a pair of `--coverage` / `--no-coverage` style flags.
    pub fn from_flags(enable: bool, disable: bool) -> Self {
        match (enable, disable) {
            (true, false) => CoverageMode::Enabled,
            (false, true) => CoverageMode::Disabled,
            _ => CoverageMode::Unset,
        }
    }
}

/// `[coverage]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CoverageSettings {
    /// Built test product to feed llvm-cov, matched as a path fragment
    /// (e.g., "MyApp.app/MyApp")
    pub product: String,

    /// Build setting naming the output root to search
    #[serde(default = "default_output_root_setting")]
    pub build_setting: String,
}

fn default_output_root_setting() -> String {
    "OBJROOT".to_string()
}

/// `[tools]` table: command prefixes for the external executables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolCommands {
    #[serde(default = "default_xcodebuild")]
    pub xcodebuild: Vec<String>,

    #[serde(default = "default_coverage_tool")]
    pub coverage: Vec<String>,
}

fn default_xcodebuild() -> Vec<String> {
    vec!["xcodebuild".to_string()]
}

fn default_coverage_tool() -> Vec<String> {
    vec!["xcrun".to_string(), "llvm-cov".to_string()]
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            xcodebuild: default_xcodebuild(),
            coverage: default_coverage_tool(),
        }
    }
}

/// `[watch]` table: process watching and exit code policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct WatchSettings {
    /// Upper bound on each wait for new output (default: 1000)
    pub poll_interval_ms: u64,

    /// SIGTERM to SIGKILL grace period on forced termination (default: 5)
    pub termination_grace_seconds: u64,

    pub success_sentinel: String,

    pub failure_sentinel: String,

    /// xcodebuild exit code meaning "tests ran, some failed" (default: 65)
    pub tests_failed_exit_code: i32,

    /// First xcodebuild major version with build-for-testing /
    /// test-without-building (default: 8)
    pub decoupled_min_version: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            termination_grace_seconds: 5,
            success_sentinel: "** TEST EXECUTE SUCCEEDED **".to_string(),
            failure_sentinel: "** TEST EXECUTE FAILED **".to_string(),
            tests_failed_exit_code: 65,
            decoupled_min_version: 8,
        }
    }
}

impl WatchSettings {
    pub fn timing(&self) -> WatchTiming {
        WatchTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            termination_grace: Duration::from_secs(self.termination_grace_seconds),
        }
    }

    pub fn sentinels(&self) -> Sentinels {
        Sentinels::new(&self.success_sentinel, &self.failure_sentinel)
    }
}

/// On-disk layout of the config file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct EngineFile {
    pre_build: Option<String>,
    build: Option<BuildSettings>,
    coverage: Option<CoverageSettings>,
    #[serde(default)]
    tools: ToolCommands,
    #[serde(default)]
    watch: WatchSettings,
}

/// Immutable configuration for a single run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Working directory for the hook and the coverage tool
    pub project_root: PathBuf,

    pub build: BuildSettings,

    /// Resolved from [`CoverageMode`] and the `[coverage]` table
    pub coverage_enabled: bool,

    pub coverage: Option<CoverageSettings>,

    /// Shell command run in the project root before building
    pub pre_build: Option<String>,

    pub tools: ToolCommands,

    pub watch: WatchSettings,

    /// SHA-256 of the raw config file bytes (empty when parsed from a string)
    pub digest: String,
}

impl RunConfig {
    /// Load the config for a project.
    ///
    /// `config_path` defaults to [`DEFAULT_CONFIG_PATH`] under `project_root`;
    /// a relative override is resolved against `project_root` too.
    pub fn load(
        project_root: &Path,
        config_path: Option<&Path>,
        coverage: CoverageMode,
    ) -> Result<Self, ConfigError> {
        let path = match config_path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => project_root.join(p),
            None => project_root.join(DEFAULT_CONFIG_PATH),
        };

        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let bytes = fs::read(&path)?;
        let contents = String::from_utf8(bytes.clone()).map_err(|e| {
            ConfigError::ValidationError(format!("{} is not valid UTF-8: {}", path.display(), e))
        })?;

        let mut config = Self::parse(project_root, &contents, coverage)?;
        config.digest = hex::encode(Sha256::digest(&bytes));
        Ok(config)
    }

    /// Parse config from a TOML string
    pub fn parse(project_root: &Path, s: &str, coverage: CoverageMode) -> Result<Self, ConfigError> {
        let file: EngineFile = toml::from_str(s)?;

        let build = file.build.ok_or_else(|| ConfigError::MissingKey("build".to_string()))?;

        let coverage_enabled = match coverage {
            CoverageMode::Disabled => false,
            CoverageMode::Unset => file.coverage.is_some(),
            CoverageMode::Enabled => {
                if file.coverage.is_none() {
                    return Err(ConfigError::MissingKey("coverage.product".to_string()));
                }
                true
            }
        };

        let pre_build = file
            .pre_build
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty());

        let config = Self {
            project_root: project_root.to_path_buf(),
            build,
            coverage_enabled,
            coverage: file.coverage,
            pre_build,
            tools: file.tools,
            watch: file.watch,
            digest: String::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tools.xcodebuild.is_empty() {
            return Err(ConfigError::ValidationError(
                "tools.xcodebuild must name a command".to_string(),
            ));
        }

        if self.tools.coverage.is_empty() {
            return Err(ConfigError::ValidationError(
                "tools.coverage must name a command".to_string(),
            ));
        }

        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "watch.poll-interval-ms must be greater than 0".to_string(),
            ));
        }

        if self.watch.success_sentinel.is_empty() || self.watch.failure_sentinel.is_empty() {
            return Err(ConfigError::ValidationError(
                "watch sentinels cannot be empty".to_string(),
            ));
        }

        if self.coverage_enabled {
            // Coverage artifacts are keyed by scheme
            if self.build.scheme().is_none() {
                return Err(ConfigError::MissingKey("build.scheme".to_string()));
            }

            if let Some(ref coverage) = self.coverage {
                if coverage.product.trim().is_empty() {
                    return Err(ConfigError::MissingKey("coverage.product".to_string()));
                }
                if coverage.build_setting.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "coverage.build-setting cannot be empty".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
