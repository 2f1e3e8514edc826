//! Coverage extraction
//!
//! After a clean test run, asks xcodebuild where it put intermediates,
//! finds the coverage profile and the built product underneath, and runs
//! `llvm-cov show` over them. The text report is handed to the result
//! interpreter as-is.

mod discovery;
mod settings;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{self, CommandInvocation, XcodebuildAction};
use crate::config::RunConfig;
use crate::process::{run_to_completion, ProcessLauncher};

pub use discovery::{find_product, find_profile, PROFILE_FILE_NAME};
pub use settings::find_setting;

/// Error types for coverage extraction
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("coverage is enabled but no [coverage] settings are configured")]
    NotConfigured,

    #[error("coverage requires build.scheme")]
    MissingScheme,

    #[error("build setting {setting} not found in xcodebuild -showBuildSettings output")]
    MissingBuildSetting { setting: String },

    #[error("no Coverage.profdata found under {}", output_root.display())]
    ProfileNotFound { output_root: PathBuf },

    #[error("product '{product}' not found under {}", output_root.display())]
    ProductNotFound { product: String, output_root: PathBuf },

    #[error("coverage tool exited with {exit_code}: {stderr}")]
    Tool { exit_code: i32, stderr: String },

    #[error("failed to start `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Coverage inputs discovered for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageArtifacts {
    pub output_root: PathBuf,
    pub profile_path: Option<PathBuf>,
    pub product_path: Option<PathBuf>,
}

impl CoverageArtifacts {
    /// Search `output_root` for the profile and `product`.
    pub fn discover(output_root: &Path, product: &str) -> Self {
        if !output_root.is_dir() {
            debug!(output_root = %output_root.display(), "output root does not exist");
            return Self {
                output_root: output_root.to_path_buf(),
                profile_path: None,
                product_path: None,
            };
        }

        Self {
            output_root: output_root.to_path_buf(),
            profile_path: find_profile(output_root),
            product_path: find_product(output_root, product),
        }
    }
}

/// Result of a successful extraction.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageExtraction {
    pub artifacts: CoverageArtifacts,
    /// `llvm-cov show` output
    pub report: String,
    /// Commands issued, in order
    pub invocations: Vec<CommandInvocation>,
}

/// Runs the coverage steps through a process launcher.
pub struct CoverageExtractor<'a> {
    launcher: &'a dyn ProcessLauncher,
}

impl<'a> CoverageExtractor<'a> {
    pub fn new(launcher: &'a dyn ProcessLauncher) -> Self {
        Self { launcher }
    }

    /// Locate coverage artifacts and produce the coverage report.
    pub fn extract(&self, config: &RunConfig) -> Result<CoverageExtraction, CoverageError> {
        let settings = config.coverage.as_ref().ok_or(CoverageError::NotConfigured)?;
        if config.build.scheme().is_none() {
            return Err(CoverageError::MissingScheme);
        }

        let mut invocations = Vec::new();
        let output_root = self.output_root(config, &settings.build_setting, &mut invocations)?;
        info!(output_root = %output_root.display(), "searching for coverage artifacts");

        let artifacts = CoverageArtifacts::discover(&output_root, &settings.product);
        let profile = artifacts
            .profile_path
            .clone()
            .ok_or_else(|| CoverageError::ProfileNotFound {
                output_root: output_root.clone(),
            })?;
        let product = artifacts
            .product_path
            .clone()
            .ok_or_else(|| CoverageError::ProductNotFound {
                product: settings.product.clone(),
                output_root: output_root.clone(),
            })?;

        let report = self.report(config, &profile, &product, &mut invocations)?;

        Ok(CoverageExtraction {
            artifacts,
            report,
            invocations,
        })
    }

    /// Ask xcodebuild for the output root. The settings are queried fresh
    /// on every run; the exit code of the query is not significant.
    fn output_root(
        &self,
        config: &RunConfig,
        setting: &str,
        invocations: &mut Vec<CommandInvocation>,
    ) -> Result<PathBuf, CoverageError> {
        let invocation = command::xcodebuild(config, XcodebuildAction::ShowBuildSettings)
            .ok_or_else(|| CoverageError::MissingBuildSetting {
                setting: setting.to_string(),
            })?;
        invocations.push(invocation.clone());

        let outcome = run_to_completion(self.launcher, &invocation, config.watch.timing())
            .map_err(|source| CoverageError::Launch {
                command: invocation.to_string(),
                source,
            })?;
        if !outcome.success() {
            debug!(exit_code = outcome.exit_code, "showBuildSettings exited non-zero");
        }

        let value = find_setting(&outcome.stdout_text(), setting).ok_or_else(|| {
            CoverageError::MissingBuildSetting {
                setting: setting.to_string(),
            }
        })?;

        let path = PathBuf::from(value);
        Ok(if path.is_absolute() {
            path
        } else {
            config.project_root.join(path)
        })
    }

    /// Run the coverage tool over the discovered artifacts.
    fn report(
        &self,
        config: &RunConfig,
        profile: &Path,
        product: &Path,
        invocations: &mut Vec<CommandInvocation>,
    ) -> Result<String, CoverageError> {
        let invocation = CommandInvocation::from_prefix(&config.tools.coverage)
            .ok_or(CoverageError::NotConfigured)?
            .args(["show", "-use-color=false", "-instr-profile"])
            .arg(profile.to_string_lossy())
            .arg(product.to_string_lossy())
            .current_dir(&config.project_root);
        invocations.push(invocation.clone());

        let outcome = run_to_completion(self.launcher, &invocation, config.watch.timing())
            .map_err(|source| CoverageError::Launch {
                command: invocation.to_string(),
                source,
            })?;

        if !outcome.success() {
            if !outcome.stderr.is_empty() {
                return Err(CoverageError::Tool {
                    exit_code: outcome.exit_code,
                    stderr: outcome.stderr_text(),
                });
            }
            // llvm-cov exits non-zero without a message when there is no data
            warn!(
                exit_code = outcome.exit_code,
                "coverage tool exited non-zero with empty stderr"
            );
        }

        Ok(outcome.stdout_text())
    }
}
