//! Structured test result types.

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMap;

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    /// The build or the tool itself failed; no test outcome is known.
    Broken,
}

impl TestStatus {
    /// Short lowercase label used in human output.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Skip => "skip",
            TestStatus::Broken => "broken",
        }
    }

    /// Returns true for outcomes that should fail a CI gate.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Broken)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single interpreted test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Normalized name, `Suite.testMethod` (or `Target.Suite.testMethod`)
    pub name: String,

    pub status: TestStatus,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_seconds: Option<f64>,

    /// Failure messages, or the captured stderr for broken runs
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<String>,

    /// Project-relative path -> line coverage string
    #[serde(skip_serializing_if = "CoverageMap::is_empty", default)]
    pub coverage: CoverageMap,
}

impl TestResult {
    pub fn new(name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            name: name.into(),
            status,
            duration_seconds: None,
            details: None,
            coverage: CoverageMap::new(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Counts across a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub broken: u32,
}

impl TestSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            match result.status {
                TestStatus::Pass => summary.passed += 1,
                TestStatus::Fail => summary.failed += 1,
                TestStatus::Skip => summary.skipped += 1,
                TestStatus::Broken => summary.broken += 1,
            }
        }
        summary
    }

    /// True when nothing failed or broke.
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.broken == 0
    }
}
