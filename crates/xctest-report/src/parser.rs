//! xcodebuild test output parser.
//!
//! Recognizes XCTest case lines in both the classic
//! `Test Case '-[Target.Suite testMethod]' passed (0.123 seconds).` form and
//! the newer `Test case 'Suite.testMethod()' passed on 'iPhone 16' (0.123 seconds)`
//! form, Swift Testing's `✔ Test name() passed after 0.1 seconds.` lines,
//! and assertion failure lines that carry the message for a failing case.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::coverage::parse_coverage;
use crate::result::{TestResult, TestStatus};

/// Name of the single result emitted for a broken run.
pub const BROKEN_RESULT_NAME: &str = "xcodebuild";

/// Maximum length for a failing test's details.
const MAX_DETAILS_LENGTH: usize = 2000;

fn test_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*Test case '([^']+)' (passed|failed|skipped)(?: on '[^']*')? \((\d+(?:\.\d+)?) seconds\)",
        )
        .expect("test case pattern is valid")
    })
}

fn swift_test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[✔✘↷] Test (\w+)\(\) (passed|failed|skipped)(?: after (\d+(?:\.\d+)?) seconds)?")
            .expect("swift test pattern is valid")
    })
}

fn failure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(.+?):(\d+): error: (-\[[^\]]+\]) : (.*)$")
            .expect("failure pattern is valid")
    })
}

/// Raw material for interpretation.
#[derive(Debug, Clone, Copy)]
pub struct ParseInput<'a> {
    /// stdout of the test step
    pub stdout: &'a str,
    /// stderr of the run
    pub stderr: &'a str,
    /// `llvm-cov show` output, when coverage was extracted
    pub coverage: Option<&'a str>,
    /// The run was classified as broken (build or infrastructure failure)
    pub broken: bool,
    /// Coverage paths are reported relative to this directory
    pub project_root: &'a Path,
}

/// Interprets xcodebuild runs into structured results.
#[derive(Debug, Clone, Copy, Default)]
pub struct XcodeResultParser;

impl XcodeResultParser {
    pub fn new() -> Self {
        Self
    }

    /// Interpret a run.
    ///
    /// A broken run yields exactly one [`TestStatus::Broken`] result whose
    /// details are the stderr text, unmodified. Otherwise one result per
    /// test case line. Coverage, when present, is attached to every result.
    pub fn parse(&self, input: &ParseInput<'_>) -> Vec<TestResult> {
        let mut results = if input.broken {
            vec![TestResult::new(BROKEN_RESULT_NAME, TestStatus::Broken).with_details(input.stderr)]
        } else {
            parse_test_output(input.stdout)
        };

        if let Some(text) = input.coverage {
            let coverage = parse_coverage(text, input.project_root);
            if !coverage.is_empty() {
                for result in &mut results {
                    result.coverage = coverage.clone();
                }
            }
        }

        results
    }
}

/// Parse test case results out of xcodebuild stdout.
pub fn parse_test_output(stdout: &str) -> Vec<TestResult> {
    let mut results = Vec::new();
    let mut failures: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for line in stdout.lines() {
        if let Some(caps) = failure_re().captures(line) {
            let name = normalize_name(&caps[3]);
            let message = format!("{}:{}: {}", &caps[1], &caps[2], caps[4].trim());
            failures.entry(name).or_default().push(message);
            continue;
        }

        let caps = match test_case_re()
            .captures(line)
            .or_else(|| swift_test_re().captures(line))
        {
            Some(c) => c,
            None => continue,
        };

        let name = normalize_name(&caps[1]);
        let status = match caps[2].to_ascii_lowercase().as_str() {
            "passed" => TestStatus::Pass,
            "failed" => TestStatus::Fail,
            _ => TestStatus::Skip,
        };

        let mut result = TestResult::new(name, status);
        if let Some(seconds) = caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok()) {
            result = result.with_duration(seconds);
        }
        results.push(result);
    }

    for result in results.iter_mut().filter(|r| r.status == TestStatus::Fail) {
        let messages: Vec<&str> = match failures.get(&result.name) {
            Some(exact) => exact.iter().map(String::as_str).collect(),
            None => {
                let suffix = format!(".{}", result.name);
                failures
                    .iter()
                    .filter(|(key, _)| key.ends_with(&suffix))
                    .flat_map(|(_, messages)| messages.iter().map(String::as_str))
                    .collect()
            }
        };
        if !messages.is_empty() {
            result.details = Some(truncate_details(&messages.join("\n"), MAX_DETAILS_LENGTH));
        }
    }

    results
}

/// `-[Target.Suite testMethod]` -> `Target.Suite.testMethod`,
/// `Suite.testMethod()` -> `Suite.testMethod`.
fn normalize_name(raw: &str) -> String {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix("-[")
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    let inner = inner.strip_suffix("()").unwrap_or(inner);
    inner.replace(' ', ".")
}

fn truncate_details(details: &str, max_len: usize) -> String {
    if details.len() <= max_len {
        return details.to_string();
    }
    let mut end = max_len;
    while !details.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &details[..end])
}
