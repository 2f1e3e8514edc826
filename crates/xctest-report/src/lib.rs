//! Result interpretation for xcodebuild unit test runs.
//!
//! The engine hands this crate the raw output of a test run: stdout from
//! the test step, stderr when the run was broken, and the text produced by
//! `llvm-cov show` when coverage was extracted. The parser turns that into
//! one [`TestResult`] per executed test case, each carrying the per-file
//! line coverage of the run.

mod coverage;
mod parser;
mod result;

pub use coverage::{parse_coverage, CoverageMap};
pub use parser::{parse_test_output, ParseInput, XcodeResultParser, BROKEN_RESULT_NAME};
pub use result::{TestResult, TestStatus, TestSummary};
