//! `llvm-cov show` text parser.
//!
//! Produces one coverage string per source file, one character per line:
//! `N` not executable, `C` covered, `U` executable but never run.

use std::collections::BTreeMap;
use std::path::Path;

/// Rows numbered beyond this are treated as malformed and skipped.
const MAX_LINE_NUMBER: usize = 1_000_000;

/// Project-relative source path -> line coverage string.
pub type CoverageMap = BTreeMap<String, String>;

/// Parse `llvm-cov show -use-color=false` output.
///
/// Each file section starts with an unindented `/abs/path/File.swift:`
/// header followed by `  <line>|  <count>|<source>` rows. Instantiation
/// sub-views (rows starting with `|` or `-` after indentation) are ignored.
/// Files outside `project_root` are dropped.
pub fn parse_coverage(text: &str, project_root: &Path) -> CoverageMap {
    let mut map = CoverageMap::new();
    let mut current: Option<(String, Vec<u8>)> = None;

    for line in text.lines() {
        if is_file_header(line) {
            flush(&mut map, current.take());
            let path = &line[..line.len() - 1];
            current = Path::new(path)
                .strip_prefix(project_root)
                .ok()
                .map(|rel| (rel.to_string_lossy().into_owned(), Vec::new()));
            continue;
        }

        let Some((_, lines)) = current.as_mut() else {
            continue;
        };

        if let Some((number, mark)) = parse_row(line) {
            let index = number - 1;
            if lines.len() <= index {
                lines.resize(index + 1, b'N');
            }
            lines[index] = mark;
        }
    }

    flush(&mut map, current.take());
    map
}

fn is_file_header(line: &str) -> bool {
    !line.is_empty()
        && !line.starts_with(char::is_whitespace)
        && line.ends_with(':')
        && !line.contains('|')
}

/// `   12|      5|  code` -> (12, b'C')
fn parse_row(line: &str) -> Option<(usize, u8)> {
    let mut parts = line.splitn(3, '|');
    let number = parts.next()?.trim().parse::<usize>().ok()?;
    let count = parts.next()?.trim();
    // Require the source column so partial rows are not misread.
    parts.next()?;

    if number == 0 || number > MAX_LINE_NUMBER {
        return None;
    }

    let mark = match count {
        "" => b'N',
        "0" => b'U',
        _ => b'C',
    };
    Some((number, mark))
}

fn flush(map: &mut CoverageMap, section: Option<(String, Vec<u8>)>) {
    if let Some((path, lines)) = section {
        map.insert(path, String::from_utf8_lossy(&lines).into_owned());
    }
}
