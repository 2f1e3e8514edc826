//! Scanner for `xcodebuild -showBuildSettings` output.

/// Value of the first `KEY = value` line whose key is `key`.
///
/// Lines are matched on the whole key, so `OBJROOT` does not match
/// `PROJECT_OBJROOT`. Empty values count as absent.
pub fn find_setting(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(" = ")?;
        if k.trim() != key {
            return None;
        }
        let value = v.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
