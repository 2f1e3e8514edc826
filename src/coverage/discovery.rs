//! Coverage artifact discovery under the build output root.
//!
//! Both searches take the first match of a depth-first walk with entries
//! sorted by file name. Multi-target builds can produce several matches;
//! only the first is used. Entries that cannot be read are skipped.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// File name of the merged coverage profile written by xcodebuild.
pub const PROFILE_FILE_NAME: &str = "Coverage.profdata";

fn walk(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
}

/// First `Coverage.profdata` file under `root`.
pub fn find_profile(root: &Path) -> Option<PathBuf> {
    walk(root)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == PROFILE_FILE_NAME)
        .map(DirEntry::into_path)
}

/// First path under `root` whose root-relative form contains `product`.
pub fn find_product(root: &Path, product: &str) -> Option<PathBuf> {
    walk(root)
        .find(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(|rel| rel.to_string_lossy().contains(product))
                .unwrap_or(false)
        })
        .map(DirEntry::into_path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_find_profile() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "CodeCoverage/MyApp/Coverage.profdata");
        touch(temp.path(), "CodeCoverage/MyApp/Other.profdata");

        let found = find_profile(temp.path());
        assert_eq!(found, Some(temp.path().join("CodeCoverage/MyApp/Coverage.profdata")));
    }

    #[test]
    fn test_find_profile_first_by_name_order() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b/Coverage.profdata");
        touch(temp.path(), "a/Coverage.profdata");

        let found = find_profile(temp.path());
        assert_eq!(found, Some(temp.path().join("a/Coverage.profdata")));
    }

    #[test]
    fn test_profile_directory_ignored() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Coverage.profdata")).unwrap();
        assert_eq!(find_profile(temp.path()), None);
    }

    #[test]
    fn test_find_product() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "CodeCoverage/MyApp/Products/Debug-iphonesimulator/MyApp.app/MyApp");
        touch(temp.path(), "CodeCoverage/MyApp/Products/Debug-iphonesimulator/MyApp.app/Info.plist");

        let found = find_product(temp.path(), "MyApp.app/MyApp");
        assert_eq!(
            found,
            Some(temp.path().join("CodeCoverage/MyApp/Products/Debug-iphonesimulator/MyApp.app/MyApp"))
        );
    }

    #[test]
    fn test_product_not_matched_against_root_prefix() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("MyApp.app");
        touch(&root, "nothing/here");

        assert_eq!(find_product(&root, "MyApp.app"), None);
    }

    #[test]
    fn test_nothing_found() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "Build/Intermediates/readme.txt");
        assert_eq!(find_profile(temp.path()), None);
        assert_eq!(find_product(temp.path(), "MyApp.app/MyApp"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_sibling_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("a_locked");
        fs::create_dir_all(locked.join("inner")).unwrap();
        touch(temp.path(), "b/CodeCoverage/Coverage.profdata");
        touch(temp.path(), "b/Products/MyApp.app/MyApp");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let profile = find_profile(temp.path());
        let product = find_product(temp.path(), "MyApp.app/MyApp");

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(profile, Some(temp.path().join("b/CodeCoverage/Coverage.profdata")));
        assert_eq!(product, Some(temp.path().join("b/Products/MyApp.app/MyApp")));
    }

    #[test]
    fn test_missing_root_finds_nothing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("absent");
        assert_eq!(find_profile(&root), None);
        assert_eq!(find_product(&root, "MyApp"), None);
    }
}
